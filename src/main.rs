use clap::Parser;
use custodian::config::ConfigBuilder;
use custodian::net;
use std::path::PathBuf;

/// Custodian content server.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to a JSON configuration file. Overridden field-by-field by
    /// any other flag passed alongside it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    db_dir: Option<PathBuf>,

    #[arg(long)]
    bind: Option<String>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    cert: Option<PathBuf>,

    #[arg(long)]
    key: Option<PathBuf>,

    #[arg(long)]
    read_timeout_secs: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let base = match &args.config {
        Some(path) => {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str(&contents)?
        }
        None => custodian::config::ServerConfig::default(),
    };

    let mut builder = ConfigBuilder::from_config(base);
    if let Some(db_dir) = args.db_dir {
        builder = builder.db_dir(db_dir);
    }
    if let Some(bind) = args.bind {
        builder = builder.bind_address(bind);
    }
    if let Some(workers) = args.workers {
        builder = builder.workers(workers);
    }
    if let Some(cert) = args.cert {
        builder = builder.tls_cert(cert);
    }
    if let Some(key) = args.key {
        builder = builder.tls_key(key);
    }
    if let Some(read_timeout_secs) = args.read_timeout_secs {
        builder = builder.read_timeout_secs(read_timeout_secs);
    }
    let config = builder.build()?;

    let state = net::bootstrap(&config)?;
    let tls_config = net::tls::build_server_config(&config.tls_cert, &config.tls_key)?;
    net::run(
        state,
        tls_config,
        &config.bind_address,
        config.workers,
        std::time::Duration::from_secs(config.read_timeout_secs),
    )?;
    Ok(())
}
