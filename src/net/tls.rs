//! TLS acceptor setup. Handshakes happen on the worker thread that owns
//! the connection, not on the accept loop.

use crate::error::{CustodianResult, ServerError};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig as RustlsConfig, ServerConnection, StreamOwned};
use std::fs::File;
use std::io::BufReader;
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;

pub type TlsStream = StreamOwned<ServerConnection, TcpStream>;

fn load_cert_chain(path: &Path) -> CustodianResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|_| ServerError::FileOpen(path.to_path_buf()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ServerError::FileRead(path.to_path_buf()))
}

fn load_private_key(path: &Path) -> CustodianResult<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|_| ServerError::FileOpen(path.to_path_buf()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|_| ServerError::FileRead(path.to_path_buf()))?
        .ok_or_else(|| ServerError::Bootstrap(format!("no private key found in {}", path.display())))
}

/// Build the shared, immutable TLS server configuration from a PEM
/// certificate chain and PKCS#8/RSA private key.
pub fn build_server_config(cert_path: &Path, key_path: &Path) -> CustodianResult<Arc<RustlsConfig>> {
    let chain = load_cert_chain(cert_path)?;
    let key = load_private_key(key_path)?;
    let config = RustlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| ServerError::Bootstrap(format!("invalid TLS certificate/key: {e}")))?;
    Ok(Arc::new(config))
}

/// Perform the server-side handshake over an accepted `TcpStream`.
pub fn accept(config: Arc<RustlsConfig>, stream: TcpStream) -> CustodianResult<TlsStream> {
    let conn = ServerConnection::new(config)
        .map_err(|e| ServerError::Internal(format!("TLS session init failed: {e}")))?;
    Ok(StreamOwned::new(conn, stream))
}
