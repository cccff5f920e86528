//! Exercises the wire framing and command dispatch end-to-end over a real
//! TCP socket (no TLS in the loop — `handle_one_request` is generic over
//! `Read + Write`, and the TLS handshake itself is covered separately in
//! `tls_config.rs`).

use custodian::access::AccessManager;
use custodian::account::AccountManager;
use custodian::protocol::{self, ServerState};
use custodian::session::SessionManager;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn bootstrap_state(dir: &std::path::Path) -> ServerState {
    let rules_path = dir.join("db.rules");
    std::fs::write(&rules_path, "match public/{x} { allow rw }").unwrap();

    let mut access = AccessManager::new();
    access.add_db("db", dir.join("tree"), &rules_path).unwrap();
    access
        .with_admin_tree("db", |tree| tree.add_root_collection("public"))
        .unwrap();

    let accounts = AccountManager::open(dir.join("accounts")).unwrap();

    ServerState {
        sessions: Arc::new(SessionManager::new()),
        accounts: Arc::new(accounts),
        access: Arc::new(access),
        default_db: "db".to_string(),
    }
}

fn write_frame(stream: &mut TcpStream, session_id: u32, command_word: u16, body: &[u8]) {
    stream.write_all(&session_id.to_be_bytes()).unwrap();
    stream.write_all(&command_word.to_be_bytes()).unwrap();
    stream.write_all(body).unwrap();
}

fn string_field(s: &str) -> Vec<u8> {
    let mut out = (s.len() as u16).to_be_bytes().to_vec();
    out.extend_from_slice(s.as_bytes());
    out
}

fn read_header(stream: &mut TcpStream) -> (u32, u16) {
    let mut session = [0u8; 4];
    let mut word = [0u8; 2];
    stream.read_exact(&mut session).unwrap();
    stream.read_exact(&mut word).unwrap();
    (u32::from_be_bytes(session), u16::from_be_bytes(word))
}

fn read_err(stream: &mut TcpStream) -> u16 {
    let mut code = [0u8; 2];
    stream.read_exact(&mut code).unwrap();
    u16::from_be_bytes(code)
}

fn read_data_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut len = [0u8; 8];
    stream.read_exact(&mut len).unwrap();
    let len = u64::from_be_bytes(len) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).unwrap();
    buf
}

const TEXT_FLAG: u16 = 0x01;

#[test]
fn full_session_create_account_login_post_get_round_trip() {
    let dir = tempdir().unwrap();
    let state = bootstrap_state(dir.path());

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        // Five requests land on this connection: session, create account,
        // login, post, get.
        for _ in 0..5 {
            protocol::handle_one_request(&state, &mut stream).unwrap();
        }
    });

    let mut client = TcpStream::connect(addr).unwrap();

    // GET_SESSION_ID
    write_frame(&mut client, 0, protocol::CMD_GET_SESSION_ID, &[]);
    let (session_id, _) = read_header(&mut client);
    assert_ne!(session_id, 0);

    // CREATE_ACCOUNT
    let mut body = string_field("alice");
    body.extend(string_field("alice@example.com"));
    body.extend(string_field("hunter2"));
    write_frame(&mut client, session_id, protocol::CMD_CREATE_ACCOUNT, &body);
    read_header(&mut client);
    assert_eq!(read_err(&mut client), custodian::error::SUCCESS);

    // LOGIN
    let mut body = string_field("alice");
    body.extend(string_field("hunter2"));
    write_frame(&mut client, session_id, protocol::CMD_LOGIN, &body);
    read_header(&mut client);
    assert_eq!(read_err(&mut client), custodian::error::SUCCESS);

    // POST: perm byte (PUBLIC = 2), path, length-prefixed data. Flags carry
    // the TEXT resource type.
    let data = b"hello from alice";
    let mut body = vec![2u8];
    body.extend(string_field("public/notice"));
    body.extend((data.len() as u16).to_be_bytes());
    body.extend_from_slice(data);
    let post_word = protocol::compose_command_word(TEXT_FLAG, protocol::CMD_POST);
    write_frame(&mut client, session_id, post_word, &body);
    read_header(&mut client);
    assert_eq!(read_err(&mut client), custodian::error::SUCCESS);

    // GET: path + u64 offset.
    let mut body = string_field("public/notice");
    body.extend(0u64.to_be_bytes());
    let get_word = protocol::compose_command_word(TEXT_FLAG, protocol::CMD_GET);
    write_frame(&mut client, session_id, get_word, &body);
    read_header(&mut client);
    assert_eq!(read_err(&mut client), custodian::error::SUCCESS);
    let received = read_data_frame(&mut client);
    // TEXT items carry a trailing null counted in data_size.
    assert_eq!(&received[..data.len()], data);
    assert_eq!(received.len(), data.len() + 1);
    assert_eq!(received[data.len()], 0);

    drop(client);
    server.join().unwrap();
}

#[test]
fn oversized_login_field_is_command_format_and_closes_without_side_effects() {
    let dir = tempdir().unwrap();
    let state = bootstrap_state(dir.path());

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let accounts_check = state.accounts.clone();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        protocol::handle_one_request(&state, &mut stream).unwrap();
    });

    let mut client = TcpStream::connect(addr).unwrap();
    let oversized = "x".repeat(200);
    let mut body = string_field(&oversized);
    body.extend(string_field("a@b.com"));
    body.extend(string_field("pw"));
    write_frame(&mut client, 1, protocol::CMD_CREATE_ACCOUNT, &body);
    read_header(&mut client);
    assert_eq!(
        read_err(&mut client),
        custodian::error::ServerError::CommandFormat
            .to_wire_code()
            .unwrap()
    );

    drop(client);
    server.join().unwrap();
    assert!(
        matches!(
            accounts_check.login(&oversized, "pw"),
            Err(custodian::error::ServerError::NoAccount)
        ),
        "the rejected request must not have created an account"
    );
}
