//! Wire framing and command dispatch.
//!
//! Every request opens with a 6-byte header: a 4-byte big-endian
//! `session_id` followed by a 2-byte big-endian `command_word`, which
//! decomposes as `flags = (word & 0x0FF0) >> 4` and `command = word &
//! 0xF00F`. Variable-length fields are `uint16_be length` followed by
//! `length` bytes.

use crate::access::AccessManager;
use crate::account::AccountManager;
use crate::error::{CustodianResult, ServerError};
use crate::item::{DataType, Permission};
use crate::rules::{PermsRequested, RequestContext};
use crate::session::SessionManager;
use std::io::{Read, Write};
use std::sync::Arc;

pub const CMD_GET_SESSION_ID: u16 = 0x1001;
pub const CMD_CREATE_ACCOUNT: u16 = 0x1002;
pub const CMD_LOGIN: u16 = 0x1003;
pub const CMD_GET: u16 = 0x2001;
pub const CMD_POST: u16 = 0x2002;

const LOGIN_FIELD_MAX: usize = 128;
const PATH_MAX: usize = 4096;
const DATA_MAX: usize = 64 * 1024 * 1024;

pub fn decompose_command_word(word: u16) -> (u16, u16) {
    let flags = (word & 0x0FF0) >> 4;
    let command = word & 0xF00F;
    (flags, command)
}

pub fn compose_command_word(flags: u16, command: u16) -> u16 {
    ((flags << 4) & 0x0FF0) | (command & 0xF00F)
}

/// Shared server state handed to every worker. Cheap to clone (all fields
/// are `Arc`s); cloned once per accepted connection.
#[derive(Clone)]
pub struct ServerState {
    pub sessions: Arc<SessionManager>,
    pub accounts: Arc<AccountManager>,
    pub access: Arc<AccessManager>,
    pub default_db: String,
}

fn read_u16(stream: &mut impl Read) -> CustodianResult<u16> {
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_u32(stream: &mut impl Read) -> CustodianResult<u32> {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_u64(stream: &mut impl Read) -> CustodianResult<u64> {
    let mut buf = [0u8; 8];
    stream.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

/// Reads the length-prefixed field unconditionally (even when it exceeds
/// `max_len`) so a rejected field still leaves the stream framed for the
/// next request; only then checks the bound.
fn read_bytes(stream: &mut impl Read, max_len: usize) -> CustodianResult<Vec<u8>> {
    let len = read_u16(stream)? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;
    if len > max_len {
        return Err(ServerError::CommandFormat);
    }
    Ok(buf)
}

fn read_string(stream: &mut impl Read, max_len: usize) -> CustodianResult<String> {
    let bytes = read_bytes(stream, max_len)?;
    if bytes.is_empty() {
        return Err(ServerError::CommandFormat);
    }
    String::from_utf8(bytes).map_err(|_| ServerError::CommandFormat)
}

fn write_header(stream: &mut impl Write, session_id: u32, command_word: u16) -> CustodianResult<()> {
    stream.write_all(&session_id.to_be_bytes())?;
    stream.write_all(&command_word.to_be_bytes())?;
    Ok(())
}

fn write_err(stream: &mut impl Write, code: u16) -> CustodianResult<()> {
    stream.write_all(&code.to_be_bytes())?;
    Ok(())
}

fn write_data_frame(stream: &mut impl Write, data: &[u8]) -> CustodianResult<()> {
    stream.write_all(&(data.len() as u64).to_be_bytes())?;
    stream.write_all(data)?;
    Ok(())
}

/// Read one request header + body, dispatch it, and write the reply.
/// Returns `Ok(())` having written a reply (including on an application
/// error, which is surfaced as a wire error code, not a `Result::Err`).
/// A `Result::Err` here means the connection itself is broken and should
/// be torn down without attempting to write further.
pub fn handle_one_request(
    state: &ServerState,
    stream: &mut (impl Read + Write),
) -> CustodianResult<()> {
    let session_id = read_u32(stream)?;
    let command_word = read_u16(stream)?;
    let (flags, command) = decompose_command_word(command_word);

    let reply_header_word = command_word;
    let result = dispatch(state, session_id, flags, command, stream);

    match result {
        Ok(ReplyBody::EmptySuccess) => {
            write_header(stream, session_id, reply_header_word)?;
            write_err(stream, crate::error::SUCCESS)?;
        }
        Ok(ReplyBody::Data(data)) => {
            write_header(stream, session_id, reply_header_word)?;
            write_err(stream, crate::error::SUCCESS)?;
            write_data_frame(stream, &data)?;
        }
        Ok(ReplyBody::SessionId(id)) => {
            write_header(stream, id, reply_header_word)?;
        }
        Err(app_err) => {
            if app_err.should_log() {
                tracing::error!(error = %app_err, "request failed");
            }
            match app_err.to_wire_code() {
                Some(code) => {
                    write_header(stream, session_id, reply_header_word)?;
                    write_err(stream, code)?;
                }
                // No wire representation (the connection itself is the
                // problem, e.g. a dropped socket mid-request): propagate as
                // a connection-level error instead of attempting a reply.
                // The caller tears the connection down without panicking,
                // so the worker thread returns to serving new connections.
                None => return Err(app_err),
            }
        }
    }
    Ok(())
}

enum ReplyBody {
    EmptySuccess,
    Data(Vec<u8>),
    SessionId(u32),
}

fn dispatch(
    state: &ServerState,
    session_id: u32,
    flags: u16,
    command: u16,
    stream: &mut impl Read,
) -> CustodianResult<ReplyBody> {
    match command {
        CMD_GET_SESSION_ID => Ok(ReplyBody::SessionId(state.sessions.create_session())),

        CMD_CREATE_ACCOUNT => {
            let username = read_string(stream, LOGIN_FIELD_MAX)?;
            let email = read_string(stream, LOGIN_FIELD_MAX)?;
            let password = read_string(stream, LOGIN_FIELD_MAX)?;
            state.accounts.create_account(&username, &email, &password)?;
            Ok(ReplyBody::EmptySuccess)
        }

        CMD_LOGIN => {
            let username = read_string(stream, LOGIN_FIELD_MAX)?;
            let password = read_string(stream, LOGIN_FIELD_MAX)?;
            let info = state.accounts.login(&username, &password)?;
            state
                .sessions
                .get_session(session_id)
                .ok_or(ServerError::NoSession)?;
            state.sessions.replace_uid(session_id, info.uid);
            Ok(ReplyBody::EmptySuccess)
        }

        CMD_GET => {
            // Flags select the resource type the client expects back; the
            // server does not gate the read on it, only validates that it
            // names a known type (an unknown flag is a malformed command).
            DataType::from_resource_flag(flags as u8)?;
            let path = read_string(stream, PATH_MAX)?;
            let offset = read_u64(stream)?;
            let ctx = request_context(state, session_id, PermsRequested::Read)?;

            let declared_size = state
                .access
                .item_data_size(&state.default_db, &path, &ctx)?;
            let remaining = declared_size.saturating_sub(offset).min(DATA_MAX as u64);
            let mut buf = vec![0u8; remaining as usize];
            let n = state
                .access
                .get_item_data(&state.default_db, &path, &ctx, offset, &mut buf)?;
            buf.truncate(n);
            Ok(ReplyBody::Data(buf))
        }

        CMD_POST => {
            let mut perm_byte = [0u8; 1];
            stream.read_exact(&mut perm_byte)?;
            let perm = match perm_byte[0] {
                0 => Permission::Private,
                1 => Permission::Unlisted,
                2 => Permission::Public,
                _ => return Err(ServerError::CommandFormat),
            };
            let path = read_string(stream, PATH_MAX)?;
            let data = read_bytes(stream, DATA_MAX)?;
            let data_type = DataType::from_resource_flag(flags as u8)?;
            let ctx = request_context(state, session_id, PermsRequested::Write)?;
            let owner = ctx.uid.clone();
            state
                .access
                .replace_item(&state.default_db, &path, &ctx, owner, perm, data_type, data)?;
            Ok(ReplyBody::EmptySuccess)
        }

        _ => Err(ServerError::CommandFormat),
    }
}

fn request_context(
    state: &ServerState,
    session_id: u32,
    wants: PermsRequested,
) -> CustodianResult<RequestContext> {
    let uid = state
        .sessions
        .get_session(session_id)
        .and_then(|s| s.uid);
    Ok(RequestContext {
        uid,
        perms_requested: wants,
        is_admin: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_word_round_trips() {
        let word = compose_command_word(0x05, CMD_GET);
        let (flags, command) = decompose_command_word(word);
        assert_eq!(flags, 0x05);
        assert_eq!(command, CMD_GET);
    }

    #[test]
    fn oversized_login_field_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&200u16.to_be_bytes());
        data.extend_from_slice(&vec![b'x'; 200]);
        let mut cursor = std::io::Cursor::new(data);
        let err = read_string(&mut cursor, LOGIN_FIELD_MAX).unwrap_err();
        assert!(matches!(err, ServerError::CommandFormat));
    }

    #[test]
    fn empty_required_field_rejected() {
        let data = 0u16.to_be_bytes().to_vec();
        let mut cursor = std::io::Cursor::new(data);
        let err = read_string(&mut cursor, LOGIN_FIELD_MAX).unwrap_err();
        assert!(matches!(err, ServerError::CommandFormat));
    }
}
