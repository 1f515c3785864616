//! Request frame parsing. Every multi-byte field on the wire is big-endian;
//! reads are bounded to the exact byte count the header declares.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::digest::Digest;
use crate::protocol::{Opcode, Permission};

pub const MAX_USERNAME_LEN: u16 = 20;
pub const MAX_PASSWORD_LEN: u16 = 32;
pub const MAX_PATH_LEN: u16 = 4096;
pub const MAX_PAYLOAD_LEN: u64 = 64 * 1024 * 1024;

#[derive(Debug)]
pub enum ParseError {
    ConnectionClosed,
    Io(std::io::Error),
    Malformed(&'static str),
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ParseError::ConnectionClosed
        } else {
            ParseError::Io(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, ParseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSubflag {
    Create = 1,
    Delete = 2,
}

impl UserSubflag {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(UserSubflag::Create),
            2 => Ok(UserSubflag::Delete),
            _ => Err(ParseError::Malformed("unknown user subflag")),
        }
    }
}

#[derive(Debug)]
pub struct StdPayload {
    pub path: String,
    /// Present when the request carries a file body (PUT): the declared
    /// content digest plus the raw bytes.
    pub content: Option<(Digest, Vec<u8>)>,
}

#[derive(Debug)]
pub struct UserPayload {
    pub subflag: UserSubflag,
    pub permission: Permission,
    pub username: String,
    /// Present only for `Create`.
    pub password: Option<String>,
}

#[derive(Debug)]
pub enum Payload {
    None,
    Std(StdPayload),
    User(UserPayload),
}

#[derive(Debug)]
pub struct RequestFrame {
    pub opcode: Opcode,
    pub session_id: u32,
    pub username: String,
    pub password: String,
    pub payload: Payload,
}

async fn read_string(reader: &mut (impl AsyncRead + Unpin), len: u16) -> Result<String> {
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| ParseError::Malformed("field is not valid utf-8"))
}

/// Parses one [`RequestFrame`] from `reader`. Callers apply their own
/// inactivity timeout around this call (see `server.rs`).
pub async fn parse(reader: &mut (impl AsyncRead + Unpin)) -> Result<RequestFrame> {
    let opcode_raw = reader.read_u8().await?;
    let opcode: Opcode = num_traits::FromPrimitive::from_u8(opcode_raw)
        .ok_or(ParseError::Malformed("unknown opcode"))?;
    let user_flag = reader.read_u8().await?;
    let mut reserved = [0u8; 2];
    reader.read_exact(&mut reserved).await?;

    let username_len = reader.read_u16().await?;
    let password_len = reader.read_u16().await?;
    if username_len > MAX_USERNAME_LEN || password_len > MAX_PASSWORD_LEN {
        return Err(ParseError::Malformed("username/password length out of range"));
    }
    let session_id = reader.read_u32().await?;
    let username = read_string(reader, username_len).await?;
    let password = read_string(reader, password_len).await?;
    let payload_len = reader.read_u64().await?;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ParseError::Malformed("payload_len exceeds maximum"));
    }

    let payload = match opcode {
        Opcode::LocalOperation => Payload::None,
        Opcode::UserOperation => {
            let _ = user_flag; // reserved for non-user ops; unused on this branch
            let subflag = UserSubflag::from_u8(reader.read_u8().await?)?;
            let permission_raw = reader.read_u8().await?;
            let permission = num_traits::FromPrimitive::from_u8(permission_raw)
                .ok_or(ParseError::Malformed("unknown permission"))?;
            let inner_username_len = reader.read_u16().await?;
            if inner_username_len > MAX_USERNAME_LEN {
                return Err(ParseError::Malformed("inner username length out of range"));
            }
            let inner_username = read_string(reader, inner_username_len).await?;
            let consumed = 2 + 2 + inner_username_len as u64;
            let password = if payload_len > consumed {
                let inner_password_len = reader.read_u16().await?;
                if inner_password_len > MAX_PASSWORD_LEN {
                    return Err(ParseError::Malformed("inner password length out of range"));
                }
                Some(read_string(reader, inner_password_len).await?)
            } else {
                None
            };
            Payload::User(UserPayload {
                subflag,
                permission,
                username: inner_username,
                password,
            })
        }
        _ => {
            let path_len = reader.read_u16().await?;
            if path_len > MAX_PATH_LEN || path_len as u64 > payload_len {
                return Err(ParseError::Malformed("path length out of range"));
            }
            let path = read_string(reader, path_len).await?;
            let remaining = payload_len - path_len as u64;
            let content = if remaining >= crate::digest::DIGEST_LEN as u64 {
                let mut digest_bytes = [0u8; 32];
                reader.read_exact(&mut digest_bytes).await?;
                let digest = Digest::from_bytes(digest_bytes);
                let body_len = remaining - crate::digest::DIGEST_LEN as u64;
                let mut body = vec![0u8; body_len as usize];
                reader.read_exact(&mut body).await?;
                Some((digest, body))
            } else {
                None
            };
            Payload::Std(StdPayload { path, content })
        }
    };

    Ok(RequestFrame {
        opcode,
        session_id,
        username,
        password,
        payload,
    })
}
