//! Shared fixture for end-to-end scenario tests: a real home directory under
//! a `TempDir`, a live `CredentialStore`, and a byte-level request/response
//! exchange driven over an in-memory duplex stream so the tests cross the
//! actual wire codec, not just the dispatcher's typed API.

use byteorder::{BigEndian, WriteBytesExt};
use cape::credentials::CredentialStore;
use cape::dispatch::dispatch;
use cape::sandbox::Home;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub struct Fixture {
    pub _dir: TempDir,
    pub home: Home,
    pub store: CredentialStore,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let home = Home::new(dir.path()).await.unwrap();
        let store = CredentialStore::load(dir.path()).await.unwrap();
        Fixture {
            _dir: dir,
            home,
            store,
        }
    }

    /// Sends raw request bytes through the real codec + dispatcher and
    /// returns the raw response bytes, exactly as a client would see them.
    pub async fn exchange(&self, request_bytes: Vec<u8>) -> DecodedResponse {
        let (mut client, mut server) = tokio::io::duplex(16 * 1024);
        client.write_all(&request_bytes).await.unwrap();
        client.flush().await.unwrap();

        let request = cape::protocol::request::parse(&mut server).await.unwrap();
        let response = dispatch(&self.store, &self.home, request).await;
        response.write_to(&mut server).await.unwrap();
        drop(server);

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        DecodedResponse::decode(&buf)
    }
}

pub struct DecodedResponse {
    pub result_code: u8,
    pub session_id: u32,
    pub message: String,
    pub content: Option<Vec<u8>>,
}

impl DecodedResponse {
    pub fn decode(buf: &[u8]) -> Self {
        let result_code = buf[0];
        let session_id = u32::from_be_bytes(buf[2..6].try_into().unwrap());
        let message_len = buf[14] as usize;
        let message = String::from_utf8(buf[15..15 + message_len].to_vec()).unwrap();
        let rest = &buf[15 + message_len..];
        let content = if rest.len() > 32 {
            Some(rest[32..].to_vec())
        } else {
            None
        };
        DecodedResponse {
            result_code,
            session_id,
            message,
            content,
        }
    }
}

fn encode_header(
    opcode: u8,
    username: &str,
    password: &str,
    session_id: u32,
    payload: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u8(opcode).unwrap();
    buf.write_u8(0).unwrap();
    buf.write_u16::<BigEndian>(0).unwrap();
    buf.write_u16::<BigEndian>(username.len() as u16).unwrap();
    buf.write_u16::<BigEndian>(password.len() as u16).unwrap();
    buf.write_u32::<BigEndian>(session_id).unwrap();
    buf.extend_from_slice(username.as_bytes());
    buf.extend_from_slice(password.as_bytes());
    buf.write_u64::<BigEndian>(payload.len() as u64).unwrap();
    buf.extend_from_slice(payload);
    buf
}

pub fn local_operation(username: &str, password: &str, session_id: u32) -> Vec<u8> {
    encode_header(7, username, password, session_id, &[])
}

pub fn std_request(opcode: u8, username: &str, password: &str, path: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.write_u16::<BigEndian>(path.len() as u16).unwrap();
    payload.extend_from_slice(path.as_bytes());
    encode_header(opcode, username, password, 0, &payload)
}

pub fn put_request(username: &str, password: &str, path: &str, body: &[u8]) -> Vec<u8> {
    let digest = cape::digest::Digest::sha256(body);
    let mut payload = Vec::new();
    payload.write_u16::<BigEndian>(path.len() as u16).unwrap();
    payload.extend_from_slice(path.as_bytes());
    payload.extend_from_slice(digest.as_bytes());
    payload.extend_from_slice(body);
    encode_header(6, username, password, 0, &payload)
}

pub fn create_user_request(
    admin_user: &str,
    admin_pass: &str,
    new_user: &str,
    new_pass: &str,
    permission: u8,
) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.write_u8(1).unwrap(); // subflag CREATE
    payload.write_u8(permission).unwrap();
    payload
        .write_u16::<BigEndian>(new_user.len() as u16)
        .unwrap();
    payload.extend_from_slice(new_user.as_bytes());
    payload
        .write_u16::<BigEndian>(new_pass.len() as u16)
        .unwrap();
    payload.extend_from_slice(new_pass.as_bytes());
    encode_header(1, admin_user, admin_pass, 0, &payload)
}
