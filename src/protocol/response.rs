//! Response frame assembly and chunked serialization.

use byteorder::{BigEndian, WriteBytesExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::digest::Digest;
use crate::protocol::{ResultCode, MAX_FILE_SIZE, MAX_MSG_SIZE};

#[derive(Debug)]
pub struct ResponseContent {
    pub digest: Digest,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct ResponseFrame {
    pub result_code: ResultCode,
    pub session_id: u32,
    pub message: String,
    pub content: Option<ResponseContent>,
}

impl ResponseFrame {
    pub fn success(session_id: u32, content: Option<ResponseContent>) -> Self {
        ResponseFrame {
            result_code: ResultCode::Success,
            session_id,
            message: ResultCode::Success.message().to_string(),
            content,
        }
    }

    pub fn error(result_code: ResultCode, session_id: u32) -> Self {
        ResponseFrame {
            message: result_code.message().to_string(),
            result_code,
            session_id,
            content: None,
        }
    }

    /// Encodes the header + message portion (everything before any file content).
    fn encode_header(&self) -> Vec<u8> {
        let message_bytes = self.message.as_bytes();
        let content_len = self
            .content
            .as_ref()
            .map(|c| crate::digest::DIGEST_LEN + c.bytes.len())
            .unwrap_or(0);
        let payload_len = 1 + message_bytes.len() as u64 + content_len as u64;

        let mut buf = Vec::new();
        buf.write_u8(self.result_code as u8).unwrap();
        buf.write_u8(0).unwrap();
        buf.write_u32::<BigEndian>(self.session_id).unwrap();
        buf.write_u64::<BigEndian>(payload_len).unwrap();
        buf.write_u8(message_bytes.len() as u8).unwrap();
        buf.extend_from_slice(message_bytes);
        buf
    }

    /// Writes the full frame to `writer`, chunking the header+message segment
    /// to at most [`MAX_MSG_SIZE`] bytes per write and any file content to at
    /// most [`MAX_FILE_SIZE`] bytes per write.
    pub async fn write_to(&self, writer: &mut (impl AsyncWrite + Unpin)) -> std::io::Result<()> {
        let header = self.encode_header();
        write_chunked(writer, &header, MAX_MSG_SIZE).await?;

        if let Some(content) = &self.content {
            let mut body = Vec::with_capacity(crate::digest::DIGEST_LEN + content.bytes.len());
            body.extend_from_slice(content.digest.as_bytes());
            body.extend_from_slice(&content.bytes);
            write_chunked(writer, &body, MAX_FILE_SIZE).await?;
        }
        writer.flush().await?;
        Ok(())
    }
}

async fn write_chunked(
    writer: &mut (impl AsyncWrite + Unpin),
    data: &[u8],
    chunk_size: usize,
) -> std::io::Result<()> {
    for chunk in data.chunks(chunk_size.max(1)) {
        writer.write_all(chunk).await?;
    }
    Ok(())
}
