//! 传输协议线上格式
//!
//! ```text
//! 发送方                                   接收方
//!   | -- u32 BE 长度 + JSON {filename,size} -> |
//!   |                                          | (等待本地松开手势)
//!   | <--------- "ACCEPT" / "REJECT" --------- |
//!   | -------- size 字节原始文件内容 --------> |  (仅 ACCEPT 之后)
//! ```

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::transfer::TransferError;

/// 接受令牌
pub const ACCEPT_TOKEN: &[u8; TOKEN_LEN] = b"ACCEPT";
/// 拒绝令牌，之后关闭连接
pub const REJECT_TOKEN: &[u8; TOKEN_LEN] = b"REJECT";
pub const TOKEN_LEN: usize = 6;

/// 读写文件内容时的块大小
pub const CHUNK_SIZE: usize = 8 * 1024;

/// 请求头 JSON 的最大长度
pub const MAX_HEADER_LEN: u32 = 64 * 1024;

/// 传输请求头
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferHeader {
    pub filename: String,
    pub size: u64,
}

/// 应答解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Accept,
    Reject,
    Unknown,
}

impl Response {
    pub fn parse(bytes: &[u8]) -> Self {
        if bytes == ACCEPT_TOKEN {
            Response::Accept
        } else if bytes == REJECT_TOKEN {
            Response::Reject
        } else {
            Response::Unknown
        }
    }
}

impl TransferHeader {
    pub fn new(filename: impl Into<String>, size: u64) -> Self {
        Self {
            filename: filename.into(),
            size,
        }
    }

    /// 文件名必须是不含目录的单个名称
    pub fn validate(&self) -> Result<(), TransferError> {
        if is_bare_filename(&self.filename) {
            Ok(())
        } else {
            Err(TransferError::Protocol(format!(
                "invalid filename {:?}",
                self.filename
            )))
        }
    }

    /// 编码为 长度前缀 + JSON
    pub fn encode(&self) -> Result<Vec<u8>, TransferError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| TransferError::Protocol(format!("cannot encode header: {}", e)))?;
        let len = u32::try_from(json.len())
            .ok()
            .filter(|len| *len <= MAX_HEADER_LEN)
            .ok_or_else(|| TransferError::Protocol("header too large".to_string()))?;

        let mut frame = Vec::with_capacity(4 + json.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&json);
        Ok(frame)
    }
}

pub fn is_bare_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

pub async fn write_header<W>(writer: &mut W, header: &TransferHeader) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    let frame = header.encode()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// 读取并校验请求头
pub async fn read_header<R>(reader: &mut R) -> Result<TransferHeader, TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    read_exact_or_protocol(reader, &mut len_buf, "header length").await?;
    let len = u32::from_be_bytes(len_buf);

    if len == 0 || len > MAX_HEADER_LEN {
        return Err(TransferError::Protocol(format!(
            "header length {} out of range",
            len
        )));
    }

    let mut json = vec![0u8; len as usize];
    read_exact_or_protocol(reader, &mut json, "header body").await?;

    let header: TransferHeader = serde_json::from_slice(&json)
        .map_err(|e| TransferError::Protocol(format!("malformed header: {}", e)))?;
    header.validate()?;
    Ok(header)
}

async fn read_exact_or_protocol<R>(
    reader: &mut R,
    buf: &mut [u8],
    what: &str,
) -> Result<(), TransferError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(TransferError::Protocol(
            format!("connection closed while reading {}", what),
        )),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_header_frame_layout() {
        let header = TransferHeader::new("photo.jpg", 2048);
        let frame = header.encode().unwrap();

        let json = br#"{"filename":"photo.jpg","size":2048}"#;
        assert_eq!(&frame[..4], &(json.len() as u32).to_be_bytes());
        assert_eq!(&frame[4..], json);

        let parsed = read_header(&mut &frame[..]).await.unwrap();
        assert_eq!(parsed, header);
    }

    #[tokio::test]
    async fn test_negative_size_is_protocol_violation() {
        let json = br#"{"filename":"a.bin","size":-1}"#;
        let mut frame = (json.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(json);

        assert!(matches!(
            read_header(&mut &frame[..]).await,
            Err(TransferError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_prefix() {
        let frame = (MAX_HEADER_LEN + 1).to_be_bytes();
        assert!(matches!(
            read_header(&mut &frame[..]).await,
            Err(TransferError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_header() {
        let frame = [0u8, 0, 0, 40, b'{'];
        assert!(matches!(
            read_header(&mut &frame[..]).await,
            Err(TransferError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        for name in ["../etc/passwd", "dir/file", "..", "", "a\\b"] {
            let json = serde_json::to_vec(&serde_json::json!({"filename": name, "size": 1})).unwrap();
            let mut frame = (json.len() as u32).to_be_bytes().to_vec();
            frame.extend_from_slice(&json);
            assert!(
                matches!(read_header(&mut &frame[..]).await, Err(TransferError::Protocol(_))),
                "accepted {:?}",
                name
            );
        }
    }

    #[test]
    fn test_response_parse() {
        assert_eq!(Response::parse(b"ACCEPT"), Response::Accept);
        assert_eq!(Response::parse(b"REJECT"), Response::Reject);
        assert_eq!(Response::parse(b"accept"), Response::Unknown);
        assert_eq!(Response::parse(b"ACC"), Response::Unknown);
    }
}
