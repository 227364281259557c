//! 文件传输模块
//!
//! 包含:
//! - 请求头与应答令牌的线上格式
//! - 传输监听端 (接收方 TCP 服务器)
//! - 传输发起端 (发送方 TCP 客户端)
//! - 接收文件的落盘 (临时文件 + 完成后重命名)

pub mod initiator;
pub mod listener;
pub mod protocol;
pub mod storage;

pub use initiator::{SendOptions, send_file};
pub use listener::{Decision, InboundCallback, InboundRequest, ReceiveOptions, TransferListener};
pub use protocol::{ACCEPT_TOKEN, REJECT_TOKEN, TransferHeader};

use std::io;
use std::path::{Path, PathBuf};

/// 默认传输端口
pub const DEFAULT_TRANSFER_PORT: u16 = 12345;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Transfer rejected by receiver")]
    Rejected,

    #[error("Another transfer is already pending")]
    Busy,

    #[error("Partial transfer: received {received} of {expected} bytes, kept at {}", path.display())]
    Partial {
        received: u64,
        expected: u64,
        path: PathBuf,
    },

    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Timed out while {0}")]
    Timeout(&'static str),
}

impl TransferError {
    pub(crate) fn filesystem(path: &Path, source: io::Error) -> Self {
        TransferError::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// 用户选择的待发送文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub path: PathBuf,
    pub size: u64,
}

impl SelectedFile {
    /// 读取文件元数据，路径必须指向普通文件
    pub async fn inspect(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| TransferError::filesystem(path, e))?;

        if !metadata.is_file() {
            return Err(TransferError::filesystem(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
        })
    }

    /// 发送时使用的文件名 (不含目录)
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inspect_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        tokio::fs::write(&path, b"abc").await.unwrap();

        let selected = SelectedFile::inspect(&path).await.unwrap();
        assert_eq!(selected.size, 3);
        assert_eq!(selected.file_name(), "notes.txt");
    }

    #[tokio::test]
    async fn test_inspect_rejects_directory_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SelectedFile::inspect(dir.path()).await,
            Err(TransferError::Filesystem { .. })
        ));
        assert!(matches!(
            SelectedFile::inspect(dir.path().join("missing")).await,
            Err(TransferError::Filesystem { .. })
        ));
    }
}
