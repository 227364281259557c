//! 接收文件落盘
//!
//! 内容先写入同目录下的 `.<name>.part`，收满声明的字节数后才重命名为最终文件名。
//! 中断的传输会保留 `.part` 文件，其内容恰好是已收到的字节。
//! 同名文件已存在时不会覆盖，而是改用 `name (1).ext`、`name (2).ext` ……

use log::debug;

use crate::transfer::TransferError;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

pub struct IncomingFile {
    file: File,
    part_path: PathBuf,
    final_path: PathBuf,
    written: u64,
}

impl IncomingFile {
    /// 在 `dir` 下为 `filename` 准备一个新的接收文件
    pub async fn create(dir: &Path, filename: &str) -> Result<Self, TransferError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| TransferError::filesystem(dir, e))?;

        let final_path = unique_destination(dir, filename).await?;
        let part_path = part_path_for(&final_path);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&part_path)
            .await
            .map_err(|e| TransferError::filesystem(&part_path, e))?;

        debug!("Receiving into {:?}", part_path);

        Ok(Self {
            file,
            part_path,
            final_path,
            written: 0,
        })
    }

    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.file
            .write_all(data)
            .await
            .map_err(|e| TransferError::filesystem(&self.part_path, e))?;
        self.written += data.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// 完成接收，重命名为最终文件名
    pub async fn finish(mut self) -> Result<PathBuf, TransferError> {
        self.flush().await?;
        drop(self.file);

        tokio::fs::rename(&self.part_path, &self.final_path)
            .await
            .map_err(|e| TransferError::filesystem(&self.final_path, e))?;
        Ok(self.final_path)
    }

    /// 放弃接收，保留已写入的部分，返回 `Partial` 错误
    pub async fn keep_partial(mut self, expected: u64) -> TransferError {
        if let Err(e) = self.flush().await {
            return e;
        }
        TransferError::Partial {
            received: self.written,
            expected,
            path: self.part_path,
        }
    }

    async fn flush(&mut self) -> Result<(), TransferError> {
        self.file
            .flush()
            .await
            .map_err(|e| TransferError::filesystem(&self.part_path, e))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| TransferError::filesystem(&self.part_path, e))
    }
}

fn part_path_for(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    final_path.with_file_name(format!(".{}.part", name))
}

/// 找到目录中尚未被占用的文件名
pub async fn unique_destination(dir: &Path, filename: &str) -> Result<PathBuf, TransferError> {
    let candidate = dir.join(filename);
    if !exists(&candidate).await? {
        return Ok(candidate);
    }

    let as_path = Path::new(filename);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());
    let extension = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{} ({}){}", stem, n, extension));
        if !exists(&candidate).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}

async fn exists(path: &Path) -> Result<bool, TransferError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| TransferError::filesystem(path, e))
}
