//! 传输发起端 (发送方)

use log::{debug, info};

use crate::transfer::protocol::{CHUNK_SIZE, Response, TOKEN_LEN, TransferHeader, write_header};
use crate::transfer::{SelectedFile, TransferError};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub connect_timeout: Duration,
    /// 等待对方手势应答的最长时间
    pub response_timeout: Duration,
    /// 每次写入文件内容的超时
    pub io_timeout: Duration,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(120),
            io_timeout: Duration::from_secs(30),
        }
    }
}

/// 向 `target` 发送文件，返回发送的字节数
///
/// 只有收到 `ACCEPT` 之后才会发送文件内容。
pub async fn send_file(
    target: SocketAddr,
    file: &SelectedFile,
    options: &SendOptions,
) -> Result<u64, TransferError> {
    let mut source = tokio::fs::File::open(&file.path)
        .await
        .map_err(|e| TransferError::filesystem(&file.path, e))?;
    let header = TransferHeader::new(file.file_name(), file.size);
    header.validate()?;

    info!("Connecting to {} to send {}", target, header.filename);
    let mut stream = timeout(options.connect_timeout, TcpStream::connect(target))
        .await
        .map_err(|_| TransferError::Timeout("connecting to receiver"))??;

    write_header(&mut stream, &header).await?;
    debug!("Request sent, waiting for receiver gesture");

    let mut token = [0u8; TOKEN_LEN];
    let read = timeout(options.response_timeout, stream.read_exact(&mut token))
        .await
        .map_err(|_| TransferError::Timeout("waiting for receiver response"))?;
    match read {
        Ok(_) => {}
        // 未应答就关闭连接视为拒绝
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(TransferError::Rejected);
        }
        Err(e) => return Err(e.into()),
    }

    match Response::parse(&token) {
        Response::Accept => {}
        Response::Reject | Response::Unknown => {
            info!("Receiver at {} declined {}", target, header.filename);
            return Err(TransferError::Rejected);
        }
    }

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;
    loop {
        let n = source
            .read(&mut buf)
            .await
            .map_err(|e| TransferError::filesystem(&file.path, e))?;
        if n == 0 {
            break;
        }
        timeout(options.io_timeout, stream.write_all(&buf[..n]))
            .await
            .map_err(|_| TransferError::Timeout("sending file body"))??;
        sent += n as u64;
    }

    if sent != file.size {
        return Err(TransferError::Protocol(format!(
            "file changed during transfer: declared {} bytes, read {}",
            file.size, sent
        )));
    }

    stream.flush().await?;
    stream.shutdown().await?;
    info!("File sent successfully: {} ({} bytes)", header.filename, sent);
    Ok(sent)
}
