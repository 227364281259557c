//! 传输监听端 (接收方)
//!
//! 每个入站连接在独立任务中处理：
//! 1. 读取并校验请求头
//! 2. 通过 [`InboundCallback::on_request`] 登记为挂起请求，等待本地决定
//! 3. 收到接受决定后写入 `ACCEPT`，再按块读取正好 `size` 字节
//!
//! 本地拒绝、等待超时、对端提前关闭时写入 `REJECT` (尽力而为) 并关闭连接。

use log::{debug, error, info, warn};

use crate::config::default_download_dir;
use crate::transfer::protocol::{ACCEPT_TOKEN, CHUNK_SIZE, REJECT_TOKEN, read_header};
use crate::transfer::storage::IncomingFile;
use crate::transfer::TransferError;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// 已解析、等待本地决定的入站请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    /// 监听端内唯一的连接序号
    pub id: u64,
    pub filename: String,
    pub size: u64,
    pub peer: SocketAddr,
}

/// 本地对挂起请求的决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// 入站事件回调
pub trait InboundCallback: Send + Sync + 'static {
    /// 收到合法请求
    ///
    /// 实现方保存 `decision` 作为挂起请求的连接句柄；返回 `false` 表示已有挂起或
    /// 进行中的请求，连接会被拒绝。
    fn on_request(&self, request: &InboundRequest, decision: oneshot::Sender<Decision>) -> bool;

    /// 请求在接受之前失效 (本地拒绝、超时或对端关闭)
    fn on_withdrawn(&self, request: &InboundRequest);

    /// 接收完成
    fn on_complete(&self, request: &InboundRequest, path: &Path);

    /// 接受之后的接收失败
    fn on_error(&self, request: &InboundRequest, error: &TransferError);
}

#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// 接收文件的保存目录
    pub download_dir: PathBuf,
    /// 等待本地手势的最长时间
    pub accept_timeout: Duration,
    /// 读请求头和每次读文件内容的超时
    pub io_timeout: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            accept_timeout: Duration::from_secs(60),
            io_timeout: Duration::from_secs(30),
        }
    }
}

pub struct TransferListener {
    listener: TcpListener,
    options: Arc<ReceiveOptions>,
}

impl TransferListener {
    pub async fn bind(addr: SocketAddr, options: ReceiveOptions) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            options: Arc::new(options),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 接受连接直到被取消，每个连接一个任务
    pub async fn run<C: InboundCallback>(
        self,
        callback: Arc<C>,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) {
        match self.local_addr() {
            Ok(addr) => info!("Transfer listener on {}", addr),
            Err(e) => warn!("Transfer socket has no local address: {}", e),
        }

        let mut next_id: u64 = 0;
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.listener.accept() => r,
            };

            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            };

            next_id += 1;
            let id = next_id;
            let callback = callback.clone();
            let options = self.options.clone();
            let cancel = cancel.clone();

            tracker.spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => debug!("Connection {} from {} cancelled", id, peer),
                    result = handle_connection(stream, peer, id, callback, options) => {
                        if let Err(e) = result {
                            warn!("Inbound transfer {} from {} failed: {}", id, peer, e);
                        }
                    }
                }
            });
        }

        debug!("Transfer listener stopped");
    }
}

async fn handle_connection<C: InboundCallback>(
    mut stream: TcpStream,
    peer: SocketAddr,
    id: u64,
    callback: Arc<C>,
    options: Arc<ReceiveOptions>,
) -> Result<(), TransferError> {
    let header = timeout(options.io_timeout, read_header(&mut stream))
        .await
        .map_err(|_| TransferError::Timeout("reading request header"))??;

    let request = InboundRequest {
        id,
        filename: header.filename,
        size: header.size,
        peer,
    };
    info!(
        "Transfer request {} from {}: {} ({} bytes)",
        id, peer, request.filename, request.size
    );

    let (tx, rx) = oneshot::channel();
    if !callback.on_request(&request, tx) {
        send_reject(&mut stream).await;
        return Err(TransferError::Busy);
    }

    match wait_for_decision(&mut stream, rx, options.accept_timeout).await {
        Ok(Decision::Accept) => {}
        Ok(Decision::Reject) => {
            info!("Transfer request {} rejected locally", id);
            callback.on_withdrawn(&request);
            send_reject(&mut stream).await;
            return Ok(());
        }
        Err(e) => {
            callback.on_withdrawn(&request);
            send_reject(&mut stream).await;
            return Err(e);
        }
    }

    match accept_and_receive(&mut stream, &request, &options).await {
        Ok(path) => {
            info!("File received successfully: {:?}", path);
            callback.on_complete(&request, &path);
            Ok(())
        }
        Err(e) => {
            error!("Error receiving file {}: {}", request.filename, e);
            callback.on_error(&request, &e);
            Err(e)
        }
    }
}

/// 等待本地决定，同时监视对端
///
/// 发送方在收到 `ACCEPT` 之前不应发送任何数据，因此连接可读只可能是关闭或违规。
async fn wait_for_decision(
    stream: &mut TcpStream,
    decision: oneshot::Receiver<Decision>,
    accept_timeout: Duration,
) -> Result<Decision, TransferError> {
    let mut probe = [0u8; 1];
    tokio::select! {
        d = decision => Ok(d.unwrap_or(Decision::Reject)),
        r = stream.read(&mut probe) => match r {
            Ok(0) => Err(TransferError::Protocol("sender closed before a decision".to_string())),
            Ok(_) => Err(TransferError::Protocol("sender sent data before acceptance".to_string())),
            Err(e) => Err(e.into()),
        },
        _ = tokio::time::sleep(accept_timeout) => Err(TransferError::Timeout("waiting for local accept")),
    }
}

async fn accept_and_receive(
    stream: &mut TcpStream,
    request: &InboundRequest,
    options: &ReceiveOptions,
) -> Result<PathBuf, TransferError> {
    stream.write_all(ACCEPT_TOKEN).await?;
    stream.flush().await?;
    receive_body(stream, request, options).await
}

async fn send_reject(stream: &mut TcpStream) {
    if let Err(e) = stream.write_all(REJECT_TOKEN).await {
        debug!("Could not send reject token: {}", e);
    }
    let _ = stream.shutdown().await;
}

/// 读取正好 `request.size` 字节到接收文件
async fn receive_body<R>(
    reader: &mut R,
    request: &InboundRequest,
    options: &ReceiveOptions,
) -> Result<PathBuf, TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut file = IncomingFile::create(&options.download_dir, &request.filename).await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = request.size;

    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(CHUNK_SIZE, |r| r.min(CHUNK_SIZE));
        let n = match timeout(options.io_timeout, reader.read(&mut buf[..want])).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!("Connection lost after {} bytes: {}", file.written(), e);
                return Err(file.keep_partial(request.size).await);
            }
            Err(_) => {
                warn!("Timed out after {} bytes", file.written());
                return Err(file.keep_partial(request.size).await);
            }
        };

        if n == 0 {
            debug!("Sender closed after {} bytes", file.written());
            return Err(file.keep_partial(request.size).await);
        }

        file.write_chunk(&buf[..n]).await?;
        remaining -= n as u64;
    }

    file.finish().await
}
