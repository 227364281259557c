//! IPC Server - Unix Domain Socket 通信

use anyhow::Result;
use grabsend_core::ipc::{IpcRequest, IpcResponse, PeerInfo, PendingInfo, socket_path};
use grabsend_core::{JsonLinesSource, Node, NodeEvent};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

pub async fn run_ipc_server(node: Arc<Node>) -> Result<()> {
    let path = socket_path();

    // 删除旧的 socket 文件
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)?;
    tracing::info!("IPC server listening on {:?}", path);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let node = node.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, node).await {
                        tracing::debug!("IPC client error: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("Failed to accept IPC connection: {}", e);
            }
        }
    }
}

async fn handle_client(stream: UnixStream, node: Arc<Node>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let request: IpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let resp = IpcResponse::Error {
                    message: format!("Invalid request: {}", e),
                };
                write_response(&mut writer, &resp).await?;
                line.clear();
                continue;
            }
        };
        line.clear();

        tracing::debug!("Received request: {:?}", request);

        if let IpcRequest::Watch = request {
            return stream_events(&mut writer, node.subscribe()).await;
        }

        let response = handle_request(&node, request).await;
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

pub(crate) async fn handle_request(node: &Node, request: IpcRequest) -> IpcResponse {
    match request {
        IpcRequest::Select { path } => match node.select_file(&path).await {
            Ok(selected) => IpcResponse::Ok {
                message: format!("Selected {} ({} bytes)", selected.file_name(), selected.size),
            },
            Err(e) => IpcResponse::Error {
                message: e.to_string(),
            },
        },
        IpcRequest::ClearSelection => {
            node.clear_selection();
            IpcResponse::Ok {
                message: "Selection cleared".to_string(),
            }
        }
        IpcRequest::StartCapture { source } => {
            let Some(path) = source
                .map(std::path::PathBuf::from)
                .or_else(|| node.settings().landmark_source.clone())
            else {
                return IpcResponse::Error {
                    message: "No landmark source given or configured".to_string(),
                };
            };
            match JsonLinesSource::open(&path).await {
                Ok(source) => {
                    tracing::info!("Capturing landmarks from {:?}", path);
                    node.start_capture(source);
                    IpcResponse::Ok {
                        message: format!("Capturing from {}", path.display()),
                    }
                }
                Err(e) => IpcResponse::Error {
                    message: format!("Cannot open {}: {}", path.display(), e),
                },
            }
        }
        IpcRequest::StopCapture => {
            let message = if node.stop_capture() {
                "Capture stopped"
            } else {
                "Capture was not running"
            };
            IpcResponse::Ok {
                message: message.to_string(),
            }
        }
        IpcRequest::Peers => {
            let now = Instant::now();
            let peers = node
                .refresh_peers()
                .into_iter()
                .map(|p| PeerInfo {
                    name: p.display_name,
                    address: p.address.to_string(),
                    last_seen_secs: now.saturating_duration_since(p.last_seen).as_secs(),
                })
                .collect();
            IpcResponse::Peers { peers }
        }
        IpcRequest::Status => IpcResponse::Status {
            message: node.current_status(),
            mode: node.current_mode(),
            selected: node
                .selected()
                .map(|s| s.path.to_string_lossy().to_string()),
            pending: node.pending().map(|p| PendingInfo {
                filename: p.filename,
                size: p.size,
                peer: p.peer.to_string(),
            }),
        },
        IpcRequest::Reject => {
            if node.reject_pending() {
                IpcResponse::Ok {
                    message: "Incoming transfer rejected".to_string(),
                }
            } else {
                IpcResponse::Error {
                    message: "No pending transfer".to_string(),
                }
            }
        }
        // 在 handle_client 中处理
        IpcRequest::Watch => IpcResponse::Error {
            message: "watch must be the first request on a connection".to_string(),
        },
    }
}

/// 把节点事件逐行写给客户端，直到客户端断开
async fn stream_events<W>(writer: &mut W, mut events: broadcast::Receiver<NodeEvent>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        match events.recv().await {
            Ok(event) => write_response(writer, &IpcResponse::Event { event }).await?,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!("Watcher lagged, skipped {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

async fn write_response<W>(writer: &mut W, response: &IpcResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(serde_json::to_string(response)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use grabsend_core::{AppSettings, TransferMode};
    use std::net::{IpAddr, Ipv4Addr};

    async fn test_node(dir: &std::path::Path) -> Arc<Node> {
        let settings = AppSettings {
            discovery_port: 0,
            transfer_port: 0,
            broadcast_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            local_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 255, 255, 9))),
            download_dir: dir.to_path_buf(),
            ..Default::default()
        };
        Arc::new(Node::start(settings).await.unwrap())
    }

    async fn roundtrip(node: &Arc<Node>, request: &str) -> IpcResponse {
        let (client, server) = UnixStream::pair().unwrap();
        tokio::spawn(handle_client(server, node.clone()));

        let (reader, mut writer) = client.into_split();
        writer.write_all(request.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();

        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_select_then_status() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, b"abc").await.unwrap();
        let node = test_node(dir.path()).await;

        let req = serde_json::to_string(&IpcRequest::Select {
            path: file.to_string_lossy().to_string(),
        })
        .unwrap();
        assert!(matches!(roundtrip(&node, &req).await, IpcResponse::Ok { .. }));

        match roundtrip(&node, r#"{"type":"status"}"#).await {
            IpcResponse::Status {
                mode,
                selected,
                pending,
                ..
            } => {
                assert_eq!(mode, TransferMode::Idle);
                assert_eq!(selected.as_deref(), Some(file.to_string_lossy().as_ref()));
                assert!(pending.is_none());
            }
            other => panic!("unexpected response: {:?}", other),
        }
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path()).await;

        assert!(matches!(
            roundtrip(&node, "not json").await,
            IpcResponse::Error { .. }
        ));
        assert!(matches!(
            roundtrip(&node, r#"{"type":"reject"}"#).await,
            IpcResponse::Error { .. }
        ));
        assert!(matches!(
            roundtrip(&node, r#"{"type":"start_capture"}"#).await,
            IpcResponse::Error { .. }
        ));
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_peers_lists_directory() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path()).await;
        node.directory()
            .upsert("192.168.1.20:12345".parse().unwrap(), "desk", Instant::now());

        match roundtrip(&node, r#"{"type":"peers"}"#).await {
            IpcResponse::Peers { peers } => {
                assert_eq!(peers.len(), 1);
                assert_eq!(peers[0].name, "desk");
                assert_eq!(peers[0].address, "192.168.1.20:12345");
            }
            other => panic!("unexpected response: {:?}", other),
        }
        node.shutdown().await;
    }
}
