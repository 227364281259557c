//! IPC Client - 与守护进程通信

use anyhow::Result;
use grabsend_core::ipc::{IpcRequest, IpcResponse, socket_path};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedReadHalf;

async fn connect() -> Result<UnixStream> {
    let path = socket_path();
    match UnixStream::connect(&path).await {
        Ok(s) => Ok(s),
        Err(e) => {
            eprintln!("❌ 无法连接到守护进程: {}", e);
            eprintln!("   请确保 grabsend-daemon 正在运行 ({})", path.display());
            Err(e.into())
        }
    }
}

/// 发送请求并打开响应流
async fn open(request: &IpcRequest) -> Result<Lines<BufReader<OwnedReadHalf>>> {
    let stream = connect().await?;
    let (reader, mut writer) = stream.into_split();

    // 发送请求
    let json = serde_json::to_string(request)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    Ok(BufReader::new(reader).lines())
}

pub async fn send_request(request: IpcRequest) -> Result<IpcResponse> {
    let mut lines = open(&request).await?;

    // 读取响应
    let line = lines
        .next_line()
        .await?
        .ok_or_else(|| anyhow::anyhow!("daemon closed the connection"))?;
    let response: IpcResponse = serde_json::from_str(&line)?;

    match &response {
        IpcResponse::Ok { message } => println!("✅ {}", message),
        IpcResponse::Error { message } => eprintln!("❌ {}", message),
        _ => {}
    }

    Ok(response)
}

/// 订阅事件流，对每个事件调用 `on_event`，直到守护进程断开
pub async fn watch(mut on_event: impl FnMut(IpcResponse)) -> Result<()> {
    let mut lines = open(&IpcRequest::Watch).await?;
    while let Some(line) = lines.next_line().await? {
        match serde_json::from_str(&line) {
            Ok(response) => on_event(response),
            Err(e) => eprintln!("⚠️ 无法解析事件: {}", e),
        }
    }
    Ok(())
}
