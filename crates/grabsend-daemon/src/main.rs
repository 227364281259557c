//! Grabsend Daemon
//!
//! 后台守护进程，负责：
//! - 运行节点 (广播发现、传输监听、手势采集)
//! - 通过 Unix Socket 与 CLI 通信

mod ipc;

use anyhow::Result;
use grabsend_core::{AppSettings, JsonLinesSource, Node};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 桥接 log crate（grabsend-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let settings = AppSettings::load();
    let default_filter = if settings.verbose {
        "debug"
    } else {
        "info,grabsend_core=debug"
    };

    // 初始化日志
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init();

    tracing::info!("Grabsend Daemon starting...");

    let node = Arc::new(Node::start(settings).await?);
    tracing::info!(
        "Node ready: transfer port {}, discovery port {}",
        node.transfer_port(),
        node.discovery_port()
    );

    if let Some(path) = node.settings().landmark_source.clone() {
        match JsonLinesSource::open(&path).await {
            Ok(source) => node.start_capture(source),
            Err(e) => tracing::warn!("Cannot open landmark source {:?}: {}", path, e),
        }
    }

    // 启动 IPC 服务器
    let ipc_handle = tokio::spawn(ipc::run_ipc_server(node.clone()));

    tokio::select! {
        res = ipc_handle => {
            tracing::error!("IPC server exited: {:?}", res);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }

    node.shutdown().await;
    let _ = std::fs::remove_file(grabsend_core::ipc::socket_path());
    Ok(())
}
