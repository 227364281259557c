//! 守护进程与客户端之间的 IPC 消息
//!
//! Unix socket 上每行一个 JSON 对象，按 `type` 字段区分。
//! `watch` 请求之后，连接变为单向事件流。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::gesture::TransferMode;
use crate::status::NodeEvent;

pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("grabsend.sock")
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum IpcRequest {
    #[serde(rename = "select")]
    Select { path: String },
    #[serde(rename = "clear_selection")]
    ClearSelection,
    #[serde(rename = "start_capture")]
    StartCapture {
        /// 关键点流路径，不填则使用配置中的 `landmark_source`
        #[serde(default)]
        source: Option<String>,
    },
    #[serde(rename = "stop_capture")]
    StopCapture,
    #[serde(rename = "peers")]
    Peers,
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "reject")]
    Reject,
    #[serde(rename = "watch")]
    Watch,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum IpcResponse {
    #[serde(rename = "ok")]
    Ok { message: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "peers")]
    Peers { peers: Vec<PeerInfo> },
    #[serde(rename = "status")]
    Status {
        message: String,
        mode: TransferMode,
        selected: Option<String>,
        pending: Option<PendingInfo>,
    },
    #[serde(rename = "event")]
    Event { event: NodeEvent },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PeerInfo {
    pub name: String,
    pub address: String,
    /// 距离上次广播的秒数
    pub last_seen_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PendingInfo {
    pub filename: String,
    pub size: u64,
    pub peer: String,
}
