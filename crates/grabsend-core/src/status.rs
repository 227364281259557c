//! 状态面板
//!
//! 节点把面向用户的状态写到这里，界面 (CLI watch、GUI) 订阅事件流。
//! 当前状态保存在读写锁中，事件通过 broadcast 分发，慢订阅者只会丢失旧事件。

use log::{info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use crate::gesture::TransferMode;

/// 事件 channel 容量
const EVENT_CAPACITY: usize = 64;

/// 状态级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
}

impl StatusLevel {
    /// 获取对应的 Emoji 图标
    pub fn icon(&self) -> &'static str {
        match self {
            StatusLevel::Error => "❌",
            StatusLevel::Warn => "⚠️",
            StatusLevel::Info => "ℹ️",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StatusLevel::Error => "ERROR",
            StatusLevel::Warn => "WARN",
            StatusLevel::Info => "INFO",
        }
    }
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub level: StatusLevel,
    pub message: String,
    pub mode: TransferMode,
}

impl StatusEntry {
    pub fn new(level: StatusLevel, message: impl Into<String>, mode: TransferMode) -> Self {
        Self {
            level,
            message: message.into(),
            mode,
        }
    }
}

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// 推送给订阅者的节点事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeEvent {
    Status(StatusEntry),
    IncomingRequest {
        filename: String,
        size: u64,
        peer: String,
    },
    /// 传输结果，也是给用户的确认
    TransferFinished {
        direction: Direction,
        filename: String,
        success: bool,
        detail: String,
    },
}

pub struct StatusBoard {
    current: RwLock<StatusEntry>,
    events: broadcast::Sender<NodeEvent>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            current: RwLock::new(StatusEntry::new(
                StatusLevel::Info,
                "Ready",
                TransferMode::Idle,
            )),
            events,
        }
    }

    /// 更新当前状态并通知订阅者
    pub fn set(&self, level: StatusLevel, message: impl Into<String>, mode: TransferMode) {
        let entry = StatusEntry::new(level, message, mode);
        match level {
            StatusLevel::Error | StatusLevel::Warn => warn!("[{}] {}", mode, entry.message),
            StatusLevel::Info => info!("[{}] {}", mode, entry.message),
        }
        *self.current.write() = entry.clone();
        self.emit(NodeEvent::Status(entry));
    }

    pub fn current(&self) -> StatusEntry {
        self.current.read().clone()
    }

    /// 发出事件；没有订阅者时直接丢弃
    pub fn emit(&self, event: NodeEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_updates_current_and_notifies() {
        let board = StatusBoard::new();
        let mut rx = board.subscribe();

        board.set(StatusLevel::Info, "Sender mode armed", TransferMode::SenderArmed);

        assert_eq!(board.current().message, "Sender mode armed");
        assert_eq!(board.current().mode, TransferMode::SenderArmed);
        match rx.try_recv().unwrap() {
            NodeEvent::Status(entry) => assert_eq!(entry.level, StatusLevel::Info),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let board = StatusBoard::new();
        board.emit(NodeEvent::IncomingRequest {
            filename: "a.txt".into(),
            size: 1,
            peer: "127.0.0.1:1".into(),
        });
        assert_eq!(board.current().message, "Ready");
    }

    #[test]
    fn test_event_wire_format() {
        let event = NodeEvent::TransferFinished {
            direction: Direction::Inbound,
            filename: "a.txt".into(),
            success: true,
            detail: "saved".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "transfer_finished");
        assert_eq!(json["direction"], "inbound");
    }
}
