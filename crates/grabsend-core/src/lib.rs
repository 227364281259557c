//! Grabsend Core Library
//!
//! 手势驱动的局域网点对点文件传输：在一台机器上做 "抓取" 手势选中文件，
//! 松开手势发送；接收方松开手势接受。
//!
//! # 模块
//!
//! - **gesture**: 手部关键点、手势分类器和手势状态机
//! - **discovery**: UDP 广播在线协议和设备目录
//! - **transfer**: 带请求头和接受令牌的 TCP 文件传输
//! - **capture**: 手部关键点来源 (channel / JSON lines)
//! - **node**: 持有全部状态并运行后台任务的节点
//! - **status**: 状态面板和节点事件
//! - **config**: 应用设置
//! - **ipc**: 守护进程与客户端之间的消息
//!
//! # 使用示例
//!
//! ```ignore
//! use grabsend_core::{AppSettings, JsonLinesSource, Node};
//!
//! let node = Node::start(AppSettings::load()).await?;
//! node.select_file("/home/me/report.pdf").await?;
//! node.start_capture(JsonLinesSource::open("/run/user/1000/hand.fifo").await?);
//!
//! let mut events = node.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

pub mod capture;
pub mod config;
pub mod discovery;
pub mod gesture;
pub mod ipc;
pub mod node;
pub mod status;
pub mod transfer;

// Gesture re-exports
pub use gesture::{Gesture, GestureMachine, Landmark, LandmarkFrame, TransferMode, classify};

// Discovery re-exports
pub use discovery::{Announcement, PeerDirectory, PeerRecord};

// Transfer re-exports
pub use transfer::{SelectedFile, TransferError, TransferHeader};

pub use capture::{CapturedFrame, ChannelFrameSource, FrameSource, JsonLinesSource};
pub use config::AppSettings;
pub use node::{Node, SendError};
pub use status::{NodeEvent, StatusLevel};
