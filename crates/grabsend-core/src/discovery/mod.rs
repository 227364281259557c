//! 局域网设备发现
//!
//! 基于 UDP 广播的尽力而为在线协议：
//! - **advertiser**: 周期性广播本机名称和传输端口
//! - **listener**: 接收其他节点的广播并写入设备目录
//! - **directory**: 带存活期的设备表
//!
//! 没有确认、重传或顺序保证，目录的过期清理是唯一的陈旧机制。

pub mod advertiser;
pub mod announce;
pub mod directory;
pub mod listener;

pub use advertiser::Advertiser;
pub use announce::Announcement;
pub use directory::{PeerDirectory, PeerRecord, first_seen};
pub use listener::DiscoveryListener;

use log::debug;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// 默认发现端口
pub const DEFAULT_DISCOVERY_PORT: u16 = 12346;

/// 单个广播报文的最大长度
pub const MAX_DATAGRAM: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Malformed announcement: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid announcement: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 解析本机在局域网中的 IP
///
/// 向公网地址 "connect" 一个 UDP socket (不会发送数据)，读取系统选择的源地址。
/// 失败时回退到 127.0.0.1。
pub fn resolve_local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };

    match probe() {
        Ok(ip) => ip,
        Err(e) => {
            debug!("Local IP detection failed ({}), using loopback", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
