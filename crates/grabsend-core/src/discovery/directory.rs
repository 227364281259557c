//! 设备目录
//!
//! 进程内共享的已知设备表。由发现监听器写入，由发送路径和界面读取。
//! 所有访问经过内部读写锁，调用方不会直接修改记录。

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// 默认存活窗口
pub const DEFAULT_PEER_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub display_name: String,
    /// 对端的传输地址 (广播源 IP + 广播中的传输端口)
    pub address: SocketAddr,
    pub last_seen: Instant,
}

/// 目标选择策略：最早发现且仍存活的设备
///
/// 节点只和一个设备通信，这里是唯一做选择的地方。
pub fn first_seen(peers: &[PeerRecord]) -> Option<&PeerRecord> {
    peers.first()
}

pub struct PeerDirectory {
    /// 按首次发现的顺序排列
    peers: RwLock<Vec<PeerRecord>>,
    local_ip: Option<IpAddr>,
    ttl: Duration,
}

impl PeerDirectory {
    pub fn new(local_ip: Option<IpAddr>, ttl: Duration) -> Self {
        Self {
            peers: RwLock::new(Vec::new()),
            local_ip,
            ttl,
        }
    }

    /// 插入或刷新一条记录，返回是否为新设备
    ///
    /// 同一地址重复调用只会原地更新名称和时间。本机地址永远不会被插入。
    pub fn upsert(&self, address: SocketAddr, display_name: &str, now: Instant) -> bool {
        if self.local_ip == Some(address.ip()) {
            return false;
        }

        let mut peers = self.peers.write();
        if let Some(record) = peers.iter_mut().find(|p| p.address == address) {
            if record.display_name != display_name {
                record.display_name = display_name.to_string();
            }
            record.last_seen = record.last_seen.max(now);
            false
        } else {
            peers.push(PeerRecord {
                display_name: display_name.to_string(),
                address,
                last_seen: now,
            });
            true
        }
    }

    /// 移除超过存活窗口的记录，返回被移除的数量
    pub fn prune(&self, now: Instant) -> usize {
        let ttl = self.ttl;
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|p| now.saturating_duration_since(p.last_seen) <= ttl);
        before - peers.len()
    }

    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.peers.read().clone()
    }

    /// 按 [`first_seen`] 策略选择发送目标
    pub fn choose_target(&self) -> Option<PeerRecord> {
        first_seen(&self.peers.read()).cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn local_ip(&self) -> Option<IpAddr> {
        self.local_ip
    }
}
