//! 接收其他节点的广播并写入设备目录

use log::{debug, info, trace, warn};

use crate::discovery::{Announcement, DiscoveryError, MAX_DATAGRAM, PeerDirectory};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// 单个报文的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    /// 来自本机，已忽略
    OwnAnnouncement,
    /// 新设备
    Added(SocketAddr),
    /// 已知设备，刷新了存活时间
    Refreshed(SocketAddr),
}

pub struct DiscoveryListener {
    socket: UdpSocket,
    directory: Arc<PeerDirectory>,
    local_ip: IpAddr,
    default_port: u16,
}

impl DiscoveryListener {
    /// 绑定发现端口
    ///
    /// `default_port` 用于没有携带传输端口的广播。
    pub async fn bind(
        addr: SocketAddr,
        directory: Arc<PeerDirectory>,
        local_ip: IpAddr,
        default_port: u16,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            directory,
            local_ip,
            default_port,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// 处理一个报文
    pub fn handle_datagram(
        &self,
        data: &[u8],
        source: SocketAddr,
        now: Instant,
    ) -> Result<Ingest, DiscoveryError> {
        let announcement = Announcement::decode(data)?;

        if source.ip() == self.local_ip {
            trace!("Ignoring own announcement from {}", source);
            return Ok(Ingest::OwnAnnouncement);
        }

        let peer = SocketAddr::new(source.ip(), announcement.port.unwrap_or(self.default_port));
        if self.directory.upsert(peer, &announcement.name, now) {
            info!("Discovered peer '{}' at {}", announcement.name, peer);
            Ok(Ingest::Added(peer))
        } else {
            Ok(Ingest::Refreshed(peer))
        }
    }

    /// 接收循环，直到被取消
    ///
    /// 格式错误的报文只记录日志；socket 错误也不会终止循环。
    pub async fn run(self, cancel: CancellationToken) {
        match self.local_addr() {
            Ok(addr) => info!("Listening for announcements on {}", addr),
            Err(e) => warn!("Discovery socket has no local address: {}", e),
        }

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.socket.recv_from(&mut buf) => r,
            };

            match received {
                Ok((n, source)) => {
                    if let Err(e) = self.handle_datagram(&buf[..n], source, Instant::now()) {
                        debug!("Dropping datagram from {}: {}", source, e);
                    }
                }
                Err(e) => warn!("Broadcast listener error: {}", e),
            }
        }

        debug!("Discovery listener stopped");
    }
}
