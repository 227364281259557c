//! 周期性广播本机在线信息

use log::{debug, info, warn};

use crate::discovery::Announcement;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// 默认广播间隔
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(5);

pub struct Advertiser {
    socket: UdpSocket,
    target: SocketAddr,
    payload: Vec<u8>,
    interval: Duration,
}

impl Advertiser {
    /// 创建广播 socket，`target` 通常是 `255.255.255.255:<发现端口>`
    pub async fn bind(
        target: SocketAddr,
        announcement: &Announcement,
        interval: Duration,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;
        let payload = announcement.encode()?;

        Ok(Self {
            socket,
            target,
            payload,
            interval,
        })
    }

    /// 发送一次广播
    pub async fn announce_once(&self) -> std::io::Result<()> {
        self.socket.send_to(&self.payload, self.target).await?;
        Ok(())
    }

    /// 广播循环，直到被取消
    ///
    /// 单次发送失败只记录日志，下一个周期自然重试。
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Announcing presence to {} every {}s",
            self.target,
            self.interval.as_secs_f32()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.announce_once().await {
                        Ok(()) => debug!("Announcement sent to {}", self.target),
                        Err(e) => warn!("Broadcast advertise error: {}", e),
                    }
                }
            }
        }

        debug!("Advertiser stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_advertiser_repeats_until_cancelled() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();

        let advertiser = Advertiser::bind(
            target,
            &Announcement::new("bench", 40001),
            Duration::from_millis(20),
        )
        .await
        .unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(advertiser.run(cancel.clone()));

        let mut buf = [0u8; 1024];
        for _ in 0..2 {
            let (n, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
                .await
                .expect("announcement not received")
                .unwrap();
            let a = Announcement::decode(&buf[..n]).unwrap();
            assert_eq!(a, Announcement::new("bench", 40001));
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("advertiser did not stop")
            .unwrap();
    }
}
