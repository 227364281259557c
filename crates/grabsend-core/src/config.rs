//! 应用配置和持久化
//!
//! 所有字段都有默认值，配置文件只需写出要修改的项。

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::discovery::DEFAULT_DISCOVERY_PORT;
use crate::gesture::MachineConfig;
use crate::transfer::{DEFAULT_TRANSFER_PORT, ReceiveOptions, SendOptions};

/// 应用设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 设备名称（在其他节点的设备列表中显示）
    pub device_name: String,
    /// 发现广播端口 (UDP)
    pub discovery_port: u16,
    /// 文件传输端口 (TCP)，0 表示由系统分配
    pub transfer_port: u16,
    /// 广播目标地址
    pub broadcast_addr: IpAddr,
    /// 手动指定本机局域网地址，不填则自动探测
    pub local_ip: Option<IpAddr>,
    pub announce_interval_secs: u64,
    /// 设备存活窗口
    pub peer_ttl_secs: u64,
    /// 抓取需要保持的时间
    pub dwell_ms: u64,
    pub abandon_after_ms: u64,
    pub connect_timeout_secs: u64,
    /// 发送方等待对方手势的时间
    pub response_timeout_secs: u64,
    /// 接收方等待本地手势的时间
    pub accept_timeout_secs: u64,
    pub io_timeout_secs: u64,
    /// 下载目录
    pub download_dir: PathBuf,
    /// 启动时自动开始采集的关键点流 (JSON lines 文件或命名管道)
    pub landmark_source: Option<PathBuf>,
    /// 详细日志模式
    pub verbose: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            device_name: get_default_device_name(),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            transfer_port: DEFAULT_TRANSFER_PORT,
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            local_ip: None,
            announce_interval_secs: 5,
            peer_ttl_secs: 30,
            dwell_ms: 1000,
            abandon_after_ms: 500,
            connect_timeout_secs: 10,
            response_timeout_secs: 120,
            accept_timeout_secs: 60,
            io_timeout_secs: 30,
            download_dir: default_download_dir(),
            landmark_source: None,
            verbose: false,
        }
    }
}

impl AppSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("grabsend");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_addr, self.discovery_port)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs.max(1))
    }

    pub fn peer_ttl(&self) -> Duration {
        Duration::from_secs(self.peer_ttl_secs)
    }

    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            dwell: Duration::from_millis(self.dwell_ms),
            abandon_after: Duration::from_millis(self.abandon_after_ms),
        }
    }

    pub fn send_options(&self) -> SendOptions {
        SendOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            response_timeout: Duration::from_secs(self.response_timeout_secs),
            io_timeout: Duration::from_secs(self.io_timeout_secs),
        }
    }

    pub fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            download_dir: self.download_dir.clone(),
            accept_timeout: Duration::from_secs(self.accept_timeout_secs),
            io_timeout: Duration::from_secs(self.io_timeout_secs),
        }
    }
}

/// 获取默认设备名称
fn get_default_device_name() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("GestureTransfer_{}", host)
}

pub(crate) fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("GestureTransfer")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = AppSettings::default();
        assert!(settings.device_name.starts_with("GestureTransfer_"));
        assert_eq!(settings.discovery_port, 12346);
        assert_eq!(settings.transfer_port, 12345);
        assert_eq!(settings.broadcast_target().to_string(), "255.255.255.255:12346");
        assert!(settings.download_dir.ends_with("GestureTransfer"));
        assert_eq!(settings.machine_config().dwell, Duration::from_secs(1));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: AppSettings = toml::from_str(
            r#"
            device_name = "kitchen"
            dwell_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(settings.device_name, "kitchen");
        assert_eq!(settings.dwell_ms, 250);
        assert_eq!(settings.peer_ttl_secs, 30);
        assert_eq!(settings.local_ip, None);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let settings = AppSettings {
            device_name: "desk".to_string(),
            landmark_source: Some(PathBuf::from("/run/hand.fifo")),
            ..Default::default()
        };
        settings.save_to(&path).unwrap();

        assert_eq!(AppSettings::load_from(&path), settings);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "dwell_ms = \"soon\"").unwrap();

        let settings = AppSettings::load_from(&path);
        assert_eq!(settings.dwell_ms, 1000);
    }
}
