//! Grabsend CLI
//!
//! 命令行客户端，通过 Unix Socket 与守护进程通信

mod client;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use grabsend_core::ipc::{IpcRequest, IpcResponse};
use grabsend_core::status::Direction;
use grabsend_core::{AppSettings, NodeEvent};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "grabsend", version, about = "手势文件传输 - 抓取发送，松开接收")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 选择要发送的文件
    Select {
        /// 文件路径
        file: PathBuf,
    },
    /// 取消文件选择
    Clear,
    /// 开始手势采集
    Start {
        /// 关键点流 (JSON lines 文件或命名管道)，不指定则使用配置
        #[arg(short, long)]
        source: Option<PathBuf>,
    },
    /// 停止手势采集
    Stop,
    /// 列出附近设备
    Peers,
    /// 查看当前状态
    Status,
    /// 拒绝挂起的入站传输
    Reject,
    /// 持续显示节点事件
    Watch,
    /// 查看或修改本机设备名称
    Name {
        /// 新名称，不指定则显示当前名称
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Select { file } => {
            // 守护进程的工作目录可能不同
            let path = std::path::absolute(&file)?;
            println!("📄 选择文件: {}", path.display());
            client::send_request(IpcRequest::Select {
                path: path.to_string_lossy().to_string(),
            })
            .await?;
        }
        Commands::Clear => {
            client::send_request(IpcRequest::ClearSelection).await?;
        }
        Commands::Start { source } => {
            let source = source
                .map(|p| std::path::absolute(p).map(|p| p.to_string_lossy().to_string()))
                .transpose()?;
            println!("📷 开始采集");
            client::send_request(IpcRequest::StartCapture { source }).await?;
        }
        Commands::Stop => {
            println!("⏹️  停止采集");
            client::send_request(IpcRequest::StopCapture).await?;
        }
        Commands::Peers => {
            println!("🔍 附近设备:");
            let resp = client::send_request(IpcRequest::Peers).await?;
            if let IpcResponse::Peers { peers } = resp {
                if peers.is_empty() {
                    println!("   未发现设备");
                } else {
                    for (i, peer) in peers.iter().enumerate() {
                        println!(
                            "   [{}] {} ({}, {}s ago)",
                            i, peer.name, peer.address, peer.last_seen_secs
                        );
                    }
                }
            }
        }
        Commands::Status => {
            let resp = client::send_request(IpcRequest::Status).await?;
            if let IpcResponse::Status {
                message,
                mode,
                selected,
                pending,
            } = resp
            {
                println!("状态: {}", message);
                println!("模式: {}", mode);
                if let Some(file) = selected {
                    println!("文件: {}", file);
                }
                if let Some(p) = pending {
                    println!("待接收: {} ({} bytes) 来自 {}", p.filename, p.size, p.peer);
                }
            }
        }
        Commands::Reject => {
            client::send_request(IpcRequest::Reject).await?;
        }
        Commands::Watch => {
            println!("👀 等待事件 (Ctrl+C 退出)");
            client::watch(|resp| {
                if let IpcResponse::Event { event } = resp {
                    print_event(&event);
                }
            })
            .await?;
        }
        Commands::Name { name } => {
            let mut settings = AppSettings::load();
            match name {
                Some(name) => {
                    set_device_name(&mut settings, &name)?;
                    settings.save()?;
                    println!("✏️  设备名称已改为 {} (重启守护进程后生效)", settings.device_name);
                }
                None => println!("设备名称: {}", settings.device_name),
            }
        }
    }

    Ok(())
}

fn set_device_name(settings: &mut AppSettings, name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("device name must not be empty");
    }
    settings.device_name = name.to_string();
    Ok(())
}

fn print_event(event: &NodeEvent) {
    match event {
        NodeEvent::Status(entry) => {
            println!("{} [{}] {}", entry.level.icon(), entry.mode, entry.message);
        }
        NodeEvent::IncomingRequest {
            filename,
            size,
            peer,
        } => {
            println!("📥 {} 想发送 {} ({} bytes)，松开手势接收", peer, filename, size);
        }
        NodeEvent::TransferFinished {
            direction,
            filename,
            success,
            detail,
        } => {
            let arrow = match direction {
                Direction::Outbound => "📤",
                Direction::Inbound => "📥",
            };
            let mark = if *success { "✅" } else { "❌" };
            println!("{} {} {}: {}", arrow, mark, filename, detail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_command() {
        let cli = Cli::try_parse_from(["grabsend", "name", "kitchen"]).unwrap();
        assert!(matches!(cli.command, Commands::Name { name: Some(ref n) } if n == "kitchen"));

        let cli = Cli::try_parse_from(["grabsend", "name"]).unwrap();
        assert!(matches!(cli.command, Commands::Name { name: None }));
    }

    #[test]
    fn test_set_device_name() {
        let mut settings = AppSettings::default();
        set_device_name(&mut settings, "  desk  ").unwrap();
        assert_eq!(settings.device_name, "desk");

        assert!(set_device_name(&mut settings, "   ").is_err());
        assert_eq!(settings.device_name, "desk");
    }
}
