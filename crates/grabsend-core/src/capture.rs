//! 手部关键点来源
//!
//! 摄像头和手部追踪器在本库之外运行。[`FrameSource`] 是它们喂给节点的接口：
//! 每次调用返回一帧，`None` 表示流已结束。

use async_trait::async_trait;
use log::{debug, warn};

use crate::gesture::{Landmark, LandmarkFrame};
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;

/// 一帧采集结果
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// 检测到的手；`None` 表示画面中没有手
    pub hand: Option<LandmarkFrame>,
    pub at: Instant,
}

impl CapturedFrame {
    pub fn new(hand: Option<LandmarkFrame>) -> Self {
        Self {
            hand,
            at: Instant::now(),
        }
    }
}

#[async_trait]
pub trait FrameSource: Send {
    /// 下一帧；流结束时返回 `Ok(None)`
    async fn next_frame(&mut self) -> anyhow::Result<Option<CapturedFrame>>;
}

/// 通过 channel 推送的帧
pub struct ChannelFrameSource {
    rx: mpsc::Receiver<CapturedFrame>,
}

impl ChannelFrameSource {
    pub fn new(rx: mpsc::Receiver<CapturedFrame>) -> Self {
        Self { rx }
    }

    /// 创建一对发送端和帧来源
    pub fn channel(buffer: usize) -> (mpsc::Sender<CapturedFrame>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl FrameSource for ChannelFrameSource {
    async fn next_frame(&mut self) -> anyhow::Result<Option<CapturedFrame>> {
        Ok(self.rx.recv().await)
    }
}

/// 每行一个 JSON 数组的关键点流
///
/// ```text
/// [{"x":0.5,"y":0.4},{"x":0.52,"y":0.38,"z":-0.01}, ...21 个点]
/// []
/// null
/// ```
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    line_no: u64,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl JsonLinesSource<tokio::io::BufReader<tokio::fs::File>> {
    /// 打开文件或命名管道
    pub async fn open(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        Ok(Self::new(tokio::io::BufReader::new(file)))
    }
}

/// 解析一行；`Err` 表示这一行应被跳过
fn parse_line(line: &str) -> Result<Option<LandmarkFrame>, String> {
    let points: Option<Vec<Landmark>> =
        serde_json::from_str(line).map_err(|e| format!("not a landmark array: {}", e))?;

    match points {
        None => Ok(None),
        Some(points) if points.is_empty() => Ok(None),
        Some(points) => match LandmarkFrame::try_from(points) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                warn!("{}, treating frame as no hand", e);
                Ok(None)
            }
        },
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> FrameSource for JsonLinesSource<R> {
    async fn next_frame(&mut self) -> anyhow::Result<Option<CapturedFrame>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match parse_line(line) {
                Ok(hand) => return Ok(Some(CapturedFrame::new(hand))),
                Err(e) => warn!("Skipping landmark line {}: {}", self.line_no, e),
            }
        }

        debug!("Landmark stream ended after {} lines", self.line_no);
        Ok(None)
    }
}
