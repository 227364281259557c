//! 手势模块
//!
//! 包含:
//! - 手部关键点数据结构 (21 点手部模型)
//! - 单帧手势分类器 (抓取 / 松开 / 中性)
//! - 带驻留时间门控的手势状态机

pub mod classifier;
pub mod landmarks;
pub mod machine;

pub use classifier::{Gesture, GestureSample, classify};
pub use landmarks::{LANDMARK_COUNT, Landmark, LandmarkError, LandmarkFrame};
pub use machine::{FrameContext, GestureMachine, MachineConfig, Phase, Transition, TransferMode};
