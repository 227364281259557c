//! 手部关键点
//!
//! 21 点手部模型，坐标已归一化到图像空间 (Y 轴向下)。
//!
//! | 索引 | 部位 |
//! |------|------|
//! | 0 | 手腕 |
//! | 1..=4 | 拇指 (CMC, MCP, IP, 指尖) |
//! | 5..=8 | 食指 (MCP, PIP, DIP, 指尖) |
//! | 9..=12 | 中指 |
//! | 13..=16 | 无名指 |
//! | 17..=20 | 小指 |

use serde::{Deserialize, Serialize};

/// 一只手的关键点数量
pub const LANDMARK_COUNT: usize = 21;

pub const THUMB_IP: usize = 3;
pub const THUMB_TIP: usize = 4;
pub const INDEX_PIP: usize = 6;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_PIP: usize = 10;
pub const MIDDLE_TIP: usize = 12;
pub const RING_PIP: usize = 14;
pub const RING_TIP: usize = 16;
pub const PINKY_PIP: usize = 18;
pub const PINKY_TIP: usize = 20;

/// 五根手指的 (指尖, 关节) 索引对
pub const DIGITS: [(usize, usize); 5] = [
    (THUMB_TIP, THUMB_IP),
    (INDEX_TIP, INDEX_PIP),
    (MIDDLE_TIP, MIDDLE_PIP),
    (RING_TIP, RING_PIP),
    (PINKY_TIP, PINKY_PIP),
];

/// 单个归一化关键点
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LandmarkError {
    #[error("expected {LANDMARK_COUNT} landmarks, got {0}")]
    WrongCount(usize),
}

/// 一帧中一只手的全部关键点
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkFrame {
    points: [Landmark; LANDMARK_COUNT],
}

impl LandmarkFrame {
    pub fn new(points: [Landmark; LANDMARK_COUNT]) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Landmark; LANDMARK_COUNT] {
        &self.points
    }

    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.points.get(index)
    }
}

impl TryFrom<Vec<Landmark>> for LandmarkFrame {
    type Error = LandmarkError;

    fn try_from(points: Vec<Landmark>) -> Result<Self, Self::Error> {
        let count = points.len();
        let points: [Landmark; LANDMARK_COUNT] =
            points.try_into().map_err(|_| LandmarkError::WrongCount(count))?;
        Ok(Self { points })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_from_exact_count() {
        let frame = LandmarkFrame::try_from(vec![Landmark::default(); LANDMARK_COUNT]).unwrap();
        assert_eq!(frame.points().len(), LANDMARK_COUNT);
    }

    #[test]
    fn test_try_from_wrong_count() {
        let err = LandmarkFrame::try_from(vec![Landmark::default(); 5]).unwrap_err();
        assert_eq!(err, LandmarkError::WrongCount(5));
    }

    #[test]
    fn test_z_defaults_to_zero() {
        let point: Landmark = serde_json::from_str(r#"{"x":0.5,"y":0.25}"#).unwrap();
        assert_eq!(point, Landmark::new(0.5, 0.25, 0.0));
    }
}
