//! 单帧手势分类器
//!
//! 比较每根手指指尖与关节的 Y 坐标 (Y 轴向下)：
//! - 指尖低于关节 => 弯曲
//! - 指尖高于关节 => 伸展
//!
//! 至少 4 根手指弯曲为抓取，至少 4 根伸展为松开，否则为中性。
//! 不做跨帧平滑，抖动由状态机的驻留时间吸收。

use std::time::Instant;

use crate::gesture::landmarks::{DIGITS, LandmarkFrame};

/// 判定所需的最少手指数
const MIN_DIGITS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gesture {
    Grabbing,
    Releasing,
    Neutral,
}

impl Gesture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gesture::Grabbing => "grabbing",
            Gesture::Releasing => "releasing",
            Gesture::Neutral => "neutral",
        }
    }
}

/// 带时间戳的分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureSample {
    pub gesture: Gesture,
    pub at: Instant,
}

impl GestureSample {
    pub fn from_frame(frame: Option<&LandmarkFrame>, at: Instant) -> Self {
        Self {
            gesture: classify(frame),
            at,
        }
    }
}

/// 对一帧关键点进行分类，没有检测到手时返回 `Neutral`
pub fn classify(frame: Option<&LandmarkFrame>) -> Gesture {
    let Some(frame) = frame else {
        return Gesture::Neutral;
    };

    let points = frame.points();
    let mut curled = 0;
    let mut extended = 0;

    for (tip, joint) in DIGITS {
        let (tip_y, joint_y) = (points[tip].y, points[joint].y);
        if tip_y > joint_y {
            curled += 1;
        } else if tip_y < joint_y {
            extended += 1;
        }
    }

    if curled >= MIN_DIGITS {
        Gesture::Grabbing
    } else if extended >= MIN_DIGITS {
        Gesture::Releasing
    } else {
        Gesture::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::landmarks::{LANDMARK_COUNT, Landmark};

    #[derive(Clone, Copy)]
    enum Digit {
        Curled,
        Extended,
        Flat,
    }

    /// 按每根手指的状态构造一帧
    fn hand(digits: [Digit; 5]) -> LandmarkFrame {
        let mut points = [Landmark::new(0.5, 0.5, 0.0); LANDMARK_COUNT];
        for ((tip, joint), digit) in DIGITS.into_iter().zip(digits) {
            points[joint].y = 0.5;
            points[tip].y = match digit {
                Digit::Curled => 0.6,
                Digit::Extended => 0.4,
                Digit::Flat => 0.5,
            };
        }
        LandmarkFrame::new(points)
    }

    use Digit::{Curled as C, Extended as E, Flat as F};

    #[test]
    fn test_fist_is_grabbing() {
        assert_eq!(classify(Some(&hand([C, C, C, C, C]))), Gesture::Grabbing);
    }

    #[test]
    fn test_four_curled_is_grabbing() {
        assert_eq!(classify(Some(&hand([E, C, C, C, C]))), Gesture::Grabbing);
        assert_eq!(classify(Some(&hand([C, C, F, C, C]))), Gesture::Grabbing);
    }

    #[test]
    fn test_open_palm_is_releasing() {
        assert_eq!(classify(Some(&hand([E, E, E, E, E]))), Gesture::Releasing);
        assert_eq!(classify(Some(&hand([C, E, E, E, E]))), Gesture::Releasing);
    }

    #[test]
    fn test_mixed_is_neutral() {
        assert_eq!(classify(Some(&hand([C, C, E, E, F]))), Gesture::Neutral);
        assert_eq!(classify(Some(&hand([C, C, C, E, E]))), Gesture::Neutral);
        assert_eq!(classify(Some(&hand([F, F, F, F, F]))), Gesture::Neutral);
    }

    #[test]
    fn test_no_hand_is_neutral() {
        assert_eq!(classify(None), Gesture::Neutral);
    }

    #[test]
    fn test_sample_carries_timestamp() {
        let now = Instant::now();
        let sample = GestureSample::from_frame(Some(&hand([C, C, C, C, C])), now);
        assert_eq!(sample.gesture, Gesture::Grabbing);
        assert_eq!(sample.at, now);
    }
}
