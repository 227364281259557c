//! 手势状态机
//!
//! 每处理一帧调用一次 [`GestureMachine::step`]，输出需要节点执行的动作。
//!
//! ```text
//!            Grabbing + 已选文件                Grabbing, 持续 >= dwell
//!   Idle ─────────────────────────> GrabPending ──────────────────────> SenderArmed
//!    ^                                  │  持续 Neutral / 提前松开           │
//!    └──────────────────────────────────┴────────────────────────────────────┘
//!                                                 Releasing => FireSend
//!
//!   收到入站请求 (任意状态) ──> ReceiverArmed ── Releasing => FireAccept
//!                                     └─ 接收结束 / 请求撤回 ──> Idle
//! ```
//!
//! 状态机本身不做 I/O，也不持有锁；由节点在互斥锁内驱动。

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::gesture::classifier::Gesture;

/// 对外可见的传输模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    #[default]
    Idle,
    SenderArmed,
    ReceiverArmed,
}

impl TransferMode {
    pub fn name(&self) -> &'static str {
        match self {
            TransferMode::Idle => "idle",
            TransferMode::SenderArmed => "sender-armed",
            TransferMode::ReceiverArmed => "receiver-armed",
        }
    }
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 状态机内部状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    GrabPending { since: Instant },
    SenderArmed,
    ReceiverArmed,
}

/// 状态机输出的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// 开始计时抓取
    GrabStarted,
    /// 抓取保持足够久，进入发送模式
    EnterSenderMode,
    /// 抓取被放弃 (持续中性、提前松开或取消了文件选择)
    GrabAbandoned,
    /// 发送选中的文件
    FireSend,
    /// 接受挂起的入站传输
    FireAccept,
}

/// 每帧的外部上下文
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameContext {
    pub file_selected: bool,
    pub inbound_pending: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct MachineConfig {
    /// 抓取需要保持的时间
    pub dwell: Duration,
    /// 连续中性多久视为放弃抓取
    pub abandon_after: Duration,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            dwell: Duration::from_millis(1000),
            abandon_after: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GestureMachine {
    config: MachineConfig,
    phase: Phase,
    /// 当前连续中性帧的起始时间
    neutral_since: Option<Instant>,
}

impl GestureMachine {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            neutral_since: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mode(&self) -> TransferMode {
        match self.phase {
            Phase::Idle | Phase::GrabPending { .. } => TransferMode::Idle,
            Phase::SenderArmed => TransferMode::SenderArmed,
            Phase::ReceiverArmed => TransferMode::ReceiverArmed,
        }
    }

    /// 处理一帧分类结果
    pub fn step(&mut self, gesture: Gesture, now: Instant, ctx: FrameContext) -> Option<Transition> {
        if gesture == Gesture::Releasing && ctx.inbound_pending {
            return Some(Transition::FireAccept);
        }

        match (self.phase, gesture) {
            (Phase::Idle, Gesture::Grabbing) if ctx.file_selected => {
                self.enter(Phase::GrabPending { since: now });
                Some(Transition::GrabStarted)
            }
            (Phase::GrabPending { since }, Gesture::Grabbing) => {
                self.neutral_since = None;
                if !ctx.file_selected {
                    self.enter(Phase::Idle);
                    Some(Transition::GrabAbandoned)
                } else if now.saturating_duration_since(since) >= self.config.dwell {
                    self.enter(Phase::SenderArmed);
                    Some(Transition::EnterSenderMode)
                } else {
                    None
                }
            }
            (Phase::GrabPending { .. }, Gesture::Releasing) => {
                self.enter(Phase::Idle);
                Some(Transition::GrabAbandoned)
            }
            (Phase::SenderArmed, Gesture::Releasing) => {
                self.enter(Phase::Idle);
                if ctx.file_selected {
                    Some(Transition::FireSend)
                } else {
                    Some(Transition::GrabAbandoned)
                }
            }
            (Phase::SenderArmed, Gesture::Grabbing) => {
                self.neutral_since = None;
                None
            }
            (Phase::GrabPending { .. } | Phase::SenderArmed, Gesture::Neutral) => {
                let started = *self.neutral_since.get_or_insert(now);
                if now.saturating_duration_since(started) >= self.config.abandon_after {
                    self.enter(Phase::Idle);
                    Some(Transition::GrabAbandoned)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// 入站请求到达，无论抓取状态如何都切换到接收模式
    pub fn inbound_arrived(&mut self) {
        self.enter(Phase::ReceiverArmed);
    }

    /// 入站传输结束 (完成、失败或撤回)
    pub fn inbound_finished(&mut self) {
        if self.phase == Phase::ReceiverArmed {
            self.enter(Phase::Idle);
        }
    }

    /// 放弃抓取侧的状态 (采集停止时调用)，接收模式不受影响
    ///
    /// 返回是否确实放弃了一次抓取。
    pub fn reset_grab(&mut self) -> bool {
        match self.phase {
            Phase::GrabPending { .. } | Phase::SenderArmed => {
                self.enter(Phase::Idle);
                true
            }
            Phase::Idle | Phase::ReceiverArmed => false,
        }
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.neutral_since = None;
    }
}

impl Default for GestureMachine {
    fn default() -> Self {
        Self::new(MachineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELECTED: FrameContext = FrameContext {
        file_selected: true,
        inbound_pending: false,
    };
    const NOTHING: FrameContext = FrameContext {
        file_selected: false,
        inbound_pending: false,
    };

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// 以 33ms 间隔喂入同一手势，返回所有输出
    fn hold(
        machine: &mut GestureMachine,
        gesture: Gesture,
        from: Instant,
        until: Duration,
        ctx: FrameContext,
    ) -> Vec<(Duration, Transition)> {
        let mut out = Vec::new();
        let mut t = Duration::ZERO;
        while t <= until {
            if let Some(tr) = machine.step(gesture, from + t, ctx) {
                out.push((t, tr));
            }
            t += ms(33);
        }
        out
    }

    #[test]
    fn test_grab_arms_sender_after_dwell() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();
        let out = hold(&mut m, Gesture::Grabbing, t0, ms(1200), SELECTED);

        assert_eq!(out[0], (Duration::ZERO, Transition::GrabStarted));
        let (armed_at, tr) = out[1];
        assert_eq!(tr, Transition::EnterSenderMode);
        assert!(armed_at >= ms(1000), "armed too early: {:?}", armed_at);
        assert_eq!(m.mode(), TransferMode::SenderArmed);
    }

    #[test]
    fn test_grab_shorter_than_dwell_does_not_arm() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();
        hold(&mut m, Gesture::Grabbing, t0, ms(990), SELECTED);
        assert!(matches!(m.phase(), Phase::GrabPending { .. }));
        assert_eq!(m.mode(), TransferMode::Idle);
    }

    #[test]
    fn test_grab_without_file_never_arms() {
        let mut m = GestureMachine::default();
        let out = hold(&mut m, Gesture::Grabbing, Instant::now(), ms(3000), NOTHING);
        assert!(out.is_empty());
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_single_neutral_frame_is_tolerated() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();
        m.step(Gesture::Grabbing, t0, SELECTED);
        assert_eq!(m.step(Gesture::Neutral, t0 + ms(400), SELECTED), None);
        assert_eq!(
            m.step(Gesture::Grabbing, t0 + ms(1000), SELECTED),
            Some(Transition::EnterSenderMode)
        );
    }

    #[test]
    fn test_sustained_neutral_abandons_grab() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();
        m.step(Gesture::Grabbing, t0, SELECTED);
        let out = hold(&mut m, Gesture::Neutral, t0 + ms(100), ms(600), SELECTED);
        assert_eq!(out.last().map(|(_, tr)| *tr), Some(Transition::GrabAbandoned));
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_sustained_neutral_disarms_sender() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();
        hold(&mut m, Gesture::Grabbing, t0, ms(1100), SELECTED);
        assert_eq!(m.mode(), TransferMode::SenderArmed);
        hold(&mut m, Gesture::Neutral, t0 + ms(1200), ms(600), SELECTED);
        assert_eq!(m.mode(), TransferMode::Idle);
    }

    #[test]
    fn test_release_when_armed_fires_send() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();
        hold(&mut m, Gesture::Grabbing, t0, ms(1100), SELECTED);
        assert_eq!(
            m.step(Gesture::Releasing, t0 + ms(1200), SELECTED),
            Some(Transition::FireSend)
        );
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_early_release_does_not_send() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();
        m.step(Gesture::Grabbing, t0, SELECTED);
        assert_eq!(
            m.step(Gesture::Releasing, t0 + ms(300), SELECTED),
            Some(Transition::GrabAbandoned)
        );
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_inbound_request_arms_receiver_and_release_accepts() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();
        hold(&mut m, Gesture::Grabbing, t0, ms(1100), SELECTED);
        m.inbound_arrived();
        assert_eq!(m.mode(), TransferMode::ReceiverArmed);

        let pending = FrameContext {
            file_selected: true,
            inbound_pending: true,
        };
        assert_eq!(m.step(Gesture::Grabbing, t0 + ms(1200), pending), None);
        assert_eq!(
            m.step(Gesture::Releasing, t0 + ms(1300), pending),
            Some(Transition::FireAccept)
        );
        // 接收进行中，模式保持直到结束
        assert_eq!(m.mode(), TransferMode::ReceiverArmed);
        m.inbound_finished();
        assert_eq!(m.mode(), TransferMode::Idle);
    }

    #[test]
    fn test_release_without_pending_in_receiver_mode_is_ignored() {
        let mut m = GestureMachine::default();
        m.inbound_arrived();
        assert_eq!(m.step(Gesture::Releasing, Instant::now(), NOTHING), None);
        assert_eq!(m.mode(), TransferMode::ReceiverArmed);
    }

    #[test]
    fn test_deselect_during_grab_abandons() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();
        m.step(Gesture::Grabbing, t0, SELECTED);
        assert_eq!(
            m.step(Gesture::Grabbing, t0 + ms(500), NOTHING),
            Some(Transition::GrabAbandoned)
        );
    }

    #[test]
    fn test_reset_grab_requires_a_fresh_dwell() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();
        hold(&mut m, Gesture::Grabbing, t0, ms(1100), SELECTED);
        assert_eq!(m.mode(), TransferMode::SenderArmed);

        assert!(m.reset_grab());
        assert_eq!(m.phase(), Phase::Idle);
        // 重新开始后单个松开帧不会发送
        assert_eq!(m.step(Gesture::Releasing, t0 + ms(3000), SELECTED), None);
        assert_eq!(
            m.step(Gesture::Grabbing, t0 + ms(3100), SELECTED),
            Some(Transition::GrabStarted)
        );
    }

    #[test]
    fn test_reset_grab_keeps_receiver_mode() {
        let mut m = GestureMachine::default();
        m.inbound_arrived();
        assert!(!m.reset_grab());
        assert_eq!(m.mode(), TransferMode::ReceiverArmed);
    }
}
