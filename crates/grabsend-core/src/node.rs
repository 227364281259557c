//! 节点
//!
//! 持有全部共享状态，并在一棵取消令牌和一个 [`TaskTracker`] 下运行所有后台任务：
//! - 广播和发现监听
//! - 传输监听 (每个连接一个任务)
//! - 手势采集循环 (采集期间)
//! - 每次发送一个任务
//!
//! 会话 (状态机 + 选中文件 + 挂起的入站请求) 由一把互斥锁保护，临界区内不做 I/O。
//! 松开手势接受传输时，只是把决定通过 oneshot 交给持有连接的任务。

use log::{debug, info, warn};

use crate::capture::{CapturedFrame, FrameSource};
use crate::config::AppSettings;
use crate::discovery::{
    Advertiser, Announcement, DiscoveryListener, PeerDirectory, PeerRecord, resolve_local_ip,
};
use crate::gesture::{FrameContext, GestureMachine, GestureSample, Transition, TransferMode};
use crate::status::{Direction, NodeEvent, StatusBoard, StatusEntry, StatusLevel};
use crate::transfer::{
    DEFAULT_TRANSFER_PORT, Decision, InboundCallback, InboundRequest, SelectedFile, SendOptions,
    TransferError, TransferListener, send_file,
};
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// 发送路径错误
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("No file selected")]
    NoFileSelected,

    #[error("No devices available")]
    NoPeer,

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

struct PendingInbound {
    request: InboundRequest,
    decision: oneshot::Sender<Decision>,
}

struct Session {
    machine: GestureMachine,
    selected: Option<SelectedFile>,
    /// 等待松开手势的入站请求，最多一个
    pending: Option<PendingInbound>,
    /// 已接受、正在接收的请求 id
    active_inbound: Option<u64>,
}

impl Session {
    fn busy(&self) -> bool {
        self.pending.is_some() || self.active_inbound.is_some()
    }
}

/// 当前采集任务
#[derive(Default)]
struct CaptureSlot {
    next_id: u64,
    active: Option<(u64, CancellationToken)>,
}

struct Shared {
    settings: AppSettings,
    send_options: SendOptions,
    directory: Arc<PeerDirectory>,
    status: StatusBoard,
    session: Mutex<Session>,
    capture: Mutex<CaptureSlot>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// 一个运行中的节点
pub struct Node {
    shared: Arc<Shared>,
    local_ip: IpAddr,
    transfer_port: u16,
    discovery_port: u16,
}

impl Node {
    /// 绑定所有 socket 并启动后台任务
    pub async fn start(settings: AppSettings) -> anyhow::Result<Self> {
        let local_ip = settings.local_ip.unwrap_or_else(resolve_local_ip);
        info!("Starting node '{}' on {}", settings.device_name, local_ip);

        let directory = Arc::new(PeerDirectory::new(Some(local_ip), settings.peer_ttl()));
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let transfer = TransferListener::bind(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), settings.transfer_port),
            settings.receive_options(),
        )
        .await?;
        let transfer_port = transfer.local_addr()?.port();

        let default_port = match settings.transfer_port {
            0 => DEFAULT_TRANSFER_PORT,
            port => port,
        };
        let discovery = DiscoveryListener::bind(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), settings.discovery_port),
            directory.clone(),
            local_ip,
            default_port,
        )
        .await?;
        let discovery_port = discovery.local_addr()?.port();

        let advertiser = Advertiser::bind(
            settings.broadcast_target(),
            &Announcement::new(settings.device_name.clone(), transfer_port),
            settings.announce_interval(),
        )
        .await?;

        let shared = Arc::new(Shared {
            send_options: settings.send_options(),
            session: Mutex::new(Session {
                machine: GestureMachine::new(settings.machine_config()),
                selected: None,
                pending: None,
                active_inbound: None,
            }),
            settings,
            directory,
            status: StatusBoard::new(),
            capture: Mutex::new(CaptureSlot::default()),
            cancel: cancel.clone(),
            tracker: tracker.clone(),
        });

        tracker.spawn(advertiser.run(cancel.clone()));
        tracker.spawn(discovery.run(cancel.clone()));
        tracker.spawn(transfer.run(shared.clone(), cancel.clone(), tracker.clone()));

        shared.set_status(
            StatusLevel::Info,
            "Application started. Select a file and start camera.",
        );

        Ok(Self {
            shared,
            local_ip,
            transfer_port,
            discovery_port,
        })
    }

    pub fn settings(&self) -> &AppSettings {
        &self.shared.settings
    }

    pub fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    /// 实际监听的传输端口
    pub fn transfer_port(&self) -> u16 {
        self.transfer_port
    }

    /// 实际监听的发现端口
    pub fn discovery_port(&self) -> u16 {
        self.discovery_port
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.shared.directory
    }

    /// 选择待发送的文件
    pub async fn select_file(&self, path: impl AsRef<Path>) -> Result<SelectedFile, TransferError> {
        let selected = match SelectedFile::inspect(path).await {
            Ok(selected) => selected,
            Err(e) => {
                self.shared
                    .set_status(StatusLevel::Error, format!("Cannot select file: {}", e));
                return Err(e);
            }
        };

        self.shared.session.lock().selected = Some(selected.clone());
        self.shared.set_status(
            StatusLevel::Info,
            "File selected. Make a grab gesture to initiate transfer.",
        );
        Ok(selected)
    }

    pub fn clear_selection(&self) {
        self.shared.session.lock().selected = None;
        self.shared
            .set_status(StatusLevel::Info, "Selection cleared.");
    }

    pub fn selected(&self) -> Option<SelectedFile> {
        self.shared.session.lock().selected.clone()
    }

    /// 开始从 `source` 采集手势，替换正在运行的采集
    pub fn start_capture<S>(&self, source: S)
    where
        S: FrameSource + 'static,
    {
        let token = self.shared.cancel.child_token();
        let (id, previous) = {
            let mut slot = self.shared.capture.lock();
            slot.next_id += 1;
            let id = slot.next_id;
            (id, slot.active.replace((id, token.clone())))
        };
        if let Some((_, previous)) = previous {
            previous.cancel();
            self.shared.abandon_grab();
        }

        self.shared
            .tracker
            .spawn(capture_loop(self.shared.clone(), source, id, token));
        self.shared
            .set_status(StatusLevel::Info, "Camera started. Ready for gestures.");
    }

    /// 停止采集，不影响进行中的传输；返回之前是否在采集
    pub fn stop_capture(&self) -> bool {
        let Some((_, token)) = self.shared.capture.lock().active.take() else {
            return false;
        };
        token.cancel();
        self.shared.abandon_grab();
        self.shared.set_status(StatusLevel::Info, "Camera stopped.");
        true
    }

    /// 清理过期设备后返回设备列表 (按首次发现顺序)
    pub fn refresh_peers(&self) -> Vec<PeerRecord> {
        let removed = self.shared.directory.prune(Instant::now());
        if removed > 0 {
            debug!("Pruned {} stale peers", removed);
        }
        self.shared.directory.snapshot()
    }

    pub fn current_status(&self) -> String {
        self.shared.status.current().message
    }

    pub fn status_entry(&self) -> StatusEntry {
        self.shared.status.current()
    }

    pub fn current_mode(&self) -> TransferMode {
        self.shared.mode()
    }

    /// 挂起的入站请求
    pub fn pending(&self) -> Option<InboundRequest> {
        self.shared
            .session
            .lock()
            .pending
            .as_ref()
            .map(|p| p.request.clone())
    }

    /// 明确拒绝挂起的入站请求；没有挂起请求时返回 `false`
    pub fn reject_pending(&self) -> bool {
        let pending = {
            let mut session = self.shared.session.lock();
            let pending = session.pending.take();
            if pending.is_some() {
                session.machine.inbound_finished();
            }
            pending
        };

        let Some(pending) = pending else {
            return false;
        };
        let _ = pending.decision.send(Decision::Reject);
        self.shared.set_status(
            StatusLevel::Info,
            format!("Rejected incoming file: {}", pending.request.filename),
        );
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.shared.status.subscribe()
    }

    /// 取消所有任务并等待它们退出，随后所有 socket 都已关闭
    pub async fn shutdown(&self) {
        info!("Shutting down node");
        self.shared.capture.lock().active.take();
        self.shared.cancel.cancel();
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        debug!("All node tasks finished");
    }
}

impl Shared {
    fn mode(&self) -> TransferMode {
        self.session.lock().machine.mode()
    }

    /// 采集停止即放弃抓取，下次采集必须重新保持满驻留时间
    fn abandon_grab(&self) {
        if self.session.lock().machine.reset_grab() {
            debug!("Grab abandoned because capture stopped");
        }
    }

    /// 采集循环退出时释放采集槽
    ///
    /// 返回 `false` 表示这个循环已被新的采集替换。
    fn release_capture(&self, id: u64) -> bool {
        let mut slot = self.capture.lock();
        match slot.active.as_ref().map(|(active, _)| *active) {
            Some(active) if active == id => {
                slot.active = None;
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    /// 不能在持有会话锁时调用
    fn set_status(&self, level: StatusLevel, message: impl Into<String>) {
        let mode = self.mode();
        self.status.set(level, message, mode);
    }

    fn process_frame(self: &Arc<Self>, frame: &CapturedFrame) {
        let sample = GestureSample::from_frame(frame.hand.as_ref(), frame.at);

        let mut session = self.session.lock();
        let ctx = FrameContext {
            file_selected: session.selected.is_some(),
            inbound_pending: session.pending.is_some(),
        };
        let Some(transition) = session.machine.step(sample.gesture, sample.at, ctx) else {
            return;
        };
        debug!("Gesture {} -> {:?}", sample.gesture.as_str(), transition);

        match transition {
            Transition::GrabStarted => {
                drop(session);
                self.set_status(StatusLevel::Info, "Grab detected. Hold to arm sender mode.");
            }
            Transition::EnterSenderMode => {
                drop(session);
                self.set_status(
                    StatusLevel::Info,
                    "Sender mode activated! Release gesture to send file.",
                );
            }
            Transition::GrabAbandoned => {
                drop(session);
                self.set_status(StatusLevel::Info, "Grab cancelled.");
            }
            Transition::FireSend => {
                let file = session.selected.clone();
                drop(session);
                self.spawn_send(file);
            }
            Transition::FireAccept => {
                let pending = session.pending.take();
                if let Some(p) = &pending {
                    session.active_inbound = Some(p.request.id);
                }
                drop(session);

                if let Some(p) = pending {
                    if p.decision.send(Decision::Accept).is_ok() {
                        self.set_status(
                            StatusLevel::Info,
                            format!("Accepted {}. Receiving...", p.request.filename),
                        );
                    } else {
                        // 连接任务已经退出，不会再有回调
                        let mut session = self.session.lock();
                        session.active_inbound = None;
                        session.machine.inbound_finished();
                    }
                }
            }
        }
    }

    fn spawn_send(self: &Arc<Self>, file: Option<SelectedFile>) {
        let shared = self.clone();
        self.tracker.spawn(async move {
            let cancel = shared.cancel.clone();
            tokio::select! {
                _ = cancel.cancelled() => debug!("Send cancelled by shutdown"),
                result = shared.send_selected(file.clone()) => shared.report_send(file, result),
            }
        });
    }

    async fn send_selected(&self, file: Option<SelectedFile>) -> Result<u64, SendError> {
        let file = file.ok_or(SendError::NoFileSelected)?;
        self.directory.prune(Instant::now());
        let target = self.directory.choose_target().ok_or(SendError::NoPeer)?;

        self.set_status(
            StatusLevel::Info,
            format!("Connecting to {} ({})...", target.display_name, target.address),
        );
        Ok(send_file(target.address, &file, &self.send_options).await?)
    }

    fn report_send(&self, file: Option<SelectedFile>, result: Result<u64, SendError>) {
        let filename = file.map(|f| f.file_name()).unwrap_or_default();

        let (success, detail) = match &result {
            Ok(bytes) => {
                self.set_status(StatusLevel::Info, "File sent successfully!");
                (true, format!("{} bytes sent", bytes))
            }
            Err(SendError::Transfer(TransferError::Rejected)) => {
                self.set_status(StatusLevel::Warn, "Transfer rejected by receiver");
                (false, "rejected".to_string())
            }
            Err(e @ (SendError::NoFileSelected | SendError::NoPeer)) => {
                self.set_status(
                    StatusLevel::Warn,
                    "No file selected or no devices available",
                );
                (false, e.to_string())
            }
            Err(e) => {
                self.set_status(StatusLevel::Error, format!("Error sending file: {}", e));
                (false, e.to_string())
            }
        };

        self.status.emit(NodeEvent::TransferFinished {
            direction: Direction::Outbound,
            filename,
            success,
            detail,
        });
    }

    /// 结束一次已接受的接收，返回这次接收是否属于当前会话
    fn finish_inbound(&self, request: &InboundRequest) -> bool {
        let mut session = self.session.lock();
        if session.active_inbound != Some(request.id) {
            return false;
        }
        session.active_inbound = None;
        session.machine.inbound_finished();
        true
    }
}

impl InboundCallback for Shared {
    fn on_request(&self, request: &InboundRequest, decision: oneshot::Sender<Decision>) -> bool {
        {
            let mut session = self.session.lock();
            if session.busy() {
                warn!(
                    "Rejecting {} from {}: another transfer is pending",
                    request.filename, request.peer
                );
                return false;
            }
            session.pending = Some(PendingInbound {
                request: request.clone(),
                decision,
            });
            session.machine.inbound_arrived();
        }

        self.status.emit(NodeEvent::IncomingRequest {
            filename: request.filename.clone(),
            size: request.size,
            peer: request.peer.to_string(),
        });
        self.set_status(
            StatusLevel::Info,
            format!(
                "Incoming file: {} ({} bytes). Release gesture to accept.",
                request.filename, request.size
            ),
        );
        true
    }

    fn on_withdrawn(&self, request: &InboundRequest) {
        let ours = {
            let mut session = self.session.lock();
            let pending = session
                .pending
                .as_ref()
                .is_some_and(|p| p.request.id == request.id);
            let active = session.active_inbound == Some(request.id);
            if pending {
                session.pending = None;
            }
            if active {
                session.active_inbound = None;
            }
            if pending || active {
                session.machine.inbound_finished();
            }
            pending || active
        };

        if ours {
            self.set_status(
                StatusLevel::Warn,
                format!("Incoming file {} was withdrawn", request.filename),
            );
            self.status.emit(NodeEvent::TransferFinished {
                direction: Direction::Inbound,
                filename: request.filename.clone(),
                success: false,
                detail: "withdrawn".to_string(),
            });
        }
    }

    fn on_complete(&self, request: &InboundRequest, path: &Path) {
        self.finish_inbound(request);
        self.set_status(
            StatusLevel::Info,
            format!("File received successfully: {}", path.display()),
        );
        self.status.emit(NodeEvent::TransferFinished {
            direction: Direction::Inbound,
            filename: request.filename.clone(),
            success: true,
            detail: path.display().to_string(),
        });
    }

    fn on_error(&self, request: &InboundRequest, error: &TransferError) {
        self.finish_inbound(request);
        self.set_status(StatusLevel::Error, format!("Error receiving file: {}", error));
        self.status.emit(NodeEvent::TransferFinished {
            direction: Direction::Inbound,
            filename: request.filename.clone(),
            success: false,
            detail: error.to_string(),
        });
    }
}

/// 采集循环，退出时释放帧来源
async fn capture_loop<S: FrameSource>(
    shared: Arc<Shared>,
    mut source: S,
    id: u64,
    cancel: CancellationToken,
) {
    info!("Gesture capture started");
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = source.next_frame() => frame,
        };

        match next {
            Ok(Some(frame)) => shared.process_frame(&frame),
            Ok(None) => {
                shared.set_status(StatusLevel::Info, "Landmark stream ended. Camera stopped.");
                break;
            }
            Err(e) => {
                shared.set_status(StatusLevel::Error, format!("Camera error: {}", e));
                break;
            }
        }
    }
    drop(source);
    if shared.release_capture(id) {
        shared.abandon_grab();
    }
    debug!("Gesture capture stopped");
}
