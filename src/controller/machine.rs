//! Core torch controller
//!
//! Owns the torch session and the blink timer, and runs every transition
//! on a single task: UI commands, acquisition results and timer firings all
//! arrive through one inbox and are handled one at a time.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::{Label, Notice, TorchEvent};
use crate::platform::{CaptureRequest, CaptureSession, PlatformError, TorchPlatform};

use super::pattern::{sos_on_duration, PatternKind, PeriodBounds, Selection, SOS_SEQUENCE};
use super::timer::{self, BlinkTimer};

/// Operator commands raised by the UI surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start the session when idle, stop it when active
    Toggle,
    /// Choose the blink pattern
    SelectPattern(PatternKind),
    /// Choose the blink period in milliseconds
    SetSpeed(u64),
}

/// Errors returned to the issuer of a command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("torch control is not supported on this device")]
    Unsupported,

    #[error("a torch session request is already outstanding")]
    AcquisitionPending,

    #[error("period {period_ms}ms is outside {min_ms}..={max_ms}ms")]
    InvalidPeriod { period_ms: u64, min_ms: u64, max_ms: u64 },

    #[error("torch controller is not running")]
    ControllerGone,
}

impl ControlError {
    /// Stable code used in IPC error responses
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::Unsupported => "unsupported",
            ControlError::AcquisitionPending => "acquisition_pending",
            ControlError::InvalidPeriod { .. } => "invalid_period",
            ControlError::ControllerGone => "controller_gone",
        }
    }
}

/// Everything the controller task reacts to
pub enum Input {
    Command {
        command: Command,
        reply: Option<oneshot::Sender<Result<(), ControlError>>>,
    },
    Status(oneshot::Sender<TorchStatus>),
    Dispose(oneshot::Sender<()>),
    Acquired {
        request_id: u64,
        result: Result<Box<dyn CaptureSession>, PlatformError>,
    },
    Tick {
        timer_id: u64,
    },
    FlipOff {
        timer_id: u64,
    },
}

/// Externally visible phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// No torch on this device
    Disabled,
    Idle,
    /// Session requested, result not yet delivered
    Acquiring,
    Active,
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseKind::Disabled => write!(f, "Disabled"),
            PhaseKind::Idle => write!(f, "Idle"),
            PhaseKind::Acquiring => write!(f, "Acquiring"),
            PhaseKind::Active => write!(f, "Active"),
        }
    }
}

/// Snapshot of controller state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorchStatus {
    pub phase: PhaseKind,
    pub label: Label,
    pub torch_on: bool,
    pub pattern: PatternKind,
    pub period_ms: u64,
    pub trigger_enabled: bool,
    pub timer_active: bool,
    pub last_notice: Option<Notice>,
}

enum Phase {
    Disabled,
    Idle,
    Acquiring { request_id: u64 },
    Active(ActiveSession),
}

impl Phase {
    fn kind(&self) -> PhaseKind {
        match self {
            Phase::Disabled => PhaseKind::Disabled,
            Phase::Idle => PhaseKind::Idle,
            Phase::Acquiring { .. } => PhaseKind::Acquiring,
            Phase::Active(_) => PhaseKind::Active,
        }
    }
}

struct ActiveSession {
    capture: Box<dyn CaptureSession>,
    timer: Option<BlinkTimer>,
    /// Pattern the current timer was armed with
    armed: Selection,
    /// Position in the SOS sequence
    cursor: usize,
    started_at: Instant,
}

/// The torch state machine
pub struct TorchController {
    platform: Arc<dyn TorchPlatform>,
    phase: Phase,
    is_on: bool,
    label: Label,
    selection: Selection,
    bounds: PeriodBounds,
    last_notice: Option<Notice>,
    next_id: u64,
    /// Sender side of our own inbox, handed to timers and acquisitions
    inbox: mpsc::Sender<Input>,
    event_tx: broadcast::Sender<TorchEvent>,
}

impl TorchController {
    /// Create the controller and run the capability check
    pub fn init(
        platform: Arc<dyn TorchPlatform>,
        selection: Selection,
        bounds: PeriodBounds,
        inbox: mpsc::Sender<Input>,
        event_tx: broadcast::Sender<TorchEvent>,
    ) -> Self {
        let mut controller = Self {
            platform,
            phase: Phase::Idle,
            is_on: false,
            label: Label::Start,
            selection,
            bounds,
            last_notice: None,
            next_id: 0,
            inbox,
            event_tx,
        };

        if controller.platform.supports_torch() {
            info!(
                pattern = %selection.kind,
                period_ms = selection.period_ms,
                "torch control available"
            );
        } else {
            warn!("torch control not supported, disabling trigger");
            controller.phase = Phase::Disabled;
            controller.notify(Notice::CapabilityUnsupported);
            controller.emit(TorchEvent::TriggerDisabled);
        }

        controller
    }

    /// Process inputs until disposed
    pub async fn run(mut self, mut inbox: mpsc::Receiver<Input>) {
        info!(phase = %self.phase.kind(), "torch controller started");

        while let Some(input) = inbox.recv().await {
            let last = matches!(input, Input::Dispose(_));
            self.handle(input);
            if last {
                break;
            }
        }

        info!("torch controller stopped");
    }

    /// Handle a single input
    pub fn handle(&mut self, input: Input) {
        match input {
            Input::Command { command, reply } => {
                let result = self.execute(command);
                if let Err(e) = &result {
                    debug!(?command, %e, "command rejected");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Input::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Input::Dispose(done) => {
                self.dispose();
                let _ = done.send(());
            }
            Input::Acquired { request_id, result } => self.on_acquired(request_id, result),
            Input::Tick { timer_id } => self.on_tick(timer_id),
            Input::FlipOff { timer_id } => self.on_flip_off(timer_id),
        }
    }

    /// Apply an operator command
    pub fn execute(&mut self, command: Command) -> Result<(), ControlError> {
        match command {
            Command::Toggle => match self.phase {
                Phase::Disabled => Err(ControlError::Unsupported),
                Phase::Acquiring { .. } => Err(ControlError::AcquisitionPending),
                Phase::Active(_) => {
                    self.stop_session();
                    Ok(())
                }
                Phase::Idle => {
                    self.start_session();
                    Ok(())
                }
            },
            Command::SelectPattern(kind) => {
                self.selection.kind = kind;
                self.reapply();
                Ok(())
            }
            Command::SetSpeed(period_ms) => {
                if !self.bounds.contains(period_ms) {
                    return Err(ControlError::InvalidPeriod {
                        period_ms,
                        min_ms: self.bounds.min_ms,
                        max_ms: self.bounds.max_ms,
                    });
                }
                self.selection.period_ms = period_ms;
                self.reapply();
                Ok(())
            }
        }
    }

    pub fn status(&self) -> TorchStatus {
        let timer_active = match &self.phase {
            Phase::Active(session) => session.timer.is_some(),
            _ => false,
        };

        TorchStatus {
            phase: self.phase.kind(),
            label: self.label,
            torch_on: self.is_on,
            pattern: self.selection.kind,
            period_ms: self.selection.period_ms,
            trigger_enabled: !matches!(self.phase, Phase::Disabled),
            timer_active,
            last_notice: self.last_notice.clone(),
        }
    }

    /// Release everything ahead of shutdown
    pub fn dispose(&mut self) {
        self.stop_session();
        info!("torch controller disposed");
    }

    fn start_session(&mut self) {
        let request_id = self.next_id();
        self.phase = Phase::Acquiring { request_id };
        info!(from = %PhaseKind::Idle, to = %PhaseKind::Acquiring, request_id, "state transition");

        let platform = Arc::clone(&self.platform);
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let result = platform.acquire(CaptureRequest::rear_torch()).await;
            // A session that cannot be delivered is released when dropped
            let _ = inbox.send(Input::Acquired { request_id, result }).await;
        });
    }

    fn on_acquired(&mut self, request_id: u64, result: Result<Box<dyn CaptureSession>, PlatformError>) {
        let expected = matches!(self.phase, Phase::Acquiring { request_id: pending } if pending == request_id);
        if !expected {
            debug!(request_id, "stale acquisition result discarded");
            if let Ok(mut capture) = result {
                capture.stop_tracks();
            }
            return;
        }

        match result {
            Ok(capture) => {
                let device = capture.label().to_string();
                self.phase = Phase::Active(ActiveSession {
                    capture,
                    timer: None,
                    armed: self.selection,
                    cursor: 0,
                    started_at: Instant::now(),
                });
                self.is_on = true;
                info!(from = %PhaseKind::Acquiring, to = %PhaseKind::Active, %device, "state transition");

                self.emit(TorchEvent::SessionStarted { device });
                self.emit(TorchEvent::TorchChanged { on: true });
                self.set_label(Label::Stop);
                self.apply_pattern();
            }
            Err(e) => {
                warn!(%e, "failed to acquire torch session");
                self.phase = Phase::Idle;
                info!(from = %PhaseKind::Acquiring, to = %PhaseKind::Idle, "state transition");
                self.notify(Notice::AcquisitionFailed { reason: e.to_string() });
            }
        }
    }

    /// Release the session and cancel the pattern. Safe to call in any phase.
    pub fn stop_session(&mut self) {
        let previous = std::mem::replace(&mut self.phase, Phase::Idle);
        let from = previous.kind();

        match previous {
            Phase::Disabled => {
                self.phase = Phase::Disabled;
            }
            Phase::Active(mut session) => {
                drop(session.timer.take());
                session.capture.stop_tracks();

                let duration_ms = session.started_at.elapsed().as_millis() as u64;
                info!(from = %from, to = %PhaseKind::Idle, duration_ms, "state transition");
                self.emit(TorchEvent::SessionStopped { duration_ms });
            }
            Phase::Acquiring { request_id } => {
                info!(from = %from, to = %PhaseKind::Idle, request_id, "state transition");
            }
            Phase::Idle => {}
        }

        if self.is_on {
            self.is_on = false;
            self.emit(TorchEvent::TorchChanged { on: false });
        }
        self.set_label(Label::Start);
    }

    fn reapply(&mut self) {
        if matches!(self.phase, Phase::Active(_)) {
            self.apply_pattern();
        }
    }

    /// Replace the running pattern with the current selection
    fn apply_pattern(&mut self) {
        let timer_id = self.next_id();
        let selection = self.selection;

        let Phase::Active(session) = &mut self.phase else {
            debug!("no active session, pattern not applied");
            return;
        };

        // The old timer must be gone before the new one is armed
        drop(session.timer.take());
        session.armed = selection;
        session.cursor = 0;
        session.timer = Some(BlinkTimer::repeating(timer_id, selection.period(), self.inbox.clone()));

        info!(
            pattern = %selection.kind,
            period_ms = selection.period_ms,
            timer_id,
            "blink pattern applied"
        );
        self.emit(TorchEvent::PatternApplied {
            pattern: selection.kind,
            period_ms: selection.period_ms,
        });
    }

    fn on_tick(&mut self, timer_id: u64) {
        let Some(session) = self.live_session(timer_id) else {
            debug!(timer_id, "stale tick ignored");
            return;
        };

        let armed = session.armed;
        match armed.kind {
            PatternKind::Steady => self.toggle_torch(),
            PatternKind::Sos => {
                let index = session.cursor;
                session.cursor = (index + 1) % SOS_SEQUENCE.len();
                let on_for = sos_on_duration(index, armed.period_ms);

                self.set_torch(true);
                timer::defer(on_for, self.inbox.clone(), Input::FlipOff { timer_id });
            }
        }
    }

    fn on_flip_off(&mut self, timer_id: u64) {
        if self.live_session(timer_id).is_none() {
            debug!(timer_id, "stale flip-off ignored");
            return;
        }
        self.set_torch(false);
    }

    /// The active session, if `timer_id` is its current timer
    fn live_session(&mut self, timer_id: u64) -> Option<&mut ActiveSession> {
        match &mut self.phase {
            Phase::Active(session) if session.timer.as_ref().map(BlinkTimer::id) == Some(timer_id) => {
                Some(session)
            }
            _ => None,
        }
    }

    fn toggle_torch(&mut self) {
        self.set_torch(!self.is_on);
    }

    /// Write the torch state. No-op without an active session.
    fn set_torch(&mut self, on: bool) {
        let Phase::Active(session) = &mut self.phase else {
            return;
        };

        if let Err(e) = session.capture.set_torch(on) {
            warn!(on, %e, "torch write failed");
            return;
        }

        if self.is_on != on {
            self.is_on = on;
            self.emit(TorchEvent::TorchChanged { on });
        }
    }

    fn set_label(&mut self, label: Label) {
        if self.label != label {
            self.label = label;
            self.emit(TorchEvent::LabelChanged { label });
        }
    }

    fn notify(&mut self, notice: Notice) {
        warn!(%notice, "notice");
        self.last_notice = Some(notice.clone());
        self.emit(TorchEvent::Notice { notice });
    }

    fn emit(&self, event: TorchEvent) {
        debug!(%event, "emitting event");
        let _ = self.event_tx.send(event);
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout_at;
    use tokio_test::{assert_err, assert_ok};

    use crate::platform::mock::{MockPlatform, Recorder, TorchCall};
    use crate::platform::SysfsTorch;

    struct Harness {
        ctl: TorchController,
        inbox: mpsc::Receiver<Input>,
        events: broadcast::Receiver<TorchEvent>,
        platform: Arc<MockPlatform>,
        recorder: Recorder,
    }

    impl Harness {
        fn new(supported: bool, kind: PatternKind, period_ms: u64) -> Self {
            let platform = Arc::new(MockPlatform::new(supported));
            let recorder = platform.recorder();
            let (inbox_tx, inbox) = mpsc::channel(64);
            let (event_tx, events) = broadcast::channel(256);
            let ctl = TorchController::init(
                platform.clone(),
                Selection { kind, period_ms },
                PeriodBounds::default(),
                inbox_tx,
                event_tx,
            );
            Self {
                ctl,
                inbox,
                events,
                platform,
                recorder,
            }
        }

        /// Toggle and deliver the acquisition result
        async fn start(&mut self) {
            assert_ok!(self.ctl.execute(Command::Toggle));
            let input = self.inbox.recv().await.unwrap();
            self.ctl.handle(input);
        }

        /// Feed every input that arrives within `ms`
        async fn drive_for(&mut self, ms: u64) {
            let deadline = Instant::now() + Duration::from_millis(ms);
            while let Ok(Some(input)) = timeout_at(deadline, self.inbox.recv()).await {
                self.ctl.handle(input);
            }
        }

        fn drain_events(&mut self) -> Vec<TorchEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state() {
        let h = Harness::new(true, PatternKind::Steady, 500);
        let status = h.ctl.status();
        assert_eq!(status.phase, PhaseKind::Idle);
        assert_eq!(status.label, Label::Start);
        assert!(!status.torch_on);
        assert!(status.trigger_enabled);
        assert!(!status.timer_active);
        assert_eq!(status.last_notice, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_disables_trigger_for_good() {
        let mut h = Harness::new(false, PatternKind::Steady, 500);

        assert_eq!(
            h.drain_events(),
            vec![
                TorchEvent::Notice {
                    notice: Notice::CapabilityUnsupported
                },
                TorchEvent::TriggerDisabled,
            ]
        );

        for _ in 0..3 {
            assert_eq!(h.ctl.execute(Command::Toggle), Err(ControlError::Unsupported));
        }
        h.ctl.stop_session();
        h.drive_for(1000).await;

        let status = h.ctl.status();
        assert_eq!(status.phase, PhaseKind::Disabled);
        assert!(!status.trigger_enabled);
        assert_eq!(status.last_notice, Some(Notice::CapabilityUnsupported));
        assert_eq!(h.recorder.acquisitions(), 0);
        assert!(h.drain_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_success_runs_steady_pattern() {
        let mut h = Harness::new(true, PatternKind::Steady, 500);
        let t0 = Instant::now();
        h.start().await;

        let status = h.ctl.status();
        assert_eq!(status.phase, PhaseKind::Active);
        assert!(status.torch_on);
        assert_eq!(status.label, Label::Stop);
        assert!(status.timer_active);
        assert_eq!(
            h.recorder.calls()[0],
            TorchCall::Acquire(CaptureRequest::rear_torch())
        );

        h.drive_for(1750).await;
        assert_eq!(
            h.recorder.writes_since(t0),
            vec![(500, false), (1000, true), (1500, false)]
        );
        assert!(!h.ctl.status().torch_on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_emits_events_in_order() {
        let mut h = Harness::new(true, PatternKind::Sos, 1000);
        h.start().await;

        assert_eq!(
            h.drain_events(),
            vec![
                TorchEvent::SessionStarted {
                    device: "mock".to_string()
                },
                TorchEvent::TorchChanged { on: true },
                TorchEvent::LabelChanged { label: Label::Stop },
                TorchEvent::PatternApplied {
                    pattern: PatternKind::Sos,
                    period_ms: 1000
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reports_torch_dark() {
        let mut h = Harness::new(true, PatternKind::Sos, 1000);
        h.start().await;
        h.drain_events();

        h.ctl.stop_session();
        let events = h.drain_events();
        assert!(matches!(events[0], TorchEvent::SessionStopped { .. }));
        assert_eq!(
            events[1..],
            [
                TorchEvent::TorchChanged { on: false },
                TorchEvent::LabelChanged { label: Label::Start },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sos_pattern_timing() {
        let mut h = Harness::new(true, PatternKind::Sos, 1000);
        let t0 = Instant::now();
        h.start().await;

        h.drive_for(4700).await;
        assert_eq!(
            h.recorder.writes_since(t0),
            vec![
                (1000, true),
                (1200, false),
                (2000, true),
                (2200, false),
                (3000, true),
                (3200, false),
                (4000, true),
                (4600, false),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sos_cursor_wraps_after_nine_flashes() {
        let mut h = Harness::new(true, PatternKind::Sos, 1000);
        let t0 = Instant::now();
        h.start().await;

        h.drive_for(10_700).await;
        let writes = h.recorder.writes_since(t0);
        let on_times: Vec<u64> = writes
            .chunks(2)
            .map(|pair| {
                assert_eq!((pair[0].1, pair[1].1), (true, false));
                pair[1].0 - pair[0].0
            })
            .collect();
        assert_eq!(on_times, vec![200, 200, 200, 600, 600, 600, 200, 200, 200, 200]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sos_flash_clamped_at_fast_period() {
        let mut h = Harness::new(true, PatternKind::Sos, 400);
        let t0 = Instant::now();
        h.start().await;

        h.drive_for(1700).await;
        // Fourth flash wants 600ms but the period only allows 300ms
        assert_eq!(
            h.recorder.writes_since(t0),
            vec![
                (400, true),
                (600, false),
                (800, true),
                (1000, false),
                (1200, true),
                (1400, false),
                (1600, true),
            ]
        );
        h.drive_for(250).await;
        assert_eq!(h.recorder.writes_since(t0).last(), Some(&(1900, false)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_denied_stays_idle() {
        let mut h = Harness::new(true, PatternKind::Steady, 500);
        h.platform.deny(true);
        h.start().await;

        let status = h.ctl.status();
        assert_eq!(status.phase, PhaseKind::Idle);
        assert!(!status.torch_on);
        assert_eq!(status.label, Label::Start);
        assert!(matches!(status.last_notice, Some(Notice::AcquisitionFailed { .. })));
        assert!(matches!(
            h.drain_events().as_slice(),
            [TorchEvent::Notice {
                notice: Notice::AcquisitionFailed { .. }
            }]
        ));

        // No automatic retry
        h.drive_for(2000).await;
        assert_eq!(h.recorder.acquisitions(), 1);

        // The operator may try again
        h.platform.deny(false);
        h.start().await;
        assert_eq!(h.ctl.status().phase, PhaseKind::Active);
        assert_eq!(h.recorder.acquisitions(), 2);
    }

    #[tokio::test]
    async fn test_torch_removed_after_init_reports_failure() {
        let root = tempfile::TempDir::new().unwrap();
        let led = root.path().join("white:flash");
        std::fs::create_dir_all(&led).unwrap();
        std::fs::write(led.join("brightness"), "0\n").unwrap();
        std::fs::write(led.join("max_brightness"), "255\n").unwrap();

        let (inbox_tx, mut inbox) = mpsc::channel(8);
        let (event_tx, _) = broadcast::channel(8);
        let mut ctl = TorchController::init(
            Arc::new(SysfsTorch::new(root.path(), None)),
            Selection::default(),
            PeriodBounds::default(),
            inbox_tx,
            event_tx,
        );
        assert!(ctl.status().trigger_enabled);

        std::fs::remove_dir_all(&led).unwrap();
        assert_ok!(ctl.execute(Command::Toggle));
        let input = inbox.recv().await.unwrap();
        ctl.handle(input);

        let status = ctl.status();
        assert_eq!(status.phase, PhaseKind::Idle);
        assert!(!status.torch_on);
        assert_eq!(
            status.last_notice,
            Some(Notice::AcquisitionFailed {
                reason: PlatformError::Unsupported.to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_rejected_while_pending() {
        let mut h = Harness::new(true, PatternKind::Steady, 500);

        assert_ok!(h.ctl.execute(Command::Toggle));
        assert_eq!(h.ctl.status().phase, PhaseKind::Acquiring);
        assert_eq!(h.ctl.status().label, Label::Start);
        assert_eq!(h.ctl.execute(Command::Toggle), Err(ControlError::AcquisitionPending));

        let input = h.inbox.recv().await.unwrap();
        h.ctl.handle(input);
        assert_eq!(h.ctl.status().phase, PhaseKind::Active);
        assert_eq!(h.recorder.acquisitions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_acquisition_after_stop_is_released() {
        let mut h = Harness::new(true, PatternKind::Steady, 500);

        assert_ok!(h.ctl.execute(Command::Toggle));
        h.ctl.dispose();
        h.drive_for(100).await;

        assert_eq!(h.ctl.status().phase, PhaseKind::Idle);
        assert_eq!(h.recorder.acquisitions(), 1);
        assert_eq!(h.recorder.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_held_iff_started_and_not_stopped() {
        let mut h = Harness::new(true, PatternKind::Steady, 500);

        for round in 1..=3 {
            h.start().await;
            assert_eq!(h.ctl.status().phase, PhaseKind::Active);
            assert_eq!(h.recorder.stops(), round - 1);

            assert_ok!(h.ctl.execute(Command::Toggle));
            assert_eq!(h.ctl.status().phase, PhaseKind::Idle);
            assert_eq!(h.recorder.stops(), round);
        }
        assert_eq!(h.recorder.acquisitions(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let mut h = Harness::new(true, PatternKind::Steady, 500);
        h.start().await;

        h.ctl.stop_session();
        let once = h.ctl.status();
        h.drain_events();

        h.ctl.stop_session();
        assert_eq!(h.ctl.status(), once);
        assert_eq!(h.recorder.stops(), 1);
        assert!(h.drain_events().is_empty());
        assert_eq!(once.label, Label::Start);
        assert!(!once.timer_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reapply_keeps_a_single_timer() {
        let mut h = Harness::new(true, PatternKind::Steady, 500);
        let t0 = Instant::now();
        h.start().await;

        assert_ok!(h.ctl.execute(Command::SetSpeed(500)));
        assert_ok!(h.ctl.execute(Command::SetSpeed(500)));
        assert!(h.ctl.status().timer_active);

        h.drive_for(1250).await;
        assert_eq!(h.recorder.writes_since(t0), vec![(500, false), (1000, true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_change_rearms_timer() {
        let mut h = Harness::new(true, PatternKind::Steady, 500);
        let t0 = Instant::now();
        h.start().await;

        h.drive_for(600).await;
        assert_ok!(h.ctl.execute(Command::SetSpeed(1000)));
        h.drive_for(2100).await;

        assert_eq!(
            h.recorder.writes_since(t0),
            vec![(500, false), (1600, true), (2600, false)]
        );
        assert_eq!(h.ctl.status().period_ms, 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_pattern_ignores_pending_flip_off() {
        let mut h = Harness::new(true, PatternKind::Sos, 1000);
        let t0 = Instant::now();
        h.start().await;

        // Flash lit at 1000, its flip-off is due at 1200
        h.drive_for(1100).await;
        assert_ok!(h.ctl.execute(Command::SelectPattern(PatternKind::Steady)));
        h.drive_for(1200).await;

        assert_eq!(h.recorder.writes_since(t0), vec![(1000, true), (2100, false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_period_rejected() {
        let mut h = Harness::new(true, PatternKind::Steady, 500);

        assert_eq!(
            h.ctl.execute(Command::SetSpeed(0)),
            Err(ControlError::InvalidPeriod {
                period_ms: 0,
                min_ms: 100,
                max_ms: 5000
            })
        );
        assert_err!(h.ctl.execute(Command::SetSpeed(99)));
        assert_err!(h.ctl.execute(Command::SetSpeed(5001)));
        assert_eq!(h.ctl.status().period_ms, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_while_idle_arms_nothing() {
        let mut h = Harness::new(true, PatternKind::Steady, 500);

        assert_ok!(h.ctl.execute(Command::SelectPattern(PatternKind::Sos)));
        assert_ok!(h.ctl.execute(Command::SetSpeed(800)));
        h.drive_for(2000).await;

        let status = h.ctl.status();
        assert_eq!(status.pattern, PatternKind::Sos);
        assert_eq!(status.period_ms, 800);
        assert!(!status.timer_active);
        assert!(h.recorder.calls().is_empty());
        assert!(h.drain_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_after_stop_is_absorbed() {
        let mut h = Harness::new(true, PatternKind::Sos, 1000);
        let t0 = Instant::now();
        h.start().await;

        // Flip-off for the flash at 1000 is still pending
        h.drive_for(1100).await;
        h.ctl.stop_session();
        let stopped = h.ctl.status();
        let writes = h.recorder.writes_since(t0);
        h.drain_events();

        h.drive_for(3000).await;
        h.ctl.handle(Input::Tick { timer_id: 1 });
        h.ctl.handle(Input::FlipOff { timer_id: 2 });

        assert_eq!(h.ctl.status(), stopped);
        assert_eq!(h.recorder.writes_since(t0), writes);
        assert!(h.drain_events().is_empty());
    }
}
