//! Recording provider used by tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use super::{CaptureRequest, CaptureSession, PlatformError, TorchPlatform};

/// A call observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorchCall {
    Acquire(CaptureRequest),
    Set { at: Instant, on: bool },
    Stop,
}

/// Shared call log
#[derive(Debug, Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<TorchCall>>>);

impl Recorder {
    fn push(&self, call: TorchCall) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<TorchCall> {
        self.0.lock().unwrap().clone()
    }

    pub fn acquisitions(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, TorchCall::Acquire(_))).count()
    }

    pub fn stops(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, TorchCall::Stop)).count()
    }

    /// Torch writes as (milliseconds after `start`, state)
    pub fn writes_since(&self, start: Instant) -> Vec<(u64, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                TorchCall::Set { at, on } => Some(((at - start).as_millis() as u64, on)),
                _ => None,
            })
            .collect()
    }
}

pub struct MockPlatform {
    supported: bool,
    deny: AtomicBool,
    recorder: Recorder,
}

impl MockPlatform {
    pub fn new(supported: bool) -> Self {
        Self {
            supported,
            deny: AtomicBool::new(false),
            recorder: Recorder::default(),
        }
    }

    /// Make the next acquisitions fail with a permission error
    pub fn deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    pub fn recorder(&self) -> Recorder {
        self.recorder.clone()
    }
}

#[async_trait]
impl TorchPlatform for MockPlatform {
    fn supports_torch(&self) -> bool {
        self.supported
    }

    async fn acquire(&self, request: CaptureRequest) -> Result<Box<dyn CaptureSession>, PlatformError> {
        self.recorder.push(TorchCall::Acquire(request));
        if self.deny.load(Ordering::SeqCst) {
            return Err(PlatformError::PermissionDenied("camera".to_string()));
        }
        Ok(Box::new(MockSession {
            recorder: self.recorder.clone(),
            released: false,
        }))
    }
}

struct MockSession {
    recorder: Recorder,
    released: bool,
}

impl CaptureSession for MockSession {
    fn set_torch(&mut self, on: bool) -> Result<(), PlatformError> {
        self.recorder.push(TorchCall::Set { at: Instant::now(), on });
        Ok(())
    }

    fn stop_tracks(&mut self) {
        if !self.released {
            self.released = true;
            self.recorder.push(TorchCall::Stop);
        }
    }

    fn label(&self) -> &str {
        "mock"
    }
}
