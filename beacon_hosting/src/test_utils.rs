//! In-memory [`HostingAdapter`] whose behaviour can be scripted by tests
use crate::{AllocationData, HostingAdapter, HostingError, HostingEvent, Result};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use core::time::Duration;
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// What [`MockHostingAdapter::initialize`](HostingAdapter::initialize) returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializeOutcome {
    Connected,
    Unavailable,
    Error,
}

pub struct MockHostingAdapter {
    events: broadcast::Sender<HostingEvent>,
    health_check_interval: Duration,
    initialize: InitializeOutcome,
    fail_ready: AtomicBool,
    fail_health_check: AtomicBool,
    fail_shutdown: AtomicBool,
    /// `None` makes `fetch_allocation_data` fail
    allocation: Mutex<Option<AllocationData>>,

    initialize_calls: AtomicUsize,
    ready_calls: AtomicUsize,
    health_checks: AtomicUsize,
    shutdown_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl Default for MockHostingAdapter {
    fn default() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            events,
            health_check_interval: Duration::from_secs(5),
            initialize: InitializeOutcome::Connected,
            fail_ready: AtomicBool::new(false),
            fail_health_check: AtomicBool::new(false),
            fail_shutdown: AtomicBool::new(false),
            allocation: Mutex::new(Some(AllocationData::default())),
            initialize_calls: AtomicUsize::new(0),
            ready_calls: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }
}

impl MockHostingAdapter {
    pub fn new(initialize: InitializeOutcome) -> Self {
        Self {
            initialize,
            ..Default::default()
        }
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_allocation(self, allocation: AllocationData) -> Self {
        *self.allocation.lock() = Some(allocation);
        self
    }

    pub fn failing_allocation(self) -> Self {
        *self.allocation.lock() = None;
        self
    }

    pub fn failing_ready(self) -> Self {
        self.fail_ready.store(true, Ordering::Relaxed);
        self
    }

    pub fn set_fail_health_check(&self, fail: bool) {
        self.fail_health_check.store(fail, Ordering::Relaxed);
    }

    pub fn failing_shutdown(self) -> Self {
        self.fail_shutdown.store(true, Ordering::Relaxed);
        self
    }

    /// Raise a platform event. Returns the number of listeners that received it.
    pub fn emit(&self, event: HostingEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::Relaxed)
    }

    pub fn ready_calls(&self) -> usize {
        self.ready_calls.load(Ordering::Relaxed)
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::Relaxed)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::Relaxed)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::Relaxed)
    }
}

fn scripted_failure(fail: &AtomicBool, call: &str) -> Result<()> {
    if fail.load(Ordering::Relaxed) {
        Err(HostingError::Rejected(format!("scripted {call} failure")))
    } else {
        Ok(())
    }
}

#[async_trait::async_trait]
impl HostingAdapter for MockHostingAdapter {
    async fn initialize(&self) -> Result<bool> {
        self.initialize_calls.fetch_add(1, Ordering::Relaxed);
        match self.initialize {
            InitializeOutcome::Connected => Ok(true),
            InitializeOutcome::Unavailable => Ok(false),
            InitializeOutcome::Error => Err(HostingError::Rejected(
                "scripted initialize failure".to_string(),
            )),
        }
    }

    async fn ready(&self) -> Result<()> {
        self.ready_calls.fetch_add(1, Ordering::Relaxed);
        scripted_failure(&self.fail_ready, "ready")
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown_calls.fetch_add(1, Ordering::Relaxed);
        scripted_failure(&self.fail_shutdown, "shutdown")
    }

    async fn health_check(&self) -> Result<()> {
        self.health_checks.fetch_add(1, Ordering::Relaxed);
        scripted_failure(&self.fail_health_check, "health check")
    }

    fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }

    async fn fetch_allocation_data(&self) -> Result<AllocationData> {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        self.allocation
            .lock()
            .clone()
            .ok_or(HostingError::Timeout)
    }

    fn subscribe(&self) -> broadcast::Receiver<HostingEvent> {
        self.events.subscribe()
    }
}
