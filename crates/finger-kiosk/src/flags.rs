use std::sync::atomic::{AtomicBool, Ordering};

/// Cross-task state shared by `Arc`. The controller thread is the only
/// writer of `stop_requested` and `spoof_check_enabled`; the signal handler
/// only ever sets `shutdown`.
#[derive(Debug, Default)]
pub struct ControlFlags {
    stop_requested: AtomicBool,
    spoof_check_enabled: AtomicBool,
    shutdown: AtomicBool,
}

impl ControlFlags {
    pub fn new(spoof_check_enabled: bool) -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            spoof_check_enabled: AtomicBool::new(spoof_check_enabled),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn clear_stop(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// What cancellable waits poll: a stop request or process shutdown.
    pub fn should_stop(&self) -> bool {
        self.stop_requested() || self.shutdown_requested()
    }

    pub fn spoof_check_enabled(&self) -> bool {
        self.spoof_check_enabled.load(Ordering::SeqCst)
    }

    /// Flips the liveness policy and returns the new value.
    pub fn toggle_spoof_check(&self) -> bool {
        !self.spoof_check_enabled.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
