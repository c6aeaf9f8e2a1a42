use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use signal_hook::consts::TERM_SIGNALS;
#[cfg(unix)]
use signal_hook::consts::signal::SIGHUP;

/// Granularity of cancellable sleeps.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Cooperative cancellation flag shared between signal handlers and the retry loop.
///
/// Cloning is cheap; all clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `true` if the sleep was cut short by cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

/// Register SIGINT, SIGTERM and SIGHUP handlers and return the token they set.
///
/// Signals only set the flag; the process always unwinds normally so the lease
/// and credential file are released by their `Drop` impls.
pub fn cancel_on_signals() -> CancelToken {
    let token = CancelToken::new();
    for &sig in TERM_SIGNALS {
        if let Err(e) = signal_hook::flag::register(sig, Arc::clone(&token.0)) {
            tracing::warn!(signal = sig, "cannot register signal handler: {e}");
        }
    }
    #[cfg(unix)]
    if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&token.0)) {
        tracing::warn!("cannot register SIGHUP handler: {e}");
    }
    token
}
