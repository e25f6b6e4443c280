use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-flight guard: at most one unit of work of a given kind may be
/// outstanding at a time. The detection loop uses one to skip ticks while
/// an inference call is in flight; the response router uses one per
/// provenance channel to reject duplicate dispatches.
///
/// A successful `try_acquire` returns an RAII permit; the guard stays
/// engaged until the permit is dropped.
#[derive(Debug, Clone)]
pub struct FlightGuard {
    engaged: Arc<AtomicBool>,
}

impl FlightGuard {
    pub fn new() -> Self {
        Self {
            engaged: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attempt to take the guard. Returns `None` while a permit is live.
    pub fn try_acquire(&self) -> Option<FlightPermit> {
        if self
            .engaged
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(FlightPermit {
                engaged: Arc::clone(&self.engaged),
            })
        } else {
            None
        }
    }

    /// Whether a permit is currently live.
    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }
}

impl Default for FlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Permit held for the duration of one unit of work. Dropping it releases
/// the guard.
#[derive(Debug)]
pub struct FlightPermit {
    engaged: Arc<AtomicBool>,
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.engaged.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_permit_at_a_time() {
        let guard = FlightGuard::new();
        assert!(!guard.is_engaged());

        let permit = guard.try_acquire().expect("first acquire should succeed");
        assert!(guard.is_engaged());
        assert!(guard.try_acquire().is_none());

        drop(permit);
        assert!(!guard.is_engaged());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let guard = FlightGuard::new();
        let other = guard.clone();

        let _permit = guard.try_acquire().unwrap();
        assert!(other.is_engaged());
        assert!(other.try_acquire().is_none());
    }

    #[tokio::test]
    async fn test_permit_survives_across_await() {
        let guard = FlightGuard::new();
        let permit = guard.try_acquire().unwrap();

        tokio::task::yield_now().await;
        assert!(guard.is_engaged());

        drop(permit);
        assert!(!guard.is_engaged());
    }
}
