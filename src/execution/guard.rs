use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{PipelineError, PipelineResult};

/// Shared cancellation flag for one ingestion run.
///
/// Cloning shares the flag. The worker polls it at row-batch boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> PipelineResult<()> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Held for the lifetime of a client's active run; releases the busy flag on drop.
#[derive(Debug)]
pub(crate) struct ActiveIngestionGuard {
    flag: Arc<AtomicBool>,
}

impl ActiveIngestionGuard {
    pub(crate) fn begin(flag: Arc<AtomicBool>) -> PipelineResult<Self> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PipelineError::IngestionInProgress);
        }
        Ok(Self { flag })
    }
}

impl Drop for ActiveIngestionGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_is_exclusive_until_dropped() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = ActiveIngestionGuard::begin(Arc::clone(&flag)).unwrap();
        assert!(matches!(
            ActiveIngestionGuard::begin(Arc::clone(&flag)),
            Err(PipelineError::IngestionInProgress)
        ));
        drop(guard);
        assert!(ActiveIngestionGuard::begin(flag).is_ok());
    }

    #[test]
    fn token_clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        other.cancel();
        assert!(matches!(token.check(), Err(PipelineError::Cancelled)));
    }
}
