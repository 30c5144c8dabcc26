use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::info;

use crate::error::TranslateError;

/// Cooperative cancel and pause flags shared between the worker and its
/// controller. The worker polls them only at file and chunk boundaries.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    inner: Arc<ControlState>,
}

#[derive(Debug, Default)]
struct ControlState {
    cancelled: AtomicBool,
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        // Wake a paused worker so it can observe the cancellation.
        let _guard = self.inner.paused.lock();
        self.inner.resumed.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        *self.inner.paused.lock() = true;
    }

    pub fn resume(&self) {
        let mut paused = self.inner.paused.lock();
        *paused = false;
        self.inner.resumed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.lock()
    }

    /// Blocks while paused, then fails with `Cancelled` if cancellation was
    /// requested.
    pub fn checkpoint(&self) -> Result<(), TranslateError> {
        let mut paused = self.inner.paused.lock();
        if *paused && !self.is_cancelled() {
            info!("worker paused");
            while *paused && !self.is_cancelled() {
                self.inner.resumed.wait(&mut paused);
            }
            info!("worker resumed");
        }
        drop(paused);

        if self.is_cancelled() {
            return Err(TranslateError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_observed() {
        let control = RunControl::new();
        assert!(control.checkpoint().is_ok());
        control.cancel();
        assert!(matches!(control.checkpoint(), Err(TranslateError::Cancelled)));
    }

    #[test]
    fn test_pause_blocks_until_resume() {
        let control = RunControl::new();
        control.pause();

        let worker = {
            let control = control.clone();
            thread::spawn(move || control.checkpoint())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!worker.is_finished());

        control.resume();
        assert!(worker.join().unwrap().is_ok());
        assert!(!control.is_paused());
    }

    #[test]
    fn test_cancel_wakes_paused_worker() {
        let control = RunControl::new();
        control.pause();

        let worker = {
            let control = control.clone();
            thread::spawn(move || control.checkpoint())
        };
        thread::sleep(Duration::from_millis(20));
        control.cancel();
        assert!(matches!(
            worker.join().unwrap(),
            Err(TranslateError::Cancelled)
        ));
    }
}
