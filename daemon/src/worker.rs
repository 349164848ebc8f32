//! Fixed-interval polling threads with a per-tick failure boundary.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// Cleared to ask polling loops to exit after their current tick.
#[derive(Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs one unit of work, turning both errors and panics into a log line.
pub fn contain<T, F>(name: &str, work: F) -> Option<T>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!("[{}] tick failed: {:#}", name, e);
            None
        }
        Err(payload) => {
            error!("[{}] tick panicked: {}", name, panic_message(payload.as_ref()));
            None
        }
    }
}

/// Spawns a named thread that calls `tick` and then sleeps `interval`, until
/// `run` is cleared.
pub fn spawn_polling<F>(
    name: &str,
    interval: Duration,
    run: RunFlag,
    mut tick: F,
) -> std::io::Result<JoinHandle<()>>
where
    F: FnMut() -> anyhow::Result<()> + Send + 'static,
{
    let thread_name = name.to_string();
    thread::Builder::new().name(thread_name.clone()).spawn(move || {
        info!("[{}] worker started ({:?} interval)", thread_name, interval);
        while run.is_running() {
            contain(&thread_name, &mut tick);
            thread::sleep(interval);
        }
        info!("[{}] worker stopped", thread_name);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_contain_passes_value_through() {
        assert_eq!(contain("test", || Ok(7)), Some(7));
    }

    #[test]
    fn test_contain_swallows_errors() {
        let result: Option<()> = contain("test", || Err(anyhow::anyhow!("detector offline")));
        assert!(result.is_none());
    }

    #[test]
    fn test_contain_swallows_panics() {
        let result: Option<()> = contain("test", || panic!("model crashed"));
        assert!(result.is_none());
    }

    #[test]
    fn test_polling_survives_failing_ticks() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let run = RunFlag::new();
        let counter = Arc::clone(&ticks);

        let handle = spawn_polling("flaky", Duration::from_millis(1), run.clone(), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                panic!("tick {} exploded", n);
            }
            Err(anyhow::anyhow!("tick {} failed", n))
        })
        .unwrap();

        while ticks.load(Ordering::SeqCst) < 6 {
            thread::sleep(Duration::from_millis(1));
        }
        run.stop();
        handle.join().unwrap();
        assert!(ticks.load(Ordering::SeqCst) >= 6);
    }
}
