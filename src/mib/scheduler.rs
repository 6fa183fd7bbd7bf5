//! The cooperative updater scheduler: each updater runs `reinit`/`update` on its own
//! cadence, sharing one logical thread so request handling is never blocked by a slow refresh.
//! Pacing adapts to measured cost so a cycle that runs long yields proportionally more idle time
//! before the next one.

use crate::error::AgentError;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use log::{debug, error, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One independently-paced data source. `reinit` rebuilds the sub_id index and any derived maps
/// (idempotent: safe to call repeatedly); `update` refreshes the published values for the
/// current index. Implementors own their own DB connections and caches.
pub trait Updater: Send + Sync {
    fn name(&self) -> &str;

    /// Static floor for the pacing formula in [`next_interval`]. Defaults to a 5s baseline.
    fn static_interval(&self) -> Duration {
        Duration::from_secs(5)
    }

    /// How many `update()` cycles elapse between `reinit()` calls. Defaults large enough that
    /// topology is re-read roughly once a minute at the 5s baseline.
    fn reinit_rate(&self) -> u32 {
        12
    }

    fn reinit(&self) -> Result<(), AgentError>;
    fn update(&self) -> Result<(), AgentError>;
}

/// `R`: the idle-to-busy ratio a slow update must yield to keep request latency bounded.
pub const PACING_RATIO: u64 = 10;
pub const MAX_INTERVAL: Duration = Duration::from_secs(60);

/// `T_next = max(T_static, min(MAX_INTERVAL, ceil(Δ · R)))`. A zero or negative `Δ` (clock noise)
/// is treated as zero.
pub fn next_interval(elapsed: Duration, static_interval: Duration) -> Duration {
    let scaled_ms = elapsed.as_millis().saturating_mul(PACING_RATIO as u128);
    // ceil to whole seconds
    let scaled_secs = (scaled_ms + 999) / 1000;
    let scaled = Duration::from_secs(scaled_secs as u64);
    let floored = if scaled < static_interval { static_interval } else { scaled };
    if floored > MAX_INTERVAL {
        MAX_INTERVAL
    } else {
        floored
    }
}

/// Drives a single updater's `reinit`/`update` lifecycle loop on its own thread until `stop`
/// fires. Returns the `JoinHandle` so the agent can wait for a clean shutdown.
pub fn spawn(updater: Arc<dyn Updater>, stop: Receiver<()>) -> JoinHandle<()> {
    thread::spawn(move || run_loop(updater, stop))
}

fn run_loop(updater: Arc<dyn Updater>, stop: Receiver<()>) {
    let mut iteration: u32 = 0;
    let static_interval = updater.static_interval();
    let reinit_rate = updater.reinit_rate().max(1);

    // Run once immediately so the tree isn't empty while the first tick is pending.
    if let Err(e) = updater.reinit() {
        warn!("scheduler: {}: initial reinit failed: {}", updater.name(), e);
    }

    loop {
        if iteration % reinit_rate == 0 {
            if let Err(e) = updater.reinit() {
                warn!("scheduler: {}: reinit failed: {}", updater.name(), e);
            }
        }

        let t0 = Instant::now();
        if let Err(e) = updater.update() {
            error!("scheduler: {}: update failed: {}", updater.name(), e);
        }
        let elapsed = t0.elapsed();
        let wait = next_interval(elapsed, static_interval);
        debug!(
            "scheduler: {}: cycle took {:?}, next in {:?}",
            updater.name(),
            elapsed,
            wait
        );

        iteration = iteration.wrapping_add(1);

        select! {
            recv(stop) -> _ => {
                debug!("scheduler: {}: stop signal, exiting", updater.name());
                return;
            }
            default(wait) => {}
        }
    }
}

/// Owns every updater's thread and the shared cancellation signal. Dropping/`shutdown`ing closes
/// the channel, which unblocks every updater at its next yield point (the `select!` wait above).
pub struct Scheduler {
    stop_tx: Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(updaters: Vec<Arc<dyn Updater>>) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let handles = updaters
            .into_iter()
            .map(|u| spawn(u, stop_rx.clone()))
            .collect();
        Scheduler { stop_tx, handles }
    }

    /// Broadcasts cancellation and waits for every updater thread to exit: the process exits
    /// only after every per-updater close hook ran.
    pub fn shutdown(self) {
        drop(self.stop_tx);
        for h in self.handles {
            let _ = h.join();
        }
    }
}

/// A periodic tick source, for callers (tests, the ping keepalive) that want a plain interval
/// without the pacing behavior.
pub fn ticker(interval: Duration) -> Receiver<Instant> {
    tick(interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[test]
    fn pacing_examples_from_spec() {
        let t = Duration::from_secs(5);
        assert_eq!(next_interval(Duration::from_millis(400), t), Duration::from_secs(5));
        assert_eq!(next_interval(Duration::from_millis(870), t), Duration::from_secs(9));
        assert_eq!(next_interval(Duration::from_millis(18880), t), Duration::from_secs(60));
        assert_eq!(next_interval(Duration::from_secs(0), t), Duration::from_secs(5));
    }

    #[test]
    fn pacing_never_drops_below_static_or_above_max() {
        for ms in [0u64, 1, 400, 5000, 100_000] {
            let got = next_interval(Duration::from_millis(ms), Duration::from_secs(5));
            assert!(got >= Duration::from_secs(5));
            assert!(got <= MAX_INTERVAL);
        }
    }

    struct CountingUpdater {
        reinits: AtomicU32,
        updates: AtomicU32,
    }

    impl Updater for CountingUpdater {
        fn name(&self) -> &str {
            "counting"
        }
        fn static_interval(&self) -> Duration {
            Duration::from_millis(5)
        }
        fn reinit_rate(&self) -> u32 {
            2
        }
        fn reinit(&self) -> Result<(), AgentError> {
            self.reinits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn update(&self) -> Result<(), AgentError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn scheduler_runs_and_stops_cleanly() {
        let updater = Arc::new(CountingUpdater {
            reinits: AtomicU32::new(0),
            updates: AtomicU32::new(0),
        });
        let sched = Scheduler::start(vec![updater.clone()]);
        // let a few cycles happen
        thread::sleep(Duration::from_millis(50));
        sched.shutdown();
        assert!(updater.updates.load(Ordering::SeqCst) >= 1);
        assert!(updater.reinits.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn failing_update_does_not_wedge_the_loop() {
        struct Flaky(Mutex<u32>);
        impl Updater for Flaky {
            fn name(&self) -> &str {
                "flaky"
            }
            fn static_interval(&self) -> Duration {
                Duration::from_millis(5)
            }
            fn reinit(&self) -> Result<(), AgentError> {
                Ok(())
            }
            fn update(&self) -> Result<(), AgentError> {
                let mut n = self.0.lock().unwrap();
                *n += 1;
                Err(AgentError::backend_unavailable("test", "boom"))
            }
        }
        let updater = Arc::new(Flaky(Mutex::new(0)));
        let sched = Scheduler::start(vec![updater.clone()]);
        thread::sleep(Duration::from_millis(40));
        sched.shutdown();
        assert!(*updater.0.lock().unwrap() >= 1);
    }
}
