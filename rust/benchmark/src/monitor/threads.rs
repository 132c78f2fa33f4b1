use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::MonitorError;

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Peak reported before any sample lands: the reporting thread itself.
pub const INITIAL_PEAK: usize = 1;

/// Extracts the `Threads:` field from the contents of `/proc/<pid>/status`.
pub fn parse_thread_count(status: &str) -> Option<usize> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Threads:"))
        .and_then(|count| count.trim().parse().ok())
}

/// Number of OS threads in this process, when the platform exposes it.
pub fn current_thread_count() -> Option<usize> {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .as_deref()
        .and_then(parse_thread_count)
}

/// Owns one sampling session: the peak counter, the stop flag, and the
/// sampler thread.
///
/// The peak only ever rises. [`MonitorHandle::stop`] joins the sampler before
/// reading the peak, so the value returned reflects every sample taken. If the
/// handle is dropped instead (for example when a run aborts early) the sampler
/// is still stopped and joined.
pub struct MonitorHandle {
    peak: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    sampler: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Samples with `sample` every `interval`. Samples that return `None` are
    /// skipped.
    pub fn start_with<F>(interval: Duration, mut sample: F) -> Result<Self, MonitorError>
    where
        F: FnMut() -> Option<usize> + Send + 'static,
    {
        let peak = Arc::new(AtomicUsize::new(INITIAL_PEAK));
        let stop = Arc::new(AtomicBool::new(false));
        let sampler = {
            let peak = peak.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("rangebench-monitor".to_string())
                .spawn(move || loop {
                    if let Some(count) = sample() {
                        peak.fetch_max(count, Ordering::AcqRel);
                    }
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    // Woken early by `shutdown`; spurious wakeups only add samples.
                    std::thread::park_timeout(interval);
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                })?
        };
        tracing::debug!(interval_ms = interval.as_millis() as u64, "Thread count sampler started");
        Ok(Self {
            peak,
            stop,
            sampler: Some(sampler),
        })
    }

    /// Peak observed so far. Only final after [`MonitorHandle::stop`].
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Stops and joins the sampler, then returns the final peak.
    pub fn stop(mut self) -> usize {
        self.shutdown();
        self.peak()
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(sampler) = self.sampler.take() {
            sampler.thread().unpark();
            if sampler.join().is_err() {
                tracing::error!("Thread count sampler panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
