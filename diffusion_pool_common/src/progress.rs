use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

/// Minimum time between two progress callbacks, unless the loop has just finished.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Externally settable flag polled between denoising steps.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State handed to a progress callback.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Completed steps.
    pub n: usize,
    /// Steps requested.
    pub total: usize,
    pub elapsed: Duration,
    /// Steps per second, if any time has passed.
    pub rate: Option<f64>,
}

pub type ProgressCallback = Box<dyn FnMut(&ProgressSnapshot) + Send>;

/// Bridges a step loop to an optional callback and an optional [`StopSignal`].
///
/// A fresh reporter is made for every generation call and handed to the pipeline, which
/// wraps its step iterator with [`ProgressReporter::iter`].
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    stop: Option<StopSignal>,
    min_interval: Duration,
    silent: bool,
    completed: usize,
    aborted: bool,
}

impl ProgressReporter {
    pub fn new(callback: Option<ProgressCallback>, stop: Option<StopSignal>) -> Self {
        Self {
            callback,
            stop,
            min_interval: DEFAULT_MIN_INTERVAL,
            silent: false,
            completed: 0,
            aborted: false,
        }
    }

    /// Suppress the terminal progress bar. Callbacks still fire.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Steps completed by the most recent iteration.
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Whether the most recent iteration stopped early because the stop signal was set.
    pub fn aborted(&self) -> bool {
        self.aborted
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(StopSignal::is_set)
    }

    pub fn iter<I>(&mut self, iterable: I) -> ProgressIter<'_, I::IntoIter>
    where
        I: IntoIterator,
        I::IntoIter: ExactSizeIterator,
    {
        let inner = iterable.into_iter();
        let total = inner.len();
        let bar = if self.silent {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total as u64)
        };
        bar.set_style(
            ProgressStyle::with_template(
                "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, eta {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message("Denoise loop");
        self.completed = 0;
        self.aborted = false;
        let now = Instant::now();
        ProgressIter {
            reporter: self,
            inner,
            bar,
            total,
            started: now,
            last_display: now,
            pending: false,
            done: false,
        }
    }
}

/// Iterator returned by [`ProgressReporter::iter`].
///
/// An element counts as completed when the next one is requested. The stop signal is
/// checked before every element is handed out; once set, the iterator is exhausted.
pub struct ProgressIter<'a, I> {
    reporter: &'a mut ProgressReporter,
    inner: I,
    bar: ProgressBar,
    total: usize,
    started: Instant,
    last_display: Instant,
    pending: bool,
    done: bool,
}

impl<I> ProgressIter<'_, I> {
    fn update(&mut self) {
        self.reporter.completed += 1;
        self.bar.inc(1);

        let n = self.reporter.completed;
        let now = Instant::now();
        if now.duration_since(self.last_display) < self.reporter.min_interval && n < self.total {
            return;
        }
        self.last_display = now;

        if let Some(callback) = self.reporter.callback.as_mut() {
            let elapsed = now.duration_since(self.started);
            let secs = elapsed.as_secs_f64();
            let snapshot = ProgressSnapshot {
                n,
                total: self.total,
                elapsed,
                rate: (secs > 0.).then(|| n as f64 / secs),
            };
            callback(&snapshot);
        }
    }

    fn abort(&mut self) {
        self.done = true;
        self.reporter.aborted = true;
        self.bar.abandon_with_message("ABORTED");
    }
}

impl<I: Iterator> Iterator for ProgressIter<'_, I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.pending {
            self.pending = false;
            self.update();
        }
        let Some(item) = self.inner.next() else {
            self.done = true;
            self.bar.finish();
            return None;
        };
        if self.reporter.stop_requested() {
            self.abort();
            return None;
        }
        self.pending = true;
        Some(item)
    }
}

impl<I> Drop for ProgressIter<'_, I> {
    fn drop(&mut self) {
        if !self.done {
            self.bar.abandon();
        }
    }
}
