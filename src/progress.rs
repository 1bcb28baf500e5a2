//! Progress reporting and cooperative cancellation.
//!
//! Single-threaded and callback-based: long-running passes call in between
//! entries, observers get phase/percent updates, and a shared flag lets
//! an outside party (a signal handler, an IPC surface) ask for a clean
//! abort at the next entry boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};

/// Gets told how far along we are.
pub trait Observer {
    /// `percent` is 0-100; `phase` is set on phase changes and completion,
    /// and `None` for ordinary per-entry ticks (where `label` names the
    /// entry being worked on).
    fn update(&mut self, label: &str, percent: f32, phase: Option<&str>);
}

/// A cancellation flag that can be handed to whoever might want to pull
/// the plug.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Tracks a run as a fixed number of sequential steps, each of which may
/// tick through many entries, and fans updates out to observers.
pub struct Progress {
    observers: Vec<Box<dyn Observer>>,
    cancel: CancelFlag,
    total_steps: u32,
    current_step: i32,
    entry_count: usize,
    last_percent: f32,
}

impl Progress {
    pub fn new(cancel: CancelFlag) -> Self {
        Self {
            observers: Vec::new(),
            cancel,
            total_steps: 1,
            current_step: -1,
            entry_count: 0,
            last_percent: -1.0,
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    /// Declares how many [`next_step`](Progress::next_step) calls the whole
    /// run comprises, and how many entries each step ticks through.
    pub fn set_shape(&mut self, total_steps: u32, entry_count: usize) {
        self.total_steps = total_steps.max(1);
        self.entry_count = entry_count;
    }

    /// Errors out if someone asked us to stop. Call between entries;
    /// in-flight entry work is never interrupted.
    pub fn poll(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            bail!("Operation aborted");
        }
        Ok(())
    }

    fn percent_for(&self, partial: f32) -> f32 {
        let step = self.current_step.max(0) as f32;
        100.0 * ((step + partial) / self.total_steps as f32).min(1.0)
    }

    /// Advances to the next phase and announces it unconditionally.
    pub fn next_step(&mut self, message: &str) {
        self.current_step += 1;
        let percent = self.percent_for(0.0);
        for observer in &mut self.observers {
            observer.update(message, percent, Some(message));
        }
        self.last_percent = percent;
    }

    /// Ticks within the current phase. Updates moving the needle by less
    /// than half a percent are dropped so observers aren't flooded.
    pub fn entry(&mut self, label: &str, index: usize) {
        let partial = if self.entry_count > 0 {
            (index as f32 / self.entry_count as f32).min(1.0)
        } else {
            0.0
        };
        let percent = self.percent_for(partial);
        if percent - self.last_percent < 0.5 {
            return;
        }
        for observer in &mut self.observers {
            observer.update(label, percent, None);
        }
        self.last_percent = percent;
    }

    /// The run is done; always reports 100%.
    pub fn finish(&mut self) {
        for observer in &mut self.observers {
            observer.update("", 100.0, Some("FINISHED"));
        }
        self.last_percent = 100.0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder(Rc<RefCell<Vec<(f32, Option<String>)>>>);

    impl Observer for Recorder {
        fn update(&mut self, _label: &str, percent: f32, phase: Option<&str>) {
            self.0
                .borrow_mut()
                .push((percent, phase.map(str::to_owned)));
        }
    }

    #[test]
    fn small_deltas_are_suppressed() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut progress = Progress::new(CancelFlag::default());
        progress.add_observer(Box::new(Recorder(seen.clone())));
        progress.set_shape(1, 1000);

        progress.next_step("writing");
        for i in 0..1000 {
            progress.entry("entry", i);
        }
        progress.finish();

        let seen = seen.borrow();
        // 1000 ticks at 0.1% apiece collapse to ~200 updates, plus the
        // phase announcement and the final 100%.
        assert!(seen.len() <= 202, "{} updates got through", seen.len());
        assert_eq!(seen.last().unwrap().1.as_deref(), Some("FINISHED"));
        // Percentages are monotone.
        for pair in seen.windows(2) {
            assert!(pair[1].0 >= pair[0].0);
        }
    }

    #[test]
    fn phase_changes_always_announce() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut progress = Progress::new(CancelFlag::default());
        progress.add_observer(Box::new(Recorder(seen.clone())));
        progress.set_shape(4, 0);

        progress.next_step("one");
        progress.next_step("two");
        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].1.as_deref(), Some("one"));
        assert_eq!(seen[1].0, 25.0);
    }

    #[test]
    fn cancellation_trips_the_poll() {
        let flag = CancelFlag::default();
        let progress = Progress::new(flag.clone());
        assert!(progress.poll().is_ok());
        flag.cancel();
        assert!(progress.poll().is_err());
    }
}
