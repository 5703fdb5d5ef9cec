//! Per-thread event buffers.
//!
//! Each thread that records events owns exactly one [`TimeLine`], held in a
//! thread-local slot. Events are appended without synchronization because
//! only the owning thread ever touches the buffer. When a worker thread exits
//! it moves its TimeLine into the TimeLine of the thread that started the
//! pool; that child list is the only state shared between threads and sits
//! behind a mutex.
//!
//! A TimeLine created with an output path writes a Paje trace of itself and
//! every merged child when it is finished or dropped.

use crate::error::TraceError;
use crate::paje;
use crate::timer::{registered_timers, time_counter};
use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{info, warn};

/// Capacity reserved for the event buffer of a root TimeLine.
pub const ROOT_EVENTS_CAPACITY: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    Stop,
}

/// A timer transition recorded on one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Raw [`time_counter`] value.
    pub when: u64,
    pub timer_id: u32,
    pub kind: EventKind,
}

type Children = Arc<Mutex<Vec<TimeLine>>>;

/// Handle through which other threads hand their finished TimeLines to a parent.
#[derive(Clone)]
pub struct MergeTarget {
    children: Children,
}

impl MergeTarget {
    pub fn merge(&self, child: TimeLine) {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(child);
    }
}

/// Append-only event log of one thread, plus the logs merged into it.
pub struct TimeLine {
    start: u64,
    start_time: Instant,
    events: Vec<Event>,
    children: Children,
    path: Option<PathBuf>,
}

impl TimeLine {
    /// Creates a TimeLine that writes a Paje trace to `path` when finished.
    ///
    /// An empty path records events but never writes a file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let path = (!path.as_os_str().is_empty()).then_some(path);
        Self::build(path, ROOT_EVENTS_CAPACITY)
    }

    /// Creates a TimeLine that is never serialized on its own.
    pub fn detached() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a detached TimeLine with room for `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::build(None, capacity)
    }

    fn build(path: Option<PathBuf>, capacity: usize) -> Self {
        TimeLine {
            start: time_counter(),
            start_time: Instant::now(),
            events: Vec::with_capacity(capacity),
            children: Arc::new(Mutex::new(Vec::new())),
            path,
        }
    }

    /// Appends an event. Only the owning thread calls this.
    pub fn add(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Moves a finished child TimeLine into this one.
    pub fn add_timeline(&self, child: TimeLine) {
        self.merge_target().merge(child);
    }

    pub fn merge_target(&self) -> MergeTarget {
        MergeTarget {
            children: Arc::clone(&self.children),
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn start_counter(&self) -> u64 {
        self.start
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Events recorded here and in every merged descendant.
    pub fn event_count(&self) -> usize {
        let mut total = 0;
        let _ = self.visit(&mut |events| {
            total += events.len();
            Ok(())
        });
        total
    }

    /// Number of TimeLines in the tree rooted here (one per thread container).
    pub fn thread_count(&self) -> usize {
        let mut total = 0;
        let _ = self.visit(&mut |_| {
            total += 1;
            Ok(())
        });
        total
    }

    /// Calls `f` with the events of this TimeLine, then of each child in merge
    /// order, depth-first.
    pub(crate) fn visit(&self, f: &mut dyn FnMut(&[Event]) -> io::Result<()>) -> io::Result<()> {
        f(&self.events)?;
        let children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        for child in children.iter() {
            child.visit(f)?;
        }
        Ok(())
    }

    /// Writes `counter offset, timer id, kind` per own event, for debugging.
    pub fn print(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "ending timeline:")?;
        for e in &self.events {
            let what = match e.kind {
                EventKind::Start => 0,
                EventKind::Stop => 1,
            };
            writeln!(out, "{}, {}, {}", e.when.saturating_sub(self.start), e.timer_id, what)?;
        }
        Ok(())
    }

    /// Writes the trace if an output path was given.
    ///
    /// Returns the path written to, or `None` for a TimeLine without output.
    pub fn finish(mut self) -> Result<Option<PathBuf>, TraceError> {
        match self.path.take() {
            Some(path) => {
                self.write_trace(&path)?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }

    fn write_trace(&self, path: &Path) -> Result<(), TraceError> {
        let end = time_counter();
        let duration = self.start_time.elapsed();
        info!(micros = duration.as_micros() as u64, "total time");

        let ticks = end.saturating_sub(self.start);
        let scale = if ticks == 0 {
            0.0
        } else {
            duration.as_secs_f64() * 1e3 / ticks as f64
        };

        info!(path = %path.display(), "writing paje trace");
        let io_err = |source| TraceError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        let timers = registered_timers();
        let clock = paje::Clock {
            origin: self.start,
            scale,
            end_ms: duration.as_secs_f64() * 1e3,
        };
        paje::write_trace(&mut writer, self, &timers, &clock).map_err(io_err)?;
        writer.flush().map_err(io_err)
    }
}

impl Drop for TimeLine {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(err) = self.write_trace(&path) {
                warn!(error = %err, "trace file was not written");
            }
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<TimeLine>> = const { RefCell::new(None) };
}

/// Makes `timeline` the calling thread's active TimeLine; returns the previous one.
pub fn install(timeline: TimeLine) -> Option<TimeLine> {
    CURRENT.with(|slot| slot.borrow_mut().replace(timeline))
}

/// Removes and returns the calling thread's active TimeLine.
pub fn take() -> Option<TimeLine> {
    CURRENT
        .try_with(|slot| slot.borrow_mut().take())
        .ok()
        .flatten()
}

pub fn is_active() -> bool {
    CURRENT
        .try_with(|slot| slot.try_borrow().map(|tl| tl.is_some()).unwrap_or(true))
        .unwrap_or(false)
}

/// Merge handle of the calling thread's active TimeLine.
pub fn merge_target() -> Option<MergeTarget> {
    CURRENT
        .try_with(|slot| slot.borrow().as_ref().map(TimeLine::merge_target))
        .ok()
        .flatten()
}

/// Runs `f` on the calling thread's active TimeLine, if any.
///
/// Events recorded from inside `f` are dropped.
pub fn with_current<R>(f: impl FnOnce(&mut TimeLine) -> R) -> Option<R> {
    CURRENT
        .try_with(|slot| slot.borrow_mut().as_mut().map(f))
        .ok()
        .flatten()
}

/// Appends `event` to the active TimeLine; a no-op without one.
pub(crate) fn record(event: Event) {
    let _ = CURRENT.try_with(|slot| {
        if let Ok(mut slot) = slot.try_borrow_mut() {
            if let Some(tl) = slot.as_mut() {
                tl.add(event);
            }
        }
    });
}

/// Root TimeLine of the calling thread, finalized when the session ends.
///
/// Start it before starting workers so their TimeLines merge into it.
#[must_use = "tracing stops when the session is dropped"]
pub struct TraceSession {
    _not_send: PhantomData<*const ()>,
}

impl TraceSession {
    /// Installs a root TimeLine writing to `path` (empty: no file).
    pub fn start(path: impl Into<PathBuf>) -> Self {
        if install(TimeLine::new(path)).is_some() {
            warn!("replacing an active timeline with a new trace session");
        }
        TraceSession {
            _not_send: PhantomData,
        }
    }

    /// Ends the session, reporting trace I/O errors instead of logging them.
    pub fn finish(self) -> Result<Option<PathBuf>, TraceError> {
        std::mem::forget(self);
        match take() {
            Some(tl) => tl.finish(),
            None => Ok(None),
        }
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        drop(take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn event(when: u64, kind: EventKind) -> Event {
        Event {
            when,
            timer_id: 0,
            kind,
        }
    }

    #[test]
    fn test_add_and_count() {
        let mut tl = TimeLine::detached();
        tl.add(event(1, EventKind::Start));
        tl.add(event(2, EventKind::Stop));
        assert_eq!(tl.events().len(), 2);
        assert_eq!(tl.event_count(), 2);
        assert_eq!(tl.thread_count(), 1);
    }

    #[test]
    fn test_empty_path_means_no_output() {
        let tl = TimeLine::new("");
        assert!(tl.path().is_none());
        assert!(tl.finish().unwrap().is_none());
    }

    #[test]
    fn test_merge_from_threads() {
        let root = TimeLine::detached();
        let target = root.merge_target();

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let target = target.clone();
                thread::spawn(move || {
                    let mut tl = TimeLine::detached();
                    for i in 0..n {
                        tl.add(event(i, EventKind::Start));
                        tl.add(event(i + 1, EventKind::Stop));
                    }
                    target.merge(tl);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(root.thread_count(), 5);
        assert_eq!(root.event_count(), 2 * (0 + 1 + 2 + 3));
    }

    #[test]
    fn test_nested_children_are_counted() {
        let root = TimeLine::detached();
        let mut child = TimeLine::detached();
        child.add(event(1, EventKind::Start));
        let mut grandchild = TimeLine::detached();
        grandchild.add(event(2, EventKind::Start));
        grandchild.add(event(3, EventKind::Stop));
        child.add_timeline(grandchild);
        root.add_timeline(child);

        assert_eq!(root.thread_count(), 3);
        assert_eq!(root.event_count(), 3);
    }

    #[test]
    fn test_thread_local_slot() {
        assert!(!is_active());
        assert!(merge_target().is_none());
        record(event(1, EventKind::Start));

        assert!(install(TimeLine::detached()).is_none());
        assert!(is_active());
        assert!(merge_target().is_some());
        record(event(1, EventKind::Start));
        assert_eq!(with_current(|tl| tl.events().len()), Some(1));

        let tl = take().unwrap();
        assert_eq!(tl.events().len(), 1);
        assert!(!is_active());
        assert!(with_current(|tl| tl.events().len()).is_none());
    }

    #[test]
    fn test_print() {
        let mut tl = TimeLine::detached();
        let start = tl.start_counter();
        tl.add(Event {
            when: start + 10,
            timer_id: 7,
            kind: EventKind::Stop,
        });

        let mut out = Vec::new();
        tl.print(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "ending timeline:\n10, 7, 1\n");
    }

    #[test]
    fn test_unwritable_path_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.trace");

        let err = TimeLine::new(&path).finish().unwrap_err();
        match err {
            TraceError::Io { path: p, .. } => assert_eq!(p, path),
        }

        // Dropping instead of finishing only logs.
        drop(TimeLine::new(&path));
        assert!(!path.exists());
    }

    #[test]
    fn test_session_writes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.trace");
        {
            let _session = TraceSession::start(&path);
            assert!(is_active());
        }
        assert!(!is_active());
        assert!(path.exists());
    }

    #[test]
    fn test_session_finish_returns_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finish.trace");
        let session = TraceSession::start(&path);
        assert_eq!(session.finish().unwrap(), Some(path.clone()));
        assert!(!is_active());
        assert!(path.exists());
    }
}
