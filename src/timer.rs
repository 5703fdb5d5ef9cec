//! Named timers and scope-bound region instrumentation.
//!
//! Timers are registered once in a global, append-only list and referenced by
//! integer id afterwards, so recording an event never allocates or locks.

use crate::timeline::{self, Event, EventKind};
use std::marker::PhantomData;
use std::sync::{Mutex, PoisonError};

/// Color used for timers registered without an explicit one (green).
pub const DEFAULT_COLOR: [f32; 3] = [0.0, 1.0, 0.0];

/// Registry entry of a timer.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerInfo {
    pub name: String,
    pub color: [f32; 3],
}

lazy_static::lazy_static! {
    static ref REGISTRY: Mutex<Vec<TimerInfo>> = Mutex::new(Vec::new());
}

#[cfg(not(target_arch = "x86_64"))]
lazy_static::lazy_static! {
    static ref EPOCH: std::time::Instant = std::time::Instant::now();
}

/// Reads the monotonic event counter.
///
/// On x86_64 this is the time-stamp counter; elsewhere it is nanoseconds
/// since the first call. Units are converted to wall time when a trace is
/// written.
#[cfg(target_arch = "x86_64")]
#[inline]
pub fn time_counter() -> u64 {
    // SAFETY: `rdtsc` is available on every x86_64 CPU and has no preconditions.
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
pub fn time_counter() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}

/// Snapshot of every registered timer, indexed by timer id.
pub fn registered_timers() -> Vec<TimerInfo> {
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// A named, globally registered timer.
///
/// Creating a `Timer` registers a new entry every time, so a call site should
/// create it once (see [`region_timer!`](crate::region_timer)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    id: u32,
}

impl Timer {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_color(name, DEFAULT_COLOR)
    }

    /// Registers a timer drawn with `color` (RGB, each in `0.0..=1.0`).
    pub fn with_color(name: impl Into<String>, color: [f32; 3]) -> Self {
        let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
        let id = registry.len() as u32;
        registry.push(TimerInfo {
            name: name.into(),
            color,
        });
        Timer { id }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn info(&self) -> TimerInfo {
        REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)[self.id as usize].clone()
    }

    /// Records a start event on the current thread's TimeLine, if any.
    pub fn start(&self) {
        timeline::record(Event {
            when: time_counter(),
            timer_id: self.id,
            kind: EventKind::Start,
        });
    }

    /// Records a stop event on the current thread's TimeLine, if any.
    pub fn stop(&self) {
        timeline::record(Event {
            when: time_counter(),
            timer_id: self.id,
            kind: EventKind::Stop,
        });
    }
}

/// Records `timer` as active for the lifetime of the guard.
///
/// The stop event is recorded on drop, so it is emitted on unwinding too.
/// The guard is tied to the thread that created it.
#[must_use = "the region ends when the guard is dropped"]
pub struct RegionTimer {
    timer: Timer,
    _not_send: PhantomData<*const ()>,
}

impl RegionTimer {
    pub fn new(timer: &Timer) -> Self {
        timer.start();
        RegionTimer {
            timer: *timer,
            _not_send: PhantomData,
        }
    }

    pub fn timer(&self) -> Timer {
        self.timer
    }
}

impl Drop for RegionTimer {
    fn drop(&mut self) {
        self.timer.stop();
    }
}

/// Starts a region on a call-site timer that is registered on first use.
///
/// ```no_run
/// let _region = forkpool::region_timer!("assemble");
/// let _colored = forkpool::region_timer!("solve", [1.0, 0.0, 0.0]);
/// ```
#[macro_export]
macro_rules! region_timer {
    ($name:expr) => {
        $crate::region_timer!($name, $crate::timer::DEFAULT_COLOR)
    };
    ($name:expr, $color:expr) => {{
        static TIMER: ::std::sync::OnceLock<$crate::Timer> = ::std::sync::OnceLock::new();
        $crate::RegionTimer::new(TIMER.get_or_init(|| $crate::Timer::with_color($name, $color)))
    }};
}
