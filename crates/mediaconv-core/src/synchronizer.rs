// crates/mediaconv-core/src/synchronizer.rs
//
// Bounds inter-track timestamp drift by suspending fast producers (§4.3).
//
// The spec models `wait` as a future resolved by an explicit list of waiter
// records; on an OS-thread realization of the pipeline (§5, §9 — "reference
// model explicitly allows an OS-thread realization") the natural translation
// is a `Condvar::wait_while` loop: the condition it re-checks on every wake is
// exactly "would should_wait still return true for this timestamp", so no
// separate waiter bookkeeping is needed — the blocked thread *is* the waiter.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};

use crate::track::TrackRef;

/// Maximum real-time lead, in seconds, a track may hold over the slowest
/// live track before its producer must suspend.
pub const MAX_TIMESTAMP_GAP: f64 = 5.0;

struct State {
    max_ts: HashMap<TrackRef, f64>,
}

impl State {
    fn min_timestamp(&self) -> f64 {
        self.max_ts
            .values()
            .copied()
            .fold(f64::INFINITY, f64::min)
    }
}

/// Cross-couples the per-track producers of a single conversion so none runs
/// more than [`MAX_TIMESTAMP_GAP`] ahead of the slowest live track.
pub struct Synchronizer {
    state: Mutex<State>,
    cvar: Condvar,
}

impl Synchronizer {
    pub fn new() -> Self {
        Synchronizer {
            state: Mutex::new(State {
                max_ts: HashMap::new(),
            }),
            cvar: Condvar::new(),
        }
    }

    /// Records `ts` as `track`'s last-submitted timestamp and reports whether
    /// the caller must suspend before emitting anything beyond it. Resolves
    /// any other track currently waiting whose gap has since closed.
    pub fn should_wait(&self, track: TrackRef, ts: f64) -> bool {
        let mut state = self.state.lock().unwrap();
        let entry = state.max_ts.entry(track).or_insert(f64::NEG_INFINITY);
        if ts > *entry {
            *entry = ts;
        }
        let min = state.min_timestamp();
        drop(state);
        self.cvar.notify_all();
        ts - min >= MAX_TIMESTAMP_GAP
    }

    /// Suspends the calling thread until `track`'s lead over the slowest live
    /// track drops back under [`MAX_TIMESTAMP_GAP`], or until the track set
    /// changes enough (via [`close_track`]) that the gap closes.
    pub fn wait(&self, ts: f64) {
        let state = self.state.lock().unwrap();
        let _guard = self
            .cvar
            .wait_while(state, |state| ts - state.min_timestamp() >= MAX_TIMESTAMP_GAP)
            .unwrap();
    }

    /// Removes `track` from the synchronizer and re-evaluates every waiter —
    /// a finished track can no longer hold back the min.
    pub fn close_track(&self, track: TrackRef) {
        let mut state = self.state.lock().unwrap();
        state.max_ts.remove(&track);
        drop(state);
        self.cvar.notify_all();
    }
}

impl Default for Synchronizer {
    fn default() -> Self {
        Synchronizer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackKind;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn track(index: usize) -> TrackRef {
        TrackRef {
            kind: TrackKind::Video,
            index,
        }
    }

    #[test]
    fn single_track_never_waits() {
        let sync = Synchronizer::new();
        assert!(!sync.should_wait(track(0), 0.0));
        assert!(!sync.should_wait(track(0), 100.0));
    }

    #[test]
    fn fast_track_must_wait_past_gap() {
        let sync = Synchronizer::new();
        assert!(!sync.should_wait(track(0), 0.0));
        assert!(!sync.should_wait(track(1), 0.0));
        // track 0 races ahead by exactly the gap.
        assert!(sync.should_wait(track(0), MAX_TIMESTAMP_GAP));
        // just under the gap is fine.
        assert!(!sync.should_wait(track(0), MAX_TIMESTAMP_GAP - 0.001));
    }

    #[test]
    fn closing_the_slow_track_releases_waiters() {
        let sync = Arc::new(Synchronizer::new());
        sync.should_wait(track(0), 0.0);
        sync.should_wait(track(1), 0.0);
        assert!(sync.should_wait(track(0), 10.0));

        let waiter = Arc::clone(&sync);
        let handle = thread::spawn(move || {
            waiter.wait(10.0);
        });

        thread::sleep(Duration::from_millis(20));
        sync.close_track(track(1));
        handle.join().expect("waiter thread should resolve");
    }

    #[test]
    fn catching_up_releases_waiters() {
        let sync = Arc::new(Synchronizer::new());
        sync.should_wait(track(0), 0.0);
        sync.should_wait(track(1), 0.0);
        assert!(sync.should_wait(track(0), 10.0));

        let waiter = Arc::clone(&sync);
        let handle = thread::spawn(move || {
            waiter.wait(10.0);
        });

        thread::sleep(Duration::from_millis(20));
        sync.should_wait(track(1), 6.0);
        handle.join().expect("waiter thread should resolve");
    }
}
