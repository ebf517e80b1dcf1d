//! Multi-tap classification
//!
//! Discrete presses, each with a measured hold time, are folded into logical
//! gestures per source key. A long hold short-circuits everything. Otherwise
//! the first tap arms a single-tap timer, a second tap inside the double
//! window replaces it, and when a triple is wanted the double is held back
//! for a short grace period in case a third tap follows.
//!
//! ```text
//!            tap                   tap (in window)           tap (in window)
//!   Idle ──────────▶ WaitingForSecond ──────────▶ WaitingForThird ──────────▶ Triple
//!                       │ timer                       │ grace timer
//!                       ▼                             ▼
//!                     Single                        Double
//! ```
//!
//! Without triple interest the second tap classifies as Double immediately.
//! State for a key is removed atomically with the classification that ends
//! it, and timers that lost a race check the sequence number they were armed
//! with before emitting anything.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;
use vf_core::TimerSet;

/// A classified gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TapGesture {
    /// First tap of a sequence, before it is classified
    Immediate,
    Single,
    Double,
    Triple,
    LongPress,
}

/// Classification windows
#[derive(Debug, Clone, Copy)]
pub struct TapTiming {
    /// Max gap between the first and second tap
    pub double_window: Duration,
    /// Max span from the first to the third tap
    pub triple_window: Duration,
    /// How long a double is held back waiting for a third tap
    pub triple_grace: Duration,
    /// Hold time at which a press is a long press; `None` never
    pub long_press: Option<Duration>,
}

/// Which optional gestures any workflow wants for a key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TapInterest {
    pub immediate: bool,
    pub triple: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    WaitingForSecond,
    WaitingForThird,
}

#[derive(Debug)]
struct TapState {
    phase: Phase,
    first_at: Instant,
    seq: u64,
}

/// Receives classified gestures
pub type GestureSink<K> = Arc<dyn Fn(K, TapGesture) + Send + Sync>;

/// Per-key tap state machines sharing one timing configuration
pub struct TapClassifier<K>
where
    K: Eq + Hash,
{
    timing: TapTiming,
    states: Arc<DashMap<K, TapState>>,
    timers: TimerSet<K>,
    next_seq: AtomicU64,
    sink: GestureSink<K>,
}

impl<K> TapClassifier<K>
where
    K: Eq + Hash + Clone + Send + Sync + Debug + 'static,
{
    pub fn new(timing: TapTiming, sink: GestureSink<K>) -> Self {
        Self {
            timing,
            states: Arc::new(DashMap::new()),
            timers: TimerSet::new(),
            next_seq: AtomicU64::new(1),
            sink,
        }
    }

    /// Feed one released press
    pub fn on_tap(&self, key: K, hold: Duration, interest: TapInterest) {
        if self.timing.long_press.is_some_and(|threshold| hold >= threshold) {
            self.reset(&key);
            trace!(?key, hold_ms = hold.as_millis() as u64, "Long press");
            (self.sink)(key, TapGesture::LongPress);
            return;
        }

        let now = Instant::now();
        let mut emitted = Vec::with_capacity(1);

        match self.states.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                let elapsed = now.saturating_duration_since(state.first_at);
                match state.phase {
                    Phase::WaitingForSecond if elapsed <= self.timing.double_window => {
                        if interest.triple {
                            state.phase = Phase::WaitingForThird;
                            let seq = state.seq;
                            // Replaces the pending single
                            self.arm(key.clone(), self.timing.triple_grace, seq, TapGesture::Double);
                        } else {
                            occupied.remove();
                            self.timers.cancel(&key);
                            emitted.push(TapGesture::Double);
                        }
                    }
                    Phase::WaitingForThird if elapsed <= self.timing.triple_window => {
                        occupied.remove();
                        self.timers.cancel(&key);
                        emitted.push(TapGesture::Triple);
                    }
                    phase => {
                        trace!(?key, elapsed_ms = elapsed.as_millis() as u64, "Tap outside window, restarting");
                        if phase == Phase::WaitingForThird {
                            // The grace timer has not settled the double yet
                            emitted.push(TapGesture::Double);
                        }
                        *state = self.first_tap(&key, now, interest, &mut emitted);
                    }
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(self.first_tap(&key, now, interest, &mut emitted));
            }
        }

        for gesture in emitted {
            (self.sink)(key.clone(), gesture);
        }
    }

    fn first_tap(
        &self,
        key: &K,
        now: Instant,
        interest: TapInterest,
        emitted: &mut Vec<TapGesture>,
    ) -> TapState {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        if interest.immediate {
            emitted.push(TapGesture::Immediate);
        }
        self.arm(key.clone(), self.timing.double_window, seq, TapGesture::Single);
        TapState {
            phase: Phase::WaitingForSecond,
            first_at: now,
            seq,
        }
    }

    /// Emit `gesture` after `delay` unless the sequence has moved on
    fn arm(&self, key: K, delay: Duration, seq: u64, gesture: TapGesture) {
        let states = self.states.clone();
        let sink = self.sink.clone();
        let task_key = key.clone();
        self.timers.schedule(key, delay, async move {
            if states
                .remove_if(&task_key, |_, state| state.seq == seq)
                .is_some()
            {
                sink(task_key, gesture);
            }
        });
    }

    /// Forget the sequence in progress for `key`
    pub fn reset(&self, key: &K) {
        self.states.remove(key);
        self.timers.cancel(key);
    }

    /// Forget every sequence and cancel every timer
    pub fn clear(&self) {
        self.states.clear();
        self.timers.cancel_all();
    }

    /// Whether a sequence is in progress for `key`
    pub fn is_pending(&self, key: &K) -> bool {
        self.states.contains_key(key)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const TIMING: TapTiming = TapTiming {
        double_window: Duration::from_millis(400),
        triple_window: Duration::from_millis(750),
        triple_grace: Duration::from_millis(200),
        long_press: Some(Duration::from_millis(500)),
    };

    const DOUBLE_ONLY: TapInterest = TapInterest {
        immediate: false,
        triple: false,
    };

    const WITH_TRIPLE: TapInterest = TapInterest {
        immediate: false,
        triple: true,
    };

    fn classifier() -> (TapClassifier<&'static str>, Arc<Mutex<Vec<TapGesture>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: GestureSink<&'static str> = Arc::new(move |_key, gesture| {
            sink_seen.lock().unwrap().push(gesture);
        });
        (TapClassifier::new(TIMING, sink), seen)
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn tap(c: &TapClassifier<&'static str>, interest: TapInterest) {
        c.on_tap("k", Duration::from_millis(50), interest);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_after_window() {
        let (c, seen) = classifier();
        tap(&c, DOUBLE_ONLY);
        wait(399).await;
        assert!(seen.lock().unwrap().is_empty());
        wait(2).await;
        assert_eq!(*seen.lock().unwrap(), vec![TapGesture::Single]);
        assert!(!c.is_pending(&"k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_without_triple_interest_is_immediate() {
        let (c, seen) = classifier();
        tap(&c, DOUBLE_ONLY);
        wait(200).await;
        tap(&c, DOUBLE_ONLY);
        assert_eq!(*seen.lock().unwrap(), vec![TapGesture::Double]);

        wait(1000).await;
        assert_eq!(*seen.lock().unwrap(), vec![TapGesture::Double]);
        assert_eq!(c.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_with_triple_interest_waits_for_grace() {
        let (c, seen) = classifier();
        tap(&c, WITH_TRIPLE);
        wait(300).await;
        tap(&c, WITH_TRIPLE);
        wait(150).await;
        assert!(seen.lock().unwrap().is_empty());
        wait(100).await;
        assert_eq!(*seen.lock().unwrap(), vec![TapGesture::Double]);

        wait(1000).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_triple_beats_double() {
        let (c, seen) = classifier();
        tap(&c, WITH_TRIPLE);
        wait(200).await;
        tap(&c, WITH_TRIPLE);
        wait(150).await;
        tap(&c, WITH_TRIPLE);
        assert_eq!(*seen.lock().unwrap(), vec![TapGesture::Triple]);

        wait(1000).await;
        assert_eq!(*seen.lock().unwrap(), vec![TapGesture::Triple]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_third_tap_keeps_pending_double() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: GestureSink<&'static str> = Arc::new(move |_key, gesture| {
            sink_seen.lock().unwrap().push(gesture);
        });
        let timing = TapTiming {
            double_window: Duration::from_millis(700),
            triple_window: Duration::from_millis(750),
            triple_grace: Duration::from_millis(200),
            long_press: None,
        };
        let c = TapClassifier::new(timing, sink);

        tap(&c, WITH_TRIPLE);
        wait(600).await;
        tap(&c, WITH_TRIPLE);
        wait(180).await;
        tap(&c, WITH_TRIPLE);
        assert_eq!(*seen.lock().unwrap(), vec![TapGesture::Double]);

        wait(1000).await;
        assert_eq!(
            *seen.lock().unwrap(),
            vec![TapGesture::Double, TapGesture::Single]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_press_clears_pending_sequence() {
        let (c, seen) = classifier();
        tap(&c, WITH_TRIPLE);
        wait(100).await;
        tap(&c, WITH_TRIPLE);
        c.on_tap("k", Duration::from_millis(600), WITH_TRIPLE);
        assert_eq!(*seen.lock().unwrap(), vec![TapGesture::LongPress]);
        assert!(!c.is_pending(&"k"));

        wait(1000).await;
        assert_eq!(*seen.lock().unwrap(), vec![TapGesture::LongPress]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_fires_ahead_of_classification() {
        let (c, seen) = classifier();
        let interest = TapInterest {
            immediate: true,
            triple: false,
        };
        tap(&c, interest);
        assert_eq!(*seen.lock().unwrap(), vec![TapGesture::Immediate]);
        wait(450).await;
        assert_eq!(
            *seen.lock().unwrap(),
            vec![TapGesture::Immediate, TapGesture::Single]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let (c, seen) = classifier();
        c.on_tap("a", Duration::ZERO, DOUBLE_ONLY);
        wait(100).await;
        c.on_tap("b", Duration::ZERO, DOUBLE_ONLY);
        wait(100).await;
        c.on_tap("a", Duration::ZERO, DOUBLE_ONLY);
        wait(500).await;

        let mut gestures = seen.lock().unwrap().clone();
        gestures.sort_by_key(|g| format!("{g:?}"));
        assert_eq!(gestures, vec![TapGesture::Double, TapGesture::Single]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_everything() {
        let (c, seen) = classifier();
        c.on_tap("a", Duration::ZERO, DOUBLE_ONLY);
        c.on_tap("b", Duration::ZERO, DOUBLE_ONLY);
        c.clear();
        wait(1000).await;
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(c.pending_timers(), 0);
    }
}
