//! Per-rule timing state shared by element and subscription rule triggers
//!
//! A rule lives in a scope (the app or activity it was last evaluated in).
//! Entering a scope restarts the match window; triggering starts the
//! cooldown and counts toward the activation cap.

use std::time::Duration;
use tokio::time::Instant;

/// Why a rule may or may not be evaluated right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStatus {
    /// Still inside `forced_time` after scope entry
    ForcedWaiting,
    /// `action_maximum` activations reached
    MaxReached,
    /// Inside `action_cd` since the last trigger
    Cooling,
    /// A delayed trigger is armed
    InDelay,
    /// Inside `match_delay` after scope entry
    MatchDelay,
    /// `match_delay + match_time` has passed since scope entry
    Expired,
    Ready,
}

impl RuleStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, RuleStatus::Ready)
    }
}

/// Timing limits of one rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuleTiming {
    pub action_cd: Duration,
    pub action_delay: Duration,
    pub match_delay: Duration,
    /// How long the rule stays matchable after `match_delay`; `None` forever
    pub match_time: Option<Duration>,
    pub forced_time: Duration,
    pub action_maximum: Option<u32>,
}

impl RuleTiming {
    pub fn from_millis(
        action_cd: u64,
        action_delay: u64,
        match_delay: u64,
        match_time: Option<u64>,
        forced_time: u64,
        action_maximum: Option<u32>,
    ) -> Self {
        Self {
            action_cd: Duration::from_millis(action_cd),
            action_delay: Duration::from_millis(action_delay),
            match_delay: Duration::from_millis(match_delay),
            match_time: match_time.map(Duration::from_millis),
            forced_time: Duration::from_millis(forced_time),
            action_maximum,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuleExecutionState {
    timing: RuleTiming,
    scope_entered: Option<Instant>,
    last_match: Option<Instant>,
    last_trigger: Option<Instant>,
    delay_armed: bool,
    activations: u32,
}

impl RuleExecutionState {
    pub fn new(timing: RuleTiming) -> Self {
        Self {
            timing,
            scope_entered: None,
            last_match: None,
            last_trigger: None,
            delay_armed: false,
            activations: 0,
        }
    }

    pub fn timing(&self) -> &RuleTiming {
        &self.timing
    }

    /// Swap in new limits, keeping counters and scope
    pub fn retime(&mut self, timing: RuleTiming) {
        self.timing = timing;
    }

    /// Whether a scope has been entered since creation
    pub fn in_scope(&self) -> bool {
        self.scope_entered.is_some()
    }

    /// Restart the match window; cooldown and activations carry over
    pub fn enter_scope(&mut self, now: Instant) {
        self.scope_entered = Some(now);
        self.last_match = None;
        self.delay_armed = false;
    }

    pub fn status(&self, now: Instant) -> RuleStatus {
        let since_scope = self
            .scope_entered
            .map_or(Duration::ZERO, |at| now.saturating_duration_since(at));

        if since_scope < self.timing.forced_time {
            return RuleStatus::ForcedWaiting;
        }
        if self.timing.action_maximum.is_some_and(|max| self.activations >= max) {
            return RuleStatus::MaxReached;
        }
        if self
            .last_trigger
            .is_some_and(|at| now.saturating_duration_since(at) < self.timing.action_cd)
        {
            return RuleStatus::Cooling;
        }
        if self.delay_armed {
            return RuleStatus::InDelay;
        }
        if since_scope < self.timing.match_delay {
            return RuleStatus::MatchDelay;
        }
        if let Some(match_time) = self.timing.match_time {
            if since_scope > self.timing.match_delay + match_time {
                return RuleStatus::Expired;
            }
        }
        RuleStatus::Ready
    }

    pub fn record_match(&mut self, now: Instant) {
        self.last_match = Some(now);
    }

    pub fn last_match(&self) -> Option<Instant> {
        self.last_match
    }

    /// Hold further matches until the delayed trigger fires or is disarmed
    pub fn arm_delay(&mut self) {
        self.delay_armed = true;
    }

    pub fn disarm(&mut self) {
        self.delay_armed = false;
    }

    pub fn record_trigger(&mut self, now: Instant) {
        self.last_trigger = Some(now);
        self.delay_armed = false;
        self.activations = self.activations.saturating_add(1);
    }

    /// Forget activations and cooldown
    pub fn reset_counters(&mut self) {
        self.last_trigger = None;
        self.activations = 0;
    }

    pub fn activations(&self) -> u32 {
        self.activations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn entered(timing: RuleTiming) -> (RuleExecutionState, Instant) {
        let now = Instant::now();
        let mut state = RuleExecutionState::new(timing);
        state.enter_scope(now);
        (state, now)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_then_ready() {
        let (mut state, t0) = entered(RuleTiming::from_millis(1000, 0, 0, None, 0, None));
        assert_eq!(state.status(t0), RuleStatus::Ready);

        state.record_trigger(t0);
        assert_eq!(state.status(t0 + ms(999)), RuleStatus::Cooling);
        assert_eq!(state.status(t0 + ms(1000)), RuleStatus::Ready);
        assert_eq!(state.activations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_window() {
        let (state, t0) = entered(RuleTiming::from_millis(0, 0, 500, Some(1000), 0, None));
        assert_eq!(state.status(t0 + ms(100)), RuleStatus::MatchDelay);
        assert_eq!(state.status(t0 + ms(500)), RuleStatus::Ready);
        assert_eq!(state.status(t0 + ms(1500)), RuleStatus::Ready);
        assert_eq!(state.status(t0 + ms(1501)), RuleStatus::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_precedence() {
        let timing = RuleTiming::from_millis(1000, 200, 0, None, 300, Some(1));
        let (mut state, t0) = entered(timing);
        assert_eq!(state.status(t0), RuleStatus::ForcedWaiting);

        state.arm_delay();
        assert_eq!(state.status(t0 + ms(400)), RuleStatus::InDelay);

        state.record_trigger(t0 + ms(400));
        // Max beats cooling
        assert_eq!(state.status(t0 + ms(500)), RuleStatus::MaxReached);

        state.reset_counters();
        assert_eq!(state.status(t0 + ms(500)), RuleStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scope_entry_restarts_window_but_keeps_cooldown() {
        let (mut state, t0) = entered(RuleTiming::from_millis(1000, 0, 0, Some(100), 0, None));
        assert_eq!(state.status(t0 + ms(200)), RuleStatus::Expired);

        state.record_trigger(t0 + ms(50));
        state.enter_scope(t0 + ms(300));
        assert_eq!(state.status(t0 + ms(300)), RuleStatus::Cooling);
        assert_eq!(state.status(t0 + ms(1050)), RuleStatus::Expired);
        state.enter_scope(t0 + ms(1050));
        assert_eq!(state.status(t0 + ms(1050)), RuleStatus::Ready);
    }
}
