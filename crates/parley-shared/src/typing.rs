//! Receiver-side typing indicator state.
//!
//! The server only relays `typing` events. Whoever receives them keeps a
//! [`TypingTracker`]: every event lights the indicator for the sender, and the
//! indicator goes dark on its own once the window passes without a refresh.
//! Nothing here is persisted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::constants::TYPING_TIMEOUT_SECS;
use crate::types::{ConversationId, UserId};

#[derive(Debug, Clone)]
pub struct TypingTracker {
    window: Duration,
    last_seen: HashMap<(ConversationId, UserId), Instant>,
}

impl TypingTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    /// Record a typing event received at `now`, restarting the window.
    pub fn observe(&mut self, conversation: ConversationId, user: UserId, now: Instant) {
        self.last_seen.insert((conversation, user), now);
    }

    /// Clear a mark early, e.g. when the user's message arrives.
    pub fn clear(&mut self, conversation: ConversationId, user: UserId) {
        self.last_seen.remove(&(conversation, user));
    }

    pub fn is_typing(&self, conversation: ConversationId, user: UserId, now: Instant) -> bool {
        self.last_seen
            .get(&(conversation, user))
            .map(|at| now.saturating_duration_since(*at) < self.window)
            .unwrap_or(false)
    }

    /// Users currently typing in `conversation`.
    pub fn typing_in(&self, conversation: ConversationId, now: Instant) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .last_seen
            .iter()
            .filter(|((c, _), at)| *c == conversation && now.saturating_duration_since(**at) < self.window)
            .map(|((_, u), _)| *u)
            .collect();
        users.sort();
        users
    }

    /// Drop every expired mark and return the ones that just went dark.
    pub fn expire(&mut self, now: Instant) -> Vec<(ConversationId, UserId)> {
        let window = self.window;
        let mut expired = Vec::new();
        self.last_seen.retain(|key, at| {
            let live = now.saturating_duration_since(*at) < window;
            if !live {
                expired.push(*key);
            }
            live
        });
        expired
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(TYPING_TIMEOUT_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_expires_after_window() {
        let mut tracker = TypingTracker::default();
        let conversation = ConversationId::new();
        let user = UserId::new();
        let t0 = Instant::now();

        tracker.observe(conversation, user, t0);
        assert!(tracker.is_typing(conversation, user, t0 + Duration::from_millis(2_900)));
        assert!(!tracker.is_typing(conversation, user, t0 + Duration::from_secs(3)));
    }

    #[test]
    fn test_refresh_extends_window() {
        let mut tracker = TypingTracker::default();
        let conversation = ConversationId::new();
        let user = UserId::new();
        let t0 = Instant::now();

        tracker.observe(conversation, user, t0);
        tracker.observe(conversation, user, t0 + Duration::from_secs(2));
        assert!(tracker.is_typing(conversation, user, t0 + Duration::from_secs(4)));
    }

    #[test]
    fn test_expire_reports_dark_marks() {
        let mut tracker = TypingTracker::default();
        let conversation = ConversationId::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let t0 = Instant::now();

        tracker.observe(conversation, alice, t0);
        tracker.observe(conversation, bob, t0 + Duration::from_secs(2));

        let expired = tracker.expire(t0 + Duration::from_millis(3_500));
        assert_eq!(expired, vec![(conversation, alice)]);
        assert_eq!(tracker.typing_in(conversation, t0 + Duration::from_millis(3_500)), vec![bob]);
    }

    #[test]
    fn test_clear_removes_mark() {
        let mut tracker = TypingTracker::default();
        let conversation = ConversationId::new();
        let user = UserId::new();
        let t0 = Instant::now();

        tracker.observe(conversation, user, t0);
        tracker.clear(conversation, user);
        assert!(!tracker.is_typing(conversation, user, t0));
    }
}
