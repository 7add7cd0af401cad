//! Session: a rotatable identity (cookies, error score, usage count),
//! per `spec.md` §3 and §4.C.
//!
//! Grounded in `original_source/sessions/_session.py`.

use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status codes that mark a session as blocked by default.
pub const DEFAULT_BLOCKED_STATUS_CODES: [u16; 3] = [401, 403, 429];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_data: serde_json::Map<String, serde_json::Value>,
    pub cookies: BTreeMap<String, String>,
    pub created_at: SystemTime,
    pub max_age: Duration,
    pub usage_count: u32,
    pub max_usage_count: u32,
    pub error_score: f64,
    pub max_error_score: f64,
    pub error_score_decrement: f64,
    pub blocked_status_codes: Vec<u16>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_data: serde_json::Map::new(),
            cookies: BTreeMap::new(),
            created_at: SystemTime::now(),
            max_age: Duration::from_secs(50 * 60),
            usage_count: 0,
            max_usage_count: 50,
            error_score: 0.0,
            max_error_score: 3.0,
            error_score_decrement: 0.5,
            blocked_status_codes: DEFAULT_BLOCKED_STATUS_CODES.to_vec(),
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_expired(&self) -> bool {
        SystemTime::now()
            .duration_since(self.created_at)
            .map(|elapsed| elapsed >= self.max_age)
            .unwrap_or(false)
    }

    pub fn is_max_usage_count_reached(&self) -> bool {
        self.usage_count >= self.max_usage_count
    }

    pub fn is_blocked(&self) -> bool {
        self.error_score >= self.max_error_score
    }

    pub fn is_usable(&self) -> bool {
        !(self.is_expired() || self.is_max_usage_count_reached() || self.is_blocked())
    }

    /// Called after a successful request. Decays `error_score` toward
    /// zero; auto-retires if the session became unusable anyway (e.g.
    /// usage count reached its cap on this very call).
    pub fn mark_good(&mut self) {
        self.usage_count += 1;
        if self.error_score > 0.0 {
            self.error_score = (self.error_score - self.error_score_decrement).max(0.0);
        }
        if !self.is_usable() {
            self.retire();
        }
    }

    /// Called after a failed request attributed to this session.
    pub fn mark_bad(&mut self) {
        self.error_score += 1.0;
        self.usage_count += 1;
        if !self.is_usable() {
            self.retire();
        }
    }

    /// Forces the session into the blocked state immediately.
    pub fn retire(&mut self) {
        self.error_score += self.max_error_score;
        self.usage_count += 1;
    }

    /// `status_code ∈ blocked_status_codes \ ignore_codes`.
    pub fn is_blocked_status_code(&self, status_code: u16, ignore_codes: Option<&HashSet<u16>>) -> bool {
        if let Some(ignore) = ignore_codes {
            if ignore.contains(&status_code) {
                return false;
            }
        }
        self.blocked_status_codes.contains(&status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_bad_enough_times_blocks_the_session() {
        let mut session = Session {
            max_error_score: 3.0,
            ..Session::default()
        };
        for _ in 0..3 {
            session.mark_bad();
        }
        assert!(session.is_blocked(), "3 consecutive mark_bad calls must block a session with max_error_score=3");
        assert!(!session.is_usable());
    }

    #[test]
    fn mark_good_never_pushes_error_score_below_zero() {
        let mut session = Session::default();
        session.mark_good();
        assert!(session.error_score >= 0.0);
    }

    #[test]
    fn retire_forces_blocked_state() {
        let mut session = Session::default();
        session.retire();
        assert!(session.is_blocked());
        assert!(!session.is_usable());
    }

    #[test]
    fn is_blocked_status_code_respects_ignore_set() {
        let session = Session::default();
        assert!(session.is_blocked_status_code(429, None));
        let mut ignore = HashSet::new();
        ignore.insert(429);
        assert!(!session.is_blocked_status_code(429, Some(&ignore)));
    }
}
