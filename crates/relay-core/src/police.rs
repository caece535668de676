//! Abuse rate limiting.
//!
//! Every identity (usually a network address) carries a score that decays
//! continuously with a configurable half-life. Actions add to the score;
//! once it reaches the threshold the identity is denied until enough time
//! has passed. An arrest overrides the score entirely until pardoned.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Police configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoliceConfig {
    /// Time for an unrefreshed score to halve.
    pub half_life: Duration,
    /// Scores at or above this are denied.
    pub threshold: f64,
}

impl Default for PoliceConfig {
    fn default() -> Self {
        Self {
            half_life: Duration::from_millis(30_000),
            threshold: 25.0,
        }
    }
}

/// Result of a [`Police::frisk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

impl Verdict {
    #[must_use]
    pub fn is_denied(self) -> bool {
        self == Verdict::Deny
    }
}

/// Per-identity abuse state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateRecord {
    /// Score as of `last_update`.
    pub score: f64,
    pub last_update: Instant,
    pub arrested: bool,
}

impl RateRecord {
    fn new(now: Instant) -> Self {
        Self {
            score: 0.0,
            last_update: now,
            arrested: false,
        }
    }
}

/// The rate limiter.
pub struct Police {
    records: DashMap<String, RateRecord>,
    /// Arrest token -> identity.
    arrests: DashMap<String, String>,
    config: PoliceConfig,
}

impl Police {
    /// Create a rate limiter with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PoliceConfig::default())
    }

    /// Create a rate limiter with custom configuration.
    #[must_use]
    pub fn with_config(config: PoliceConfig) -> Self {
        Self {
            records: DashMap::new(),
            arrests: DashMap::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PoliceConfig {
        &self.config
    }

    /// Return the record for `id`, creating a clean one if none exists.
    pub fn query(&self, id: &str) -> RateRecord {
        *self
            .records
            .entry(id.to_string())
            .or_insert_with(|| RateRecord::new(Instant::now()))
    }

    /// Decay the score to now, add `delta`, and judge the result.
    ///
    /// Arrested identities are denied without touching their record.
    pub fn frisk(&self, id: &str, delta: f64) -> Verdict {
        let now = Instant::now();
        let mut record = self
            .records
            .entry(id.to_string())
            .or_insert_with(|| RateRecord::new(now));

        if record.arrested {
            return Verdict::Deny;
        }

        let elapsed = now.saturating_duration_since(record.last_update);
        record.score = record.score * self.decay_factor(elapsed) + delta;
        record.last_update = now;

        if record.score >= self.config.threshold {
            debug!(identity = %id, score = record.score, "Frisk denied");
            Verdict::Deny
        } else {
            Verdict::Allow
        }
    }

    fn decay_factor(&self, elapsed: Duration) -> f64 {
        let half_life = self.config.half_life.as_secs_f64();
        if half_life <= 0.0 {
            return 0.0;
        }
        (-(elapsed.as_secs_f64() / half_life)).exp2()
    }

    /// Deny `id` until pardoned, and remember `token` as a handle for it.
    pub fn arrest(&self, id: &str, token: &str) {
        self.records
            .entry(id.to_string())
            .or_insert_with(|| RateRecord::new(Instant::now()))
            .arrested = true;
        self.arrests.insert(token.to_string(), id.to_string());
        info!(identity = %id, token = %token, "Arrested");
    }

    /// Lift an arrest by raw identity. Returns whether it was arrested.
    ///
    /// The accumulated score is kept and keeps decaying from its last update.
    pub fn pardon_by_identity(&self, id: &str) -> bool {
        let Some(mut record) = self.records.get_mut(id) else {
            return false;
        };
        let was_arrested = record.arrested;
        record.arrested = false;
        if was_arrested {
            info!(identity = %id, "Pardoned");
        }
        was_arrested
    }

    /// Lift an arrest by the token given to [`arrest`](Self::arrest).
    pub fn pardon_by_token(&self, token: &str) -> bool {
        let id = self.arrests.get(token).map(|entry| entry.value().clone());
        match id {
            Some(id) => self.pardon_by_identity(&id),
            None => false,
        }
    }

    /// Lift an arrest by token if `token` is a known one, else by identity.
    pub fn pardon(&self, token: &str) -> bool {
        if self.arrests.contains_key(token) {
            self.pardon_by_token(token)
        } else {
            self.pardon_by_identity(token)
        }
    }

    /// Lift every arrest. Returns how many were lifted.
    pub fn pardon_all(&self) -> usize {
        let mut lifted = 0;
        for mut record in self.records.iter_mut() {
            if record.arrested {
                record.arrested = false;
                lifted += 1;
            }
        }
        info!(count = lifted, "Pardoned all");
        lifted
    }

    /// Whether `id` is currently arrested. Does not create a record.
    #[must_use]
    pub fn is_arrested(&self, id: &str) -> bool {
        self.records.get(id).map_or(false, |record| record.arrested)
    }

    /// Number of arrested identities.
    #[must_use]
    pub fn arrested_count(&self) -> usize {
        self.records.iter().filter(|record| record.arrested).count()
    }
}

impl Default for Police {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_creates_clean_record() {
        let police = Police::new();
        let record = police.query("10.0.0.1");
        assert_eq!(record.score, 0.0);
        assert!(!record.arrested);
        assert_eq!(record.last_update, Instant::now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_decay_law() {
        let police = Police::new();
        assert_eq!(police.frisk("a", 20.0), Verdict::Allow);

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(police.frisk("a", 4.0), Verdict::Allow);
        assert_close(police.query("a").score, 20.0 * 2f64.powf(-0.5) + 4.0);

        tokio::time::advance(Duration::from_secs(30)).await;
        police.frisk("a", 0.0);
        assert_close(police.query("a").score, (20.0 * 2f64.powf(-0.5) + 4.0) / 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_boundary() {
        let police = Police::new();
        assert_eq!(police.frisk("under", 24.999_999), Verdict::Allow);
        assert_eq!(police.frisk("exact", 25.0), Verdict::Deny);
    }

    #[tokio::test(start_paused = true)]
    async fn test_score_recovers_over_time() {
        let police = Police::new();
        assert!(police.frisk("a", 30.0).is_denied());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(police.frisk("a", 0.0), Verdict::Allow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arrest_persists() {
        let police = Police::new();
        police.arrest("a", "tok");

        for delta in [0.0, -100.0, 1.0] {
            assert_eq!(police.frisk("a", delta), Verdict::Deny);
        }
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(police.frisk("a", 0.0), Verdict::Deny);
        assert!(police.is_arrested("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pardon_preserves_history() {
        let police = Police::new();
        police.frisk("a", 20.0);
        police.arrest("a", "tok");

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(police.frisk("a", 100.0), Verdict::Deny);

        assert!(police.pardon("a"));
        assert_eq!(police.frisk("a", 0.0), Verdict::Allow);
        assert_close(police.query("a").score, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pardon_by_token_and_identity() {
        let police = Police::new();
        police.arrest("10.0.0.1", "hash-1");
        police.arrest("10.0.0.2", "hash-2");

        assert!(police.pardon_by_token("hash-1"));
        assert!(!police.is_arrested("10.0.0.1"));

        assert!(!police.pardon_by_token("10.0.0.2"));
        assert!(police.pardon_by_identity("10.0.0.2"));
        assert!(!police.pardon_by_identity("10.0.0.2"));

        police.arrest("10.0.0.3", "hash-3");
        assert!(police.pardon("hash-3"));
        assert!(!police.pardon("nobody"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pardon_all() {
        let police = Police::new();
        police.arrest("a", "1");
        police.arrest("b", "2");
        police.frisk("c", 1.0);

        assert_eq!(police.arrested_count(), 2);
        assert_eq!(police.pardon_all(), 2);
        assert_eq!(police.arrested_count(), 0);
    }
}
