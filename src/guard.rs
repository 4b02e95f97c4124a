//! BioKey Vault - Access Guard
//!
//! Per-fingerprint attempt counting and lockout. Every access attempt is
//! counted, successful or not; only an explicit success or lockout expiry
//! clears the history. Idle entries are dropped so the table stays bounded
//! by the hashes seen inside one window.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::fingerprint::FingerprintHash;

/// Guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Attempts allowed inside the window
    pub max_attempts: u32,
    /// Rolling window (seconds)
    pub window_secs: u64,
    /// Lockout period once the limit is hit (seconds)
    pub lockout_secs: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_secs: 3600, // 1 hour
            lockout_secs: 300, // 5 minutes
        }
    }
}

impl GuardConfig {
    pub fn validate(&self) -> VaultResult<()> {
        if self.max_attempts == 0 {
            return Err(VaultError::Configuration("guard.max_attempts must be at least 1".into()));
        }
        if self.window_secs == 0 || self.lockout_secs == 0 {
            return Err(VaultError::Configuration(
                "guard.window_secs and guard.lockout_secs must be positive".into(),
            ));
        }
        if self.window_secs > i64::MAX as u64 / 1000 || self.lockout_secs > i64::MAX as u64 / 1000 {
            return Err(VaultError::Configuration("guard durations out of range".into()));
        }
        Ok(())
    }

    fn window(&self) -> Duration {
        Duration::seconds(self.window_secs as i64)
    }

    fn lockout(&self) -> Duration {
        Duration::seconds(self.lockout_secs as i64)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CLOCK
// ═══════════════════════════════════════════════════════════════════════════

/// Time source for the guard
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════

/// Attempt history of one fingerprint hash
#[derive(Debug, Default, Clone)]
pub struct AttemptRecord {
    /// Attempt timestamps, oldest first
    attempts: VecDeque<DateTime<Utc>>,
    /// Locked until
    locked_until: Option<DateTime<Utc>>,
}

impl AttemptRecord {
    fn reset(&mut self) {
        self.attempts.clear();
        self.locked_until = None;
    }

    /// No lockout running and nothing left to count
    fn is_idle(&self, now: DateTime<Utc>) -> bool {
        self.attempts.is_empty() && self.locked_until.map_or(true, |until| until <= now)
    }

    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        while let Some(oldest) = self.attempts.front() {
            if now - *oldest >= window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Observable guard state of a hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Clear,
    Tracking { attempts: usize },
    Locked { retry_after_secs: u64 },
}

/// Why an attempt was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// A previous lockout is still running
    LockedOut,
    /// This attempt hit the limit and started a lockout
    TooManyAttempts,
}

/// Outcome of `check_and_record`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: DenyReason, retry_after_secs: u64 },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// `Allow` as `Ok`, denials as their `VaultError`
    pub fn into_result(self) -> VaultResult<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny { reason: DenyReason::LockedOut, retry_after_secs } => {
                Err(VaultError::LockedOut { retry_after_secs })
            }
            Decision::Deny { reason: DenyReason::TooManyAttempts, retry_after_secs } => {
                Err(VaultError::TooManyAttempts { retry_after_secs })
            }
        }
    }
}

/// Whole seconds until `until`, rounded up
fn secs_until(until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let ms = (until - now).num_milliseconds().max(0) as u64;
    (ms + 999) / 1000
}

// ═══════════════════════════════════════════════════════════════════════════
// GUARD
// ═══════════════════════════════════════════════════════════════════════════

/// Table size that triggers the first sweep of idle entries
const PURGE_THRESHOLD: usize = 1024;

type SharedRecord = Arc<Mutex<AttemptRecord>>;

struct AttemptTable {
    records: HashMap<FingerprintHash, SharedRecord>,
    /// Sweep when an insert would reach this size
    purge_at: usize,
}

/// In-memory attempt table. Lockouts do not survive a restart.
pub struct AccessGuard {
    config: GuardConfig,
    clock: Arc<dyn Clock>,
    /// Only held long enough to resolve an entry. Lock order: table, then
    /// record.
    table: Mutex<AttemptTable>,
}

impl AccessGuard {
    /// Guard on the wall clock
    pub fn new(config: GuardConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: GuardConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            table: Mutex::new(AttemptTable {
                records: HashMap::new(),
                purge_at: PURGE_THRESHOLD,
            }),
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    fn entry(&self, hash: &FingerprintHash) -> SharedRecord {
        let mut table = self.table.lock();

        if !table.records.contains_key(hash) && table.records.len() + 1 >= table.purge_at {
            self.purge_locked(&mut table);
            table.purge_at = (table.records.len() * 2).max(PURGE_THRESHOLD);
        }
        Arc::clone(table.records.entry(*hash).or_default())
    }

    fn existing(&self, hash: &FingerprintHash) -> Option<SharedRecord> {
        self.table.lock().records.get(hash).cloned()
    }

    /// Drop records nobody is using that hold no attempts and no lockout
    fn purge_locked(&self, table: &mut AttemptTable) -> usize {
        let now = self.clock.now();
        let window = self.config.window();
        let before = table.records.len();

        table.records.retain(|_, entry| {
            // A clone outside the table means an attempt is in flight
            if Arc::strong_count(entry) > 1 {
                return true;
            }
            let mut record = entry.lock();
            record.prune(now, window);
            !record.is_idle(now)
        });

        let purged = before - table.records.len();
        if purged > 0 {
            log::debug!("Guard dropped {} idle entries", purged);
        }
        purged
    }

    #[cfg(test)]
    fn purge_idle(&self) -> usize {
        self.purge_locked(&mut self.table.lock())
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.table.lock().records.len()
    }

    /// Count this attempt, or refuse it
    pub fn check_and_record(&self, hash: &FingerprintHash) -> Decision {
        let entry = self.entry(hash);
        let mut record = entry.lock();
        let now = self.clock.now();

        if let Some(until) = record.locked_until {
            if until > now {
                let retry_after_secs = secs_until(until, now);
                log::warn!("Fingerprint {} locked out ({}s remaining)", hash.short(), retry_after_secs);
                return Decision::Deny { reason: DenyReason::LockedOut, retry_after_secs };
            }
            log::info!("Lockout expired for fingerprint {}", hash.short());
            record.reset();
        }

        record.prune(now, self.config.window());

        if record.attempts.len() >= self.config.max_attempts as usize {
            let until = now + self.config.lockout();
            record.locked_until = Some(until);
            log::warn!(
                "Fingerprint {} exceeded {} attempts, locked for {}s",
                hash.short(),
                self.config.max_attempts,
                self.config.lockout_secs
            );
            return Decision::Deny {
                reason: DenyReason::TooManyAttempts,
                retry_after_secs: secs_until(until, now),
            };
        }

        record.attempts.push_back(now);
        Decision::Allow
    }

    /// Forget history and any lockout. Call only after a verified decryption.
    pub fn clear_on_success(&self, hash: &FingerprintHash) {
        let mut table = self.table.lock();
        let Some(entry) = table.records.get(hash) else {
            return;
        };
        entry.lock().reset();

        if Arc::strong_count(entry) == 1 {
            table.records.remove(hash);
        }
    }

    /// Attempts currently inside the window
    pub fn attempt_count(&self, hash: &FingerprintHash) -> usize {
        let Some(entry) = self.existing(hash) else {
            return 0;
        };
        let mut record = entry.lock();
        record.prune(self.clock.now(), self.config.window());
        record.attempts.len()
    }

    pub fn state(&self, hash: &FingerprintHash) -> GuardState {
        let Some(entry) = self.existing(hash) else {
            return GuardState::Clear;
        };
        let record = entry.lock();
        let now = self.clock.now();

        match record.locked_until {
            Some(until) if until > now => GuardState::Locked {
                retry_after_secs: secs_until(until, now),
            },
            Some(_) => GuardState::Clear,
            None => {
                let window = self.config.window();
                let attempts = record.attempts.iter().filter(|t| now - **t < window).count();
                if attempts == 0 {
                    GuardState::Clear
                } else {
                    GuardState::Tracking { attempts }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> (AccessGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let guard = AccessGuard::with_clock(GuardConfig::default(), clock.clone());
        (guard, clock)
    }

    fn hash(n: u8) -> FingerprintHash {
        FingerprintHash::of_pixels(&[n])
    }

    #[test]
    fn test_lockout_state_machine() {
        let (guard, clock) = guard();
        let h = hash(1);

        assert_eq!(guard.state(&h), GuardState::Clear);
        for i in 1..=5 {
            assert_eq!(guard.check_and_record(&h), Decision::Allow);
            assert_eq!(guard.state(&h), GuardState::Tracking { attempts: i });
        }

        assert_eq!(
            guard.check_and_record(&h),
            Decision::Deny { reason: DenyReason::TooManyAttempts, retry_after_secs: 300 }
        );
        assert_eq!(guard.state(&h), GuardState::Locked { retry_after_secs: 300 });

        clock.advance_secs(10);
        assert_eq!(
            guard.check_and_record(&h),
            Decision::Deny { reason: DenyReason::LockedOut, retry_after_secs: 290 }
        );

        clock.advance_secs(100);
        assert_eq!(
            guard.check_and_record(&h),
            Decision::Deny { reason: DenyReason::LockedOut, retry_after_secs: 190 }
        );

        clock.advance_secs(190);
        assert_eq!(guard.check_and_record(&h), Decision::Allow);
        assert_eq!(guard.attempt_count(&h), 1);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let (guard, clock) = guard();
        let h = hash(1);

        for _ in 0..6 {
            guard.check_and_record(&h);
        }
        clock.advance(Duration::milliseconds(299_500));

        assert_eq!(
            guard.check_and_record(&h),
            Decision::Deny { reason: DenyReason::LockedOut, retry_after_secs: 1 }
        );
    }

    #[test]
    fn test_clear_on_success_resets() {
        let (guard, _clock) = guard();
        let h = hash(1);

        for _ in 0..4 {
            guard.check_and_record(&h);
        }
        guard.clear_on_success(&h);
        assert_eq!(guard.attempt_count(&h), 0);
        assert_eq!(guard.state(&h), GuardState::Clear);

        for _ in 0..6 {
            guard.check_and_record(&h);
        }
        assert!(matches!(guard.state(&h), GuardState::Locked { .. }));
        guard.clear_on_success(&h);
        assert!(guard.check_and_record(&h).is_allowed());
    }

    #[test]
    fn test_cleared_and_idle_entries_are_dropped() {
        let (guard, clock) = guard();

        for n in 0..50 {
            guard.check_and_record(&hash(n));
        }
        assert_eq!(guard.tracked(), 50);

        guard.clear_on_success(&hash(0));
        assert_eq!(guard.tracked(), 49);
        assert_eq!(guard.state(&hash(0)), GuardState::Clear);

        clock.advance_secs(3600 - 1);
        assert_eq!(guard.purge_idle(), 0);
        clock.advance_secs(1);

        // A running lockout is kept
        for _ in 0..6 {
            guard.check_and_record(&hash(200));
        }
        assert_eq!(guard.purge_idle(), 49);
        assert_eq!(guard.tracked(), 1);
        assert!(matches!(guard.state(&hash(200)), GuardState::Locked { .. }));
        assert_eq!(guard.attempt_count(&hash(1)), 0);
    }

    #[test]
    fn test_table_is_swept_when_it_grows() {
        let (guard, clock) = guard();
        let many = |range: std::ops::Range<u32>| {
            for n in range {
                guard.check_and_record(&FingerprintHash::of_pixels(&n.to_le_bytes()));
            }
        };

        many(0..PURGE_THRESHOLD as u32 - 1);
        assert_eq!(guard.tracked(), PURGE_THRESHOLD - 1);

        // Everything so far falls out of the window before the next insert
        clock.advance_secs(3600);
        many(PURGE_THRESHOLD as u32..PURGE_THRESHOLD as u32 + 1);
        assert_eq!(guard.tracked(), 1);
    }

    #[test]
    fn test_window_prunes_old_attempts() {
        let (guard, clock) = guard();
        let h = hash(1);

        for _ in 0..4 {
            guard.check_and_record(&h);
        }
        clock.advance_secs(3600);
        assert_eq!(guard.attempt_count(&h), 0);

        for _ in 0..5 {
            assert!(guard.check_and_record(&h).is_allowed());
        }
        assert!(!guard.check_and_record(&h).is_allowed());
    }

    #[test]
    fn test_hashes_are_independent() {
        let (guard, _clock) = guard();

        for _ in 0..6 {
            guard.check_and_record(&hash(1));
        }
        assert!(!guard.check_and_record(&hash(1)).is_allowed());
        assert!(guard.check_and_record(&hash(2)).is_allowed());
        assert_eq!(guard.attempt_count(&hash(2)), 1);
    }

    #[test]
    fn test_decision_into_result() {
        assert!(Decision::Allow.into_result().is_ok());

        let err = Decision::Deny { reason: DenyReason::TooManyAttempts, retry_after_secs: 300 }
            .into_result()
            .unwrap_err();
        assert!(matches!(err, VaultError::TooManyAttempts { retry_after_secs: 300 }));

        let err = Decision::Deny { reason: DenyReason::LockedOut, retry_after_secs: 7 }
            .into_result()
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(7));
    }

    #[test]
    fn test_concurrent_attempts_serialize() {
        let clock = Arc::new(ManualClock::default());
        let guard = Arc::new(AccessGuard::with_clock(
            GuardConfig { max_attempts: 20, ..Default::default() },
            clock,
        ));
        let h = hash(7);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                std::thread::spawn(move || {
                    (0..5).filter(|_| guard.check_and_record(&h).is_allowed()).count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 20);
    }

    #[test]
    fn test_config_validation() {
        assert!(GuardConfig::default().validate().is_ok());
        assert!(GuardConfig { max_attempts: 0, ..Default::default() }.validate().is_err());
        assert!(GuardConfig { lockout_secs: 0, ..Default::default() }.validate().is_err());
    }
}
