//! C7 — pair-code issuance, channel membership, and TTL expiry (§4.7).
//!
//! A single `parking_lot::Mutex` guards both tables; callers never hold
//! the lock across an `.await` point.

use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A pending or consumed pairing code (§3 `PairCode`).
#[derive(Debug, Clone)]
pub struct PairCode {
    pub code: String,
    pub desktop_session_id: String,
    pub channel_id: String,
    pub issued_at: Instant,
    pub expires_at: Instant,
    pub used_at: Option<Instant>,
}

/// A channel linking one desktop session to at most one mobile session.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: String,
    pub desktop_session_id: String,
    pub mobile_session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimError {
    CodeInvalid,
    CodeExpired,
    CodeAlreadyUsed,
    NoDesktop,
}

impl std::fmt::Display for ClaimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ClaimError::CodeInvalid => "pair code is not recognized",
            ClaimError::CodeExpired => "pair code has expired",
            ClaimError::CodeAlreadyUsed => "pair code has already been claimed",
            ClaimError::NoDesktop => "the channel's desktop session is no longer connected",
        };
        write!(f, "{msg}")
    }
}

impl std::error::Error for ClaimError {}

#[derive(Debug, Clone)]
pub struct ClaimResult {
    pub channel_id: String,
}

struct Tables {
    codes: HashMap<String, PairCode>,
    channels: HashMap<String, Channel>,
}

/// Shared registry of active pair codes and channels.
pub struct PairingRegistry {
    ttl: Duration,
    tables: parking_lot::Mutex<Tables>,
}

impl PairingRegistry {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tables: parking_lot::Mutex::new(Tables {
                codes: HashMap::new(),
                channels: HashMap::new(),
            }),
        }
    }

    /// Issue a fresh, uniformly-random 6-digit code and create its channel.
    pub fn issue(&self, desktop_session_id: &str) -> PairCode {
        let mut tables = self.tables.lock();
        let code = loop {
            let candidate = generate_code();
            if !tables.codes.contains_key(&candidate) {
                break candidate;
            }
        };

        let now = Instant::now();
        let channel_id = format!("pair-{code}");
        let pair_code = PairCode {
            code: code.clone(),
            desktop_session_id: desktop_session_id.to_owned(),
            channel_id: channel_id.clone(),
            issued_at: now,
            expires_at: now + self.ttl,
            used_at: None,
        };

        tables.channels.insert(
            channel_id.clone(),
            Channel {
                id: channel_id,
                desktop_session_id: desktop_session_id.to_owned(),
                mobile_session_id: None,
            },
        );
        tables.codes.insert(code, pair_code.clone());
        pair_code
    }

    /// Validate and consume a code, joining `mobile_session_id` to its channel.
    ///
    /// `desktop_alive` is asked whether the code's owning desktop session is
    /// still registered; a dead desktop fails the claim without consuming
    /// the code, so a later retry (once the desktop reconnects and reissues)
    /// is not blocked by this attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError::CodeInvalid`] if no such code was ever issued,
    /// [`ClaimError::CodeExpired`] if its TTL elapsed,
    /// [`ClaimError::CodeAlreadyUsed`] if a mobile session already claimed it,
    /// or [`ClaimError::NoDesktop`] if its desktop session is gone (§3).
    pub fn claim(
        &self,
        code: &str,
        mobile_session_id: &str,
        desktop_alive: impl Fn(&str) -> bool,
    ) -> Result<ClaimResult, ClaimError> {
        let mut tables = self.tables.lock();
        let Some(pair_code) = tables.codes.get_mut(code) else {
            return Err(ClaimError::CodeInvalid);
        };

        if pair_code.used_at.is_some() {
            return Err(ClaimError::CodeAlreadyUsed);
        }
        if Instant::now() >= pair_code.expires_at {
            return Err(ClaimError::CodeExpired);
        }
        if !desktop_alive(&pair_code.desktop_session_id) {
            return Err(ClaimError::NoDesktop);
        }

        pair_code.used_at = Some(Instant::now());
        let channel_id = pair_code.channel_id.clone();

        if let Some(channel) = tables.channels.get_mut(&channel_id) {
            channel.mobile_session_id = Some(mobile_session_id.to_owned());
        }

        Ok(ClaimResult { channel_id })
    }

    /// Validate a code without consuming it, returning the desktop session
    /// it was issued for (§6 `/api/auth/ws-token-mobile`).
    ///
    /// # Errors
    ///
    /// Same conditions as [`PairingRegistry::claim`], minus
    /// [`ClaimError::CodeAlreadyUsed`] being fatal: an already-claimed code
    /// still identifies a valid desktop session for token issuance.
    pub fn peek(&self, code: &str) -> Result<String, ClaimError> {
        let tables = self.tables.lock();
        let Some(pair_code) = tables.codes.get(code) else {
            return Err(ClaimError::CodeInvalid);
        };
        if Instant::now() >= pair_code.expires_at {
            return Err(ClaimError::CodeExpired);
        }
        Ok(pair_code.desktop_session_id.clone())
    }

    /// Remove the mobile member of a channel, e.g. on mobile disconnect.
    pub fn clear_mobile(&self, channel_id: &str) {
        if let Some(channel) = self.tables.lock().channels.get_mut(channel_id) {
            channel.mobile_session_id = None;
        }
    }

    #[must_use]
    pub fn channel(&self, channel_id: &str) -> Option<Channel> {
        self.tables.lock().channels.get(channel_id).cloned()
    }

    /// Periodic sweep: drop expired codes, and any channel that expired
    /// without ever being claimed (§4.7 `gc`).
    pub fn gc(&self) {
        let mut tables = self.tables.lock();
        let now = Instant::now();
        let expired: Vec<String> = tables
            .codes
            .iter()
            .filter(|(_, c)| now >= c.expires_at)
            .map(|(code, _)| code.clone())
            .collect();

        for code in expired {
            if let Some(pair_code) = tables.codes.remove(&code) {
                if pair_code.used_at.is_none() {
                    tables.channels.remove(&pair_code.channel_id);
                }
            }
        }
    }

    /// Spawn the background GC sweep on a fixed interval, cancellable via
    /// `cancel`.
    pub fn spawn_gc(self: std::sync::Arc<Self>, interval: Duration, cancel: tokio_util::sync::CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => self.gc(),
                }
            }
        });
    }
}

fn generate_code() -> String {
    let value: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{value:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_creates_a_six_digit_code_and_channel() {
        let registry = PairingRegistry::new(Duration::from_secs(600));
        let pair_code = registry.issue("desktop-1");
        assert_eq!(pair_code.code.len(), 6);
        assert!(pair_code.code.chars().all(|c| c.is_ascii_digit()));
        let channel = registry.channel(&pair_code.channel_id).expect("channel exists");
        assert_eq!(channel.desktop_session_id, "desktop-1");
        assert!(channel.mobile_session_id.is_none());
    }

    #[test]
    fn claim_joins_mobile_to_the_channel() {
        let registry = PairingRegistry::new(Duration::from_secs(600));
        let pair_code = registry.issue("desktop-1");
        let result = registry.claim(&pair_code.code, "mobile-1", |_| true).expect("claim succeeds");
        assert_eq!(result.channel_id, pair_code.channel_id);
        let channel = registry.channel(&result.channel_id).unwrap();
        assert_eq!(channel.mobile_session_id.as_deref(), Some("mobile-1"));
    }

    #[test]
    fn claim_twice_fails_with_already_used() {
        let registry = PairingRegistry::new(Duration::from_secs(600));
        let pair_code = registry.issue("desktop-1");
        registry.claim(&pair_code.code, "mobile-1", |_| true).unwrap();
        let second = registry.claim(&pair_code.code, "mobile-2", |_| true);
        assert_eq!(second.unwrap_err(), ClaimError::CodeAlreadyUsed);
    }

    #[test]
    fn claim_unknown_code_is_invalid() {
        let registry = PairingRegistry::new(Duration::from_secs(600));
        let result = registry.claim("000000", "mobile-1", |_| true);
        assert_eq!(result.unwrap_err(), ClaimError::CodeInvalid);
    }

    #[test]
    fn claim_after_expiry_fails() {
        let registry = PairingRegistry::new(Duration::from_millis(5));
        let pair_code = registry.issue("desktop-1");
        std::thread::sleep(Duration::from_millis(15));
        let result = registry.claim(&pair_code.code, "mobile-1", |_| true);
        assert_eq!(result.unwrap_err(), ClaimError::CodeExpired);
    }

    #[test]
    fn claim_fails_with_no_desktop_when_desktop_session_is_gone() {
        let registry = PairingRegistry::new(Duration::from_secs(600));
        let pair_code = registry.issue("desktop-1");
        let result = registry.claim(&pair_code.code, "mobile-1", |_| false);
        assert_eq!(result.unwrap_err(), ClaimError::NoDesktop);

        // the code is still unconsumed: a live desktop can claim it later.
        assert!(registry.claim(&pair_code.code, "mobile-1", |_| true).is_ok());
    }

    #[test]
    fn gc_removes_expired_unclaimed_channel_but_keeps_claimed_one() {
        let registry = PairingRegistry::new(Duration::from_millis(5));
        let unclaimed = registry.issue("desktop-1");
        let claimed = registry.issue("desktop-2");
        registry.claim(&claimed.code, "mobile-2", |_| true).unwrap();

        std::thread::sleep(Duration::from_millis(15));
        registry.gc();

        assert!(registry.channel(&unclaimed.channel_id).is_none());
        assert!(registry.channel(&claimed.channel_id).is_some());
    }

    #[test]
    fn peek_does_not_consume_the_code() {
        let registry = PairingRegistry::new(Duration::from_secs(600));
        let pair_code = registry.issue("desktop-1");
        assert_eq!(registry.peek(&pair_code.code).unwrap(), "desktop-1");
        // still claimable afterwards
        assert!(registry.claim(&pair_code.code, "mobile-1", |_| true).is_ok());
    }

    #[test]
    fn clear_mobile_removes_membership_without_dropping_the_channel() {
        let registry = PairingRegistry::new(Duration::from_secs(600));
        let pair_code = registry.issue("desktop-1");
        let result = registry.claim(&pair_code.code, "mobile-1", |_| true).unwrap();
        registry.clear_mobile(&result.channel_id);
        let channel = registry.channel(&result.channel_id).unwrap();
        assert!(channel.mobile_session_id.is_none());
    }
}
