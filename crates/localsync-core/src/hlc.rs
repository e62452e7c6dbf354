//! Hybrid Logical Clock (HLC) implementation for distributed stamps.
//!
//! HLC provides globally ordered timestamps that combine:
//! - Physical wall-clock time (milliseconds)
//! - Logical counter for events at the same physical time
//! - Site ID for deterministic tiebreaking
//!
//! Timestamps are shipped and stored in packed form ([`Stamp`]), a string
//! whose lexicographic order is the clock order. Stamps are used directly as
//! map keys and compared without unpacking.
//!
//! # References
//!
//! Kulkarni, Demirbas, et al. "Logical Physical Clocks and Consistent Snapshots
//! in Globally Distributed Databases" (2014)

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Width of the zero-padded physical component of a packed stamp.
const PHYSICAL_WIDTH: usize = 15;

/// Width of the base-36 logical component. `u32::MAX` is 7 base-36 digits.
const LOGICAL_WIDTH: usize = 7;

/// A globally unique timestamp combining physical time, logical counter, and site ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Physical wall-clock time in milliseconds since UNIX epoch
    pub physical_ms: u64,
    /// Logical counter for events at the same physical time
    pub logical: u32,
    /// Site ID for deterministic tiebreaking
    pub site: String,
}

impl Timestamp {
    /// Pack into the totally ordered string form.
    #[must_use]
    pub fn pack(&self) -> Stamp {
        Stamp(format!(
            "{:0pw$}:{:0>lw$}:{}",
            self.physical_ms,
            to_base36(self.logical),
            self.site,
            pw = PHYSICAL_WIDTH,
            lw = LOGICAL_WIDTH,
        ))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        // First compare physical time
        match self.physical_ms.cmp(&other.physical_ms) {
            Ordering::Equal => {}
            ord => return ord,
        }
        // Then logical counter
        match self.logical.cmp(&other.logical) {
            Ordering::Equal => {}
            ord => return ord,
        }
        // Finally site ID for deterministic tiebreaking
        self.site.cmp(&other.site)
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A packed [`Timestamp`].
///
/// The empty stamp ([`Stamp::zero`]) sorts before every packed timestamp and
/// marks containers that were created implicitly rather than written.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stamp(String);

impl Stamp {
    /// The minimum stamp.
    #[must_use]
    pub fn zero() -> Self {
        Self(String::new())
    }

    /// Wrap an already packed string without validating it.
    #[must_use]
    pub fn from_packed(packed: impl Into<String>) -> Self {
        Self(packed.into())
    }

    /// Returns `true` for the minimum stamp.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    /// The packed string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The site that issued this stamp, if the stamp is well formed.
    #[must_use]
    pub fn site(&self) -> Option<&str> {
        let mut parts = self.0.splitn(3, ':');
        parts.next()?;
        parts.next()?;
        parts.next().filter(|site| !site.is_empty())
    }

    /// Unpack into a [`Timestamp`].
    ///
    /// # Errors
    ///
    /// Returns error if the stamp is not in packed form.
    pub fn unpack(&self) -> Result<Timestamp, ClockError> {
        let malformed = || ClockError::Malformed(self.0.clone());
        let mut parts = self.0.splitn(3, ':');

        let physical = parts.next().ok_or_else(malformed)?;
        let logical = parts.next().ok_or_else(malformed)?;
        let site = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;

        if physical.len() != PHYSICAL_WIDTH || logical.len() != LOGICAL_WIDTH {
            return Err(malformed());
        }

        Ok(Timestamp {
            physical_ms: physical.parse().map_err(|_| malformed())?,
            logical: u32::from_str_radix(logical, 36).map_err(|_| malformed())?,
            site: site.to_string(),
        })
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Timestamp> for Stamp {
    fn from(ts: &Timestamp) -> Self {
        ts.pack()
    }
}

/// Hybrid Logical Clock state machine.
#[derive(Debug, Clone)]
pub struct Hlc {
    /// Current timestamp state
    last: Timestamp,
    /// Remote stamps further ahead of local wall time than this are logged
    max_drift_ms: Option<u64>,
}

impl Hlc {
    /// Create a new HLC for the given site at the current wall time.
    #[must_use]
    pub fn new(site: impl Into<String>) -> Self {
        Self::init(site, current_time_ms())
    }

    /// Create a new HLC for the given site at an explicit physical time.
    #[must_use]
    pub fn init(site: impl Into<String>, now_ms: u64) -> Self {
        Self {
            last: Timestamp {
                physical_ms: now_ms,
                logical: 0,
                site: site.into(),
            },
            max_drift_ms: None,
        }
    }

    /// Warn when a received stamp is more than `max_drift_ms` ahead of local time.
    ///
    /// Drifting stamps are still accepted.
    #[must_use]
    pub fn with_max_drift(mut self, max_drift_ms: u64) -> Self {
        self.max_drift_ms = Some(max_drift_ms);
        self
    }

    /// Get the site ID for this clock.
    #[must_use]
    pub fn site(&self) -> &str {
        &self.last.site
    }

    /// Generate a new timestamp for a local event.
    ///
    /// Guarantees the returned timestamp is greater than any previously
    /// generated or received timestamp.
    pub fn tick(&mut self) -> Timestamp {
        self.tick_at(current_time_ms())
    }

    /// [`Hlc::tick`] with an explicit physical time.
    pub fn tick_at(&mut self, now_ms: u64) -> Timestamp {
        if now_ms > self.last.physical_ms {
            // Wall clock advanced, reset logical counter
            self.last.physical_ms = now_ms;
            self.last.logical = 0;
        } else {
            // Wall clock hasn't advanced, increment logical counter
            self.last.logical = self.last.logical.saturating_add(1);
        }

        self.last.clone()
    }

    /// Generate a packed stamp for a local event.
    pub fn next_stamp(&mut self) -> Stamp {
        self.tick().pack()
    }

    /// Update the clock upon receiving a remote timestamp.
    ///
    /// Ensures the local clock advances past the received timestamp.
    pub fn update(&mut self, received: &Timestamp) {
        self.update_at(received, current_time_ms());
    }

    /// [`Hlc::update`] with an explicit physical time.
    pub fn update_at(&mut self, received: &Timestamp, now_ms: u64) {
        if let Some(max_drift) = self.max_drift_ms {
            if received.physical_ms > now_ms.saturating_add(max_drift) {
                tracing::warn!(
                    site = %self.last.site,
                    remote_site = %received.site,
                    drift_ms = received.physical_ms - now_ms,
                    max_drift_ms = max_drift,
                    "Received stamp beyond drift bound"
                );
            }
        }

        if now_ms > self.last.physical_ms && now_ms > received.physical_ms {
            // Wall clock is ahead of both, use it
            self.last.physical_ms = now_ms;
            self.last.logical = 0;
        } else if self.last.physical_ms == received.physical_ms {
            // Same physical time, take max logical and increment
            self.last.logical = self.last.logical.max(received.logical).saturating_add(1);
        } else if received.physical_ms > self.last.physical_ms {
            // Received is ahead, sync to it
            self.last.physical_ms = received.physical_ms;
            self.last.logical = received.logical.saturating_add(1);
        } else {
            // Local is ahead, just increment
            self.last.logical = self.last.logical.saturating_add(1);
        }
    }

    /// Update the clock from a packed stamp.
    ///
    /// # Errors
    ///
    /// Returns error if the stamp cannot be unpacked. The zero stamp is ignored.
    pub fn observe(&mut self, stamp: &Stamp) -> Result<(), ClockError> {
        if stamp.is_zero() {
            return Ok(());
        }
        let received = stamp.unpack()?;
        self.update(&received);
        Ok(())
    }

    /// Get the current timestamp without advancing the clock.
    #[must_use]
    pub fn current(&self) -> &Timestamp {
        &self.last
    }
}

/// Errors that can occur with clock operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// Stamp is not in packed form
    #[error("malformed stamp: {0:?}")]
    Malformed(String),
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(LOGICAL_WIDTH);
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Get current wall clock time in milliseconds since UNIX epoch.
fn current_time_ms() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}
