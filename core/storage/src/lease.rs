//! Blob lease model.
//!
//! [`LeaseRecord`] is the bookkeeping a backend without a native lease
//! primitive can embed per blob. All transitions take `now` explicitly so
//! expiry and break periods are evaluated against a single clock reading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use cask_common::{ETag, Error, LeaseId, Result};

/// Shortest fixed lease, in seconds.
pub const MIN_LEASE_SECS: u64 = 15;
/// Longest fixed lease, in seconds.
pub const MAX_LEASE_SECS: u64 = 60;
/// Longest break period, in seconds.
pub const MAX_BREAK_SECS: u64 = 60;

/// Requested lease duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseDuration {
    Fixed(Duration),
    Infinite,
}

impl LeaseDuration {
    /// A fixed lease of `secs` seconds.
    ///
    /// # Errors
    /// - `InvalidInput` unless `MIN_LEASE_SECS <= secs <= MAX_LEASE_SECS`
    pub fn fixed(secs: u64) -> Result<Self> {
        let duration = Self::Fixed(Duration::from_secs(secs));
        duration.validate()?;
        Ok(duration)
    }

    pub fn validate(&self) -> Result<()> {
        if let LeaseDuration::Fixed(d) = self {
            let secs = d.as_secs();
            if !(MIN_LEASE_SECS..=MAX_LEASE_SECS).contains(&secs) {
                return Err(Error::InvalidInput(format!(
                    "Lease duration must be between {} and {} seconds, got {}",
                    MIN_LEASE_SECS, MAX_LEASE_SECS, secs
                )));
            }
        }
        Ok(())
    }
}

/// Externally visible lease state of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    #[default]
    Available,
    Leased,
    Expired,
    Breaking,
    Broken,
}

/// Result of a lease operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseInfo {
    /// Lease the operation acted on.
    pub lease_id: LeaseId,
    /// Time until a breaking lease is broken. Only set by break.
    pub remaining: Option<Duration>,
    /// Last modification time of the blob.
    pub last_modified: DateTime<Utc>,
    /// Current ETag of the blob.
    pub etag: ETag,
}

#[derive(Debug, Clone, Default)]
enum Status {
    #[default]
    Available,
    Leased {
        id: LeaseId,
        duration: LeaseDuration,
        expires: Option<DateTime<Utc>>,
    },
    Breaking {
        id: LeaseId,
        until: DateTime<Utc>,
    },
    Broken {
        id: LeaseId,
    },
}

fn after(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    now + chrono::Duration::milliseconds(d.as_millis() as i64)
}

/// Per-blob lease bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct LeaseRecord {
    status: Status,
}

impl LeaseRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lease state at `now`.
    pub fn state(&self, now: DateTime<Utc>) -> LeaseState {
        match &self.status {
            Status::Available => LeaseState::Available,
            Status::Leased { expires, .. } => match expires {
                Some(at) if *at <= now => LeaseState::Expired,
                _ => LeaseState::Leased,
            },
            Status::Breaking { until, .. } if *until <= now => LeaseState::Broken,
            Status::Breaking { .. } => LeaseState::Breaking,
            Status::Broken { .. } => LeaseState::Broken,
        }
    }

    /// Id of the lease that currently blocks unauthenticated writes.
    ///
    /// A breaking lease still holds until its break period ends.
    pub fn active_id(&self, now: DateTime<Utc>) -> Option<&LeaseId> {
        match (&self.status, self.state(now)) {
            (Status::Leased { id, .. }, LeaseState::Leased) => Some(id),
            (Status::Breaking { id, .. }, LeaseState::Breaking) => Some(id),
            _ => None,
        }
    }

    fn held_id(&self) -> Option<&LeaseId> {
        match &self.status {
            Status::Available => None,
            Status::Leased { id, .. } | Status::Breaking { id, .. } | Status::Broken { id } => {
                Some(id)
            }
        }
    }

    /// Acquire a lease, or re-acquire one the caller already holds.
    pub fn acquire(
        &mut self,
        proposed: Option<LeaseId>,
        duration: LeaseDuration,
        now: DateTime<Utc>,
    ) -> Result<LeaseId> {
        duration.validate()?;

        match self.state(now) {
            LeaseState::Leased => {
                let current = self.held_id();
                if proposed.is_none() || proposed.as_ref() != current {
                    return Err(Error::PreconditionFailed(
                        "There is already a lease present".to_string(),
                    ));
                }
            }
            LeaseState::Breaking => {
                return Err(Error::PreconditionFailed(
                    "Lease is being broken and cannot be acquired".to_string(),
                ));
            }
            LeaseState::Available | LeaseState::Expired | LeaseState::Broken => {}
        }

        let id = proposed.unwrap_or_else(LeaseId::generate);
        self.status = Status::Leased {
            id: id.clone(),
            duration,
            expires: match duration {
                LeaseDuration::Fixed(d) => Some(after(now, d)),
                LeaseDuration::Infinite => None,
            },
        };
        Ok(id)
    }

    /// Renew a leased or expired lease with its original duration.
    pub fn renew(&mut self, lease_id: &LeaseId, now: DateTime<Utc>) -> Result<()> {
        match &self.status {
            Status::Leased { id, duration, .. } if id == lease_id => {
                let duration = *duration;
                self.status = Status::Leased {
                    id: id.clone(),
                    duration,
                    expires: match duration {
                        LeaseDuration::Fixed(d) => Some(after(now, d)),
                        LeaseDuration::Infinite => None,
                    },
                };
                Ok(())
            }
            Status::Breaking { id, .. } | Status::Broken { id } if id == lease_id => Err(
                Error::PreconditionFailed("Broken lease cannot be renewed".to_string()),
            ),
            _ => Err(Error::PreconditionFailed(format!(
                "Lease {} is not held on this blob",
                lease_id
            ))),
        }
    }

    /// Release the lease so the blob can be leased again immediately.
    pub fn release(&mut self, lease_id: &LeaseId) -> Result<()> {
        if self.held_id() != Some(lease_id) {
            return Err(Error::PreconditionFailed(format!(
                "Lease {} is not held on this blob",
                lease_id
            )));
        }
        self.status = Status::Available;
        Ok(())
    }

    /// Break the lease.
    ///
    /// With no period the break is immediate. With a period the lease keeps
    /// blocking writes until it elapses, shortened to the lease's own
    /// remaining time when that is smaller. An already breaking lease
    /// keeps the earlier of its current and requested end.
    ///
    /// Returns the broken lease's id and the time until it is broken.
    pub fn break_lease(
        &mut self,
        period: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<(LeaseId, Duration)> {
        if let Some(p) = period {
            if p.as_secs() > MAX_BREAK_SECS {
                return Err(Error::InvalidInput(format!(
                    "Break period must be at most {} seconds",
                    MAX_BREAK_SECS
                )));
            }
        }

        let state = self.state(now);
        let (id, requested_until) = match (&self.status, state) {
            (Status::Available, _) => {
                return Err(Error::PreconditionFailed(
                    "There is no lease to break".to_string(),
                ))
            }
            (Status::Leased { id, expires, .. }, LeaseState::Leased) => {
                let wanted = after(now, period.unwrap_or_default());
                let until = match expires {
                    Some(at) if *at < wanted => *at,
                    _ => wanted,
                };
                (id.clone(), until)
            }
            (Status::Breaking { id, until }, LeaseState::Breaking) => {
                let wanted = after(now, period.unwrap_or_default());
                (id.clone(), (*until).min(wanted))
            }
            (_, _) => {
                let id = self.held_id().cloned().unwrap_or_else(LeaseId::generate);
                self.status = Status::Broken { id: id.clone() };
                return Ok((id, Duration::ZERO));
            }
        };

        if requested_until <= now {
            self.status = Status::Broken { id: id.clone() };
            return Ok((id, Duration::ZERO));
        }

        let remaining = (requested_until - now).to_std().unwrap_or_default();
        self.status = Status::Breaking {
            id: id.clone(),
            until: requested_until,
        };
        Ok((id, remaining))
    }
}
