//! Expiration policy for cache entries.
//!
//! Pure functions turning per-write [`EntryOptions`] into the time to live
//! stored with an entry, and computing the renewed time to live when a
//! sliding entry is read.

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{Error, Result};
use crate::session::StoredSession;

/// Expiration options supplied with each write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryOptions {
    /// Fixed instant after which the entry must not survive.
    pub absolute_expiration: Option<DateTime<Utc>>,

    /// Deadline relative to the write time. Takes precedence over
    /// `absolute_expiration` when both are set.
    pub absolute_expiration_relative_to_now: Option<TimeDelta>,

    /// Idle period after which the entry expires unless read.
    pub sliding_expiration: Option<TimeDelta>,
}

impl EntryOptions {
    /// Options with no expiration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire at a fixed instant.
    pub fn absolute(mut self, at: DateTime<Utc>) -> Self {
        self.absolute_expiration = Some(at);
        self
    }

    /// Expire a fixed duration after the write.
    pub fn absolute_relative_to_now(mut self, after: TimeDelta) -> Self {
        self.absolute_expiration_relative_to_now = Some(after);
        self
    }

    /// Expire after an idle period, renewed on every read.
    pub fn sliding(mut self, idle: TimeDelta) -> Self {
        self.sliding_expiration = Some(idle);
        self
    }
}

/// Derive the single absolute deadline for an entry written at `creation_time`.
pub fn absolute_deadline(
    creation_time: DateTime<Utc>,
    options: &EntryOptions,
) -> Result<Option<DateTime<Utc>>> {
    if let Some(at) = options.absolute_expiration {
        if at <= creation_time {
            return Err(Error::InvalidExpiration);
        }
    }

    match options.absolute_expiration_relative_to_now {
        Some(after) => creation_time
            .checked_add_signed(after)
            .map(Some)
            .ok_or(Error::InvalidExpiration),
        None => Ok(options.absolute_expiration),
    }
}

/// Seconds to store as the entry's time to live. `None` means no expiry.
///
/// When both a deadline and a sliding period apply, the tighter one wins.
pub fn time_to_live_seconds(
    creation_time: DateTime<Utc>,
    deadline: Option<DateTime<Utc>>,
    options: &EntryOptions,
) -> Option<i64> {
    match (deadline, options.sliding_expiration) {
        (Some(deadline), Some(sliding)) => {
            Some((deadline - creation_time).min(sliding).num_seconds())
        }
        (Some(deadline), None) => Some((deadline - creation_time).num_seconds()),
        (None, Some(sliding)) => Some(sliding.num_seconds()),
        (None, None) => None,
    }
}

/// Build the stored entry for a write at `creation_time`.
pub fn build_session(
    key: &str,
    content: &[u8],
    options: &EntryOptions,
    creation_time: DateTime<Utc>,
) -> Result<StoredSession> {
    let deadline = absolute_deadline(creation_time, options)?;
    let time_to_live = time_to_live_seconds(creation_time, deadline, options);
    let sliding = time_to_live.is_some() && options.sliding_expiration.is_some();

    let absolute_sliding_expiration = match deadline {
        Some(deadline) if sliding => Some(deadline.timestamp()),
        _ => None,
    };

    Ok(StoredSession {
        key: key.to_string(),
        content: content.to_vec(),
        time_to_live,
        is_sliding_expiration: Some(sliding),
        absolute_sliding_expiration,
        partition_key_attribute: None,
    })
}

/// Time to live to write back when renewing a sliding entry at `now`.
///
/// Without a ceiling the stored value is reused unchanged. With a ceiling the
/// renewal never reaches past it, and a passed ceiling expires the entry
/// immediately.
pub fn renewal_ttl(session: &StoredSession, now: DateTime<Utc>) -> Option<i64> {
    let ceiling = match session.absolute_sliding_expiration {
        Some(ceiling) if ceiling > 0 => ceiling,
        _ => return session.time_to_live,
    };

    let Some(ceiling) = DateTime::<Utc>::from_timestamp(ceiling, 0) else {
        return session.time_to_live;
    };
    if ceiling < now {
        return Some(0);
    }

    let pending = (ceiling - now).num_seconds();
    match session.time_to_live {
        Some(ttl) if ttl <= pending => Some(ttl),
        _ => Some(pending),
    }
}
