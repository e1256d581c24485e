//! Delivery-time arithmetic for notification requests
//!
//! Producers write notification times as wall-clock times in one fixed civil
//! zone, whatever offset they happened to encode. The civil components are
//! kept and re-read in the configured zone; they are never converted.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::time::Duration;

use crate::config::{ConfigResult, NotificationsConfig};

/// When a notification fires and how long until then
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledDelay {
    pub deliver_at: DateTime<FixedOffset>,
    pub delay: Duration,
    /// The requested time had already passed and the delay was cut to zero
    pub clamped: bool,
}

impl ScheduledDelay {
    /// Whole seconds of delay, rounded up so a delivery is never early
    pub fn delay_seconds(&self) -> u64 {
        let seconds = self.delay.as_secs();
        if self.delay.subsec_nanos() > 0 {
            seconds + 1
        } else {
            seconds
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySchedule {
    target_offset: FixedOffset,
}

impl DeliverySchedule {
    pub fn new(target_offset: FixedOffset) -> Self {
        Self { target_offset }
    }

    pub fn from_config(config: &NotificationsConfig) -> ConfigResult<Self> {
        Ok(Self::new(config.target_offset()?))
    }

    pub fn target_offset(&self) -> FixedOffset {
        self.target_offset
    }

    /// Keep the year..nanosecond components of `scheduled`, swap its offset
    /// for the target zone
    pub fn normalize_scheduled_time(&self, scheduled: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        scheduled
            .naive_local()
            .and_local_timezone(self.target_offset)
            .single()
            // only reachable at the edges of the representable range
            .unwrap_or(scheduled)
    }

    /// Delay from `now` until the normalized `scheduled` instant, clamped at zero
    pub fn compute_delay(&self, scheduled: DateTime<FixedOffset>, now: DateTime<Utc>) -> ScheduledDelay {
        let deliver_at = self.normalize_scheduled_time(scheduled);
        let remaining = deliver_at.with_timezone(&Utc) - now;

        match remaining.to_std() {
            Ok(delay) => ScheduledDelay {
                deliver_at,
                delay,
                clamped: false,
            },
            Err(_) => ScheduledDelay {
                deliver_at,
                delay: Duration::ZERO,
                clamped: true,
            },
        }
    }

    /// Like [`compute_delay`](Self::compute_delay); a request without a time
    /// is treated as overdue and delivered immediately
    pub fn delay_for(
        &self,
        scheduled: Option<DateTime<FixedOffset>>,
        now: DateTime<Utc>,
    ) -> ScheduledDelay {
        match scheduled {
            Some(scheduled) => self.compute_delay(scheduled, now),
            None => ScheduledDelay {
                deliver_at: now.with_timezone(&self.target_offset),
                delay: Duration::ZERO,
                clamped: true,
            },
        }
    }
}

impl Default for DeliverySchedule {
    fn default() -> Self {
        Self::new(
            FixedOffset::east_opt(crate::constants::DEFAULT_TARGET_UTC_OFFSET_SECONDS)
                .unwrap_or(Utc.fix()),
        )
    }
}
