//! Admission policy.
//!
//! A pure decision over a room, the candidate user, the candidate's existing
//! record in that room and the current time. The coordinator calls it on
//! every join; it never touches the stores.

use crate::errors::RoomError;
use crate::models::{Participant, ParticipantStatus, Room, RoomType};
use chrono::{DateTime, Duration, Utc};
use common::types::UserId;

/// Outcome of a successful policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// The candidate joins immediately.
    Allow,
    /// The candidate waits for the host to admit them.
    RequireWaiting,
}

#[derive(Debug, Clone, Copy)]
pub struct AccessControlPolicy {
    /// How long before `scheduled_start_time` invitees may join.
    join_lead: Duration,
}

impl AccessControlPolicy {
    pub fn new(join_lead: Duration) -> Self {
        Self { join_lead }
    }

    pub fn join_lead(&self) -> Duration {
        self.join_lead
    }

    /// Decide whether `user_id` may enter `room`.
    ///
    /// Rules, in order:
    /// 1. The host is always allowed.
    /// 2. Public rooms admit anyone.
    /// 3. Private rooms require a reusable record (invited, left or waiting).
    /// 4. Scheduled rooms add a window: from `start - join_lead` until
    ///    `scheduled_end_time`, when one is set.
    ///
    /// Rooms with the waiting room enabled turn an allow into
    /// [`AccessDecision::RequireWaiting`] for everyone but the host.
    ///
    /// # Errors
    ///
    /// - `AlreadyInRoom` when the record is joined (private/scheduled rooms)
    /// - `AccessDenied` for declined, denied or removed records
    /// - `NotInvited` when private/scheduled and there is no record
    /// - `TooEarly` / `JoinWindowClosed` outside the scheduled window
    pub fn evaluate(
        &self,
        room: &Room,
        user_id: UserId,
        existing: Option<&Participant>,
        now: DateTime<Utc>,
    ) -> Result<AccessDecision, RoomError> {
        if room.is_host(user_id) {
            return Ok(AccessDecision::Allow);
        }

        match room.room_type {
            RoomType::Public => {}
            RoomType::Private => require_invitation(existing)?,
            RoomType::Scheduled => {
                require_invitation(existing)?;
                self.check_window(room, now)?;
            }
        }

        Ok(if room.waiting_room_enabled {
            AccessDecision::RequireWaiting
        } else {
            AccessDecision::Allow
        })
    }

    fn check_window(&self, room: &Room, now: DateTime<Utc>) -> Result<(), RoomError> {
        if let Some(start) = room.scheduled_start_time {
            if now < start - self.join_lead {
                return Err(RoomError::TooEarly);
            }
        }
        if let Some(end) = room.scheduled_end_time {
            if now > end {
                return Err(RoomError::JoinWindowClosed);
            }
        }
        Ok(())
    }
}

fn require_invitation(existing: Option<&Participant>) -> Result<(), RoomError> {
    match existing.map(|p| p.status) {
        Some(ParticipantStatus::Invited | ParticipantStatus::Left | ParticipantStatus::Waiting) => {
            Ok(())
        }
        Some(ParticipantStatus::Joined) => Err(RoomError::AlreadyInRoom),
        Some(
            ParticipantStatus::Declined | ParticipantStatus::Denied | ParticipantStatus::Removed,
        ) => Err(RoomError::AccessDenied),
        None => Err(RoomError::NotInvited),
    }
}
