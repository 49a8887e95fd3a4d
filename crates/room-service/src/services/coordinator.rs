//! Session coordinator.
//!
//! Every externally triggered room or participant transition goes through
//! here, whether it comes from a client request or a media server webhook.
//! Each operation reads the current state, checks whether it is already in
//! the target state, and commits the change through one atomic
//! [`SessionStore`] method. Commits guarded by a prior status come back
//! `Stale` when another writer got there first; the operation re-reads and
//! retries up to [`MAX_COMMIT_ATTEMPTS`] times.
//!
//! Media server calls are bounded by the configured deadline. Failures while
//! tearing rooms down are logged and never block the database change.

use crate::config::Config;
use crate::errors::RoomError;
use crate::models::{
    is_valid_email, normalize_email, AccessGrant, Caller, CreateRoomRequest, JoinRoomResponse,
    Participant, ParticipantRole, ParticipantStatus, Room, RoomFilter, RoomPage, RoomStatus,
    RoomType, DEFAULT_MAX_PARTICIPANTS, MAX_PAGE_SIZE, MAX_PARTICIPANTS, MAX_ROOM_NAME_LENGTH,
    MAX_ROOM_TAGS, MIN_PARTICIPANTS,
};
use crate::observability::metrics;
use crate::repositories::{
    DepartureCommit, DeparturePlan, HostSwap, JoinCommit, JoinPlan, SessionStore, WriteOutcome,
};
use crate::services::access_policy::{AccessControlPolicy, AccessDecision};
use crate::services::clock::Clock;
use crate::services::media::{
    AccessTokenRequest, CreateExternalRoom, EgressSettings, MediaGrants, MediaInfrastructure,
};
use chrono::{DateTime, SubsecRound, Utc};
use common::types::{ParticipantId, RoomId, UserId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Attempts for a compare-and-set commit before giving up with `Conflict`.
pub const MAX_COMMIT_ATTEMPTS: usize = 3;

const MAX_DESCRIPTION_LENGTH: usize = 2000;
const MAX_TAG_LENGTH: usize = 50;
const MAX_REASON_LENGTH: usize = 500;

/// Tunables the coordinator takes from configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub access_token_ttl: Duration,
    pub empty_timeout_secs: u32,
    pub departure_timeout_secs: u32,
    /// Deadline for each media server call.
    pub media_timeout: Duration,
    pub auto_recording: bool,
    pub recording_filepath_prefix: String,
    /// How long before a scheduled start invitees may join.
    pub join_lead: chrono::Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            access_token_ttl: Duration::from_secs(config.access_token_ttl_seconds),
            empty_timeout_secs: config.empty_timeout_seconds,
            departure_timeout_secs: config.departure_timeout_seconds,
            media_timeout: Duration::from_secs(config.media_request_timeout_seconds),
            auto_recording: config.auto_recording_enabled,
            recording_filepath_prefix: config.recording_filepath_prefix.clone(),
            join_lead: chrono::Duration::minutes(config.scheduled_join_lead_minutes),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::from_secs(3600),
            empty_timeout_secs: 300,
            departure_timeout_secs: 20,
            media_timeout: Duration::from_secs(10),
            auto_recording: false,
            recording_filepath_prefix: "recordings".to_string(),
            join_lead: chrono::Duration::minutes(15),
        }
    }
}

/// What `participant_joined` did to the stored record.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceUpdate {
    /// The record was already joined.
    Unchanged,
    /// The record moved to joined.
    Joined(Room),
    /// The event predates the participant's last departure.
    StaleEvent,
    /// The record's status forbids presence; the caller should evict.
    Refused(ParticipantStatus),
}

/// Who caused a room transition, for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Client,
    Webhook,
    Auto,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Client => "client",
            Trigger::Webhook => "webhook",
            Trigger::Auto => "auto",
        }
    }
}

/// Orchestrates room lifecycle and participant admission.
#[derive(Clone)]
pub struct SessionCoordinator {
    store: Arc<dyn SessionStore>,
    media: Arc<dyn MediaInfrastructure>,
    policy: AccessControlPolicy,
    clock: Arc<dyn Clock>,
    settings: CoordinatorSettings,
}

impl SessionCoordinator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        media: Arc<dyn MediaInfrastructure>,
        clock: Arc<dyn Clock>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            store,
            media,
            policy: AccessControlPolicy::new(settings.join_lead),
            clock,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Rooms
    // ------------------------------------------------------------------------

    /// Create a room and its host invitation.
    ///
    /// Allocates the external room first. If persisting fails afterwards, the
    /// external room is deleted before the error is returned.
    #[instrument(skip_all, name = "room.coordinator.create_room", fields(host_id = %host.user_id))]
    pub async fn create_room(
        &self,
        host: &Caller,
        request: CreateRoomRequest,
    ) -> Result<Room, RoomError> {
        let validated = validate_create_request(request)?;
        let now = self.clock.now();
        let room_id = RoomId::new();
        let external_ref = room_id.to_string();

        let egress = (self.settings.auto_recording && validated.recording_enabled).then(|| {
            EgressSettings {
                filepath: format!(
                    "{}/{external_ref}-{{time}}.mp4",
                    self.settings.recording_filepath_prefix.trim_end_matches('/')
                ),
            }
        });
        let params = CreateExternalRoom {
            name: external_ref.clone(),
            max_participants: u32::try_from(validated.max_participants).unwrap_or(0),
            empty_timeout_secs: self.settings.empty_timeout_secs,
            departure_timeout_secs: self.settings.departure_timeout_secs,
            metadata: serde_json::json!({
                "room_id": room_id,
                "host_id": host.user_id,
                "room_type": validated.room_type.as_str(),
            })
            .to_string(),
            egress,
        };

        let external = self
            .media_call("create_room", self.media.create_room(&params))
            .await?;

        let room = Room {
            id: room_id,
            name: validated.name,
            description: validated.description,
            host_id: host.user_id,
            room_type: validated.room_type,
            status: RoomStatus::Scheduled,
            max_participants: validated.max_participants,
            current_participants: 0,
            scheduled_start_time: validated.scheduled_start_time,
            scheduled_end_time: validated.scheduled_end_time,
            external_room_ref: external.external_ref.clone(),
            external_room_sid: Some(external.sid).filter(|sid| !sid.is_empty()),
            tags: validated.tags,
            waiting_room_enabled: validated.waiting_room_enabled,
            recording_enabled: validated.recording_enabled,
            created_at: now,
            updated_at: now,
            started_at: None,
            ended_at: None,
        };

        let mut host_invite = Participant::new_for_user(
            room.id,
            host.user_id,
            ParticipantRole::Host,
            ParticipantStatus::Invited,
            now,
        );
        host_invite.display_name = host.display_name.clone();
        host_invite.invited_by = Some(host.user_id);
        host_invite.invited_at = Some(now);

        if let Err(e) = self.store.create_room(&room, &host_invite).await {
            warn!(
                target: "room.coordinator",
                room_id = %room.id,
                error = %e,
                "Persisting room failed, deleting external room"
            );
            self.media_best_effort(
                "delete_room",
                self.media.delete_room(&external.external_ref),
            )
            .await;
            return Err(e);
        }

        metrics::record_room_transition("none", RoomStatus::Scheduled.as_str(), "client");
        info!(
            target: "room.coordinator",
            room_id = %room.id,
            room_type = room.room_type.as_str(),
            "Room created"
        );
        Ok(room)
    }

    pub async fn get_room(&self, room_id: RoomId) -> Result<Room, RoomError> {
        self.store
            .get_room(room_id)
            .await?
            .ok_or(RoomError::RoomNotFound)
    }

    pub async fn list_rooms(&self, filter: RoomFilter) -> Result<RoomPage, RoomError> {
        if filter.page == 0 {
            return Err(RoomError::BadRequest("page must be at least 1".to_string()));
        }
        if filter.page_size == 0 || filter.page_size > MAX_PAGE_SIZE {
            return Err(RoomError::BadRequest(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        self.store.list_rooms(&filter).await
    }

    /// Move a scheduled room to active. Idempotent on an active room.
    pub async fn start_room(&self, room_id: RoomId, user_id: UserId) -> Result<Room, RoomError> {
        self.start_room_by(room_id, user_id, Trigger::Client).await
    }

    #[instrument(
        skip_all,
        name = "room.coordinator.start_room",
        fields(room_id = %room_id, trigger = trigger.as_str())
    )]
    pub async fn start_room_by(
        &self,
        room_id: RoomId,
        user_id: UserId,
        trigger: Trigger,
    ) -> Result<Room, RoomError> {
        let room = self.get_room(room_id).await?;
        if !room.is_host(user_id) {
            return Err(RoomError::NotHost);
        }
        match room.status {
            RoomStatus::Active => return Ok(room),
            RoomStatus::Ended | RoomStatus::Cancelled => return Err(RoomError::RoomEnded),
            RoomStatus::Scheduled => {}
        }

        let now = self.clock.now();
        if let Some(started) = self
            .store
            .transition_room(room_id, RoomStatus::Scheduled, RoomStatus::Active, now)
            .await?
        {
            metrics::record_room_transition("scheduled", "active", trigger.as_str());
            info!(target: "room.coordinator", room_id = %room_id, "Room started");
            return Ok(started);
        }

        // Lost the race; report whatever won.
        let room = self.get_room(room_id).await?;
        match room.status {
            RoomStatus::Active => Ok(room),
            RoomStatus::Ended | RoomStatus::Cancelled => Err(RoomError::RoomEnded),
            RoomStatus::Scheduled => Err(self.exhausted("start_room")),
        }
    }

    /// End a room on behalf of its host.
    ///
    /// Joined participants are evicted from the transport and the external
    /// room is deleted, best-effort. The database change always happens.
    pub async fn end_room(&self, room_id: RoomId, user_id: UserId) -> Result<Room, RoomError> {
        self.end_room_by(room_id, user_id, Trigger::Client).await
    }

    #[instrument(
        skip_all,
        name = "room.coordinator.end_room",
        fields(room_id = %room_id, trigger = trigger.as_str())
    )]
    pub async fn end_room_by(
        &self,
        room_id: RoomId,
        user_id: UserId,
        trigger: Trigger,
    ) -> Result<Room, RoomError> {
        let room = self.get_room(room_id).await?;
        if !room.is_host(user_id) {
            return Err(RoomError::NotHost);
        }
        if room.status.is_terminal() {
            return Err(RoomError::RoomEnded);
        }

        let joined = self
            .store
            .list_participants(room_id, Some(ParticipantStatus::Joined))
            .await?;
        for participant in joined {
            if let Some(user) = participant.user_id {
                self.media_best_effort(
                    "remove_participant",
                    self.media
                        .remove_participant(&room.external_room_ref, &user.identity()),
                )
                .await;
            }
        }
        self.media_best_effort(
            "delete_room",
            self.media.delete_room(&room.external_room_ref),
        )
        .await;

        let ended = self
            .store
            .end_room(room_id, self.clock.now())
            .await?
            .ok_or(RoomError::RoomEnded)?;

        metrics::record_room_transition(room.status.as_str(), "ended", trigger.as_str());
        info!(target: "room.coordinator", room_id = %room_id, "Room ended");
        Ok(ended)
    }

    /// Cancel a room that has not started.
    #[instrument(skip_all, name = "room.coordinator.cancel_room", fields(room_id = %room_id))]
    pub async fn cancel_room(&self, room_id: RoomId, user_id: UserId) -> Result<Room, RoomError> {
        let room = self.get_room(room_id).await?;
        if !room.is_host(user_id) {
            return Err(RoomError::NotHost);
        }
        if room.status != RoomStatus::Scheduled {
            return Err(RoomError::InvalidRoomStatus(room.status.to_string()));
        }

        let cancelled = self
            .store
            .transition_room(
                room_id,
                RoomStatus::Scheduled,
                RoomStatus::Cancelled,
                self.clock.now(),
            )
            .await?;
        let Some(cancelled) = cancelled else {
            let current = self.get_room(room_id).await?;
            return Err(RoomError::InvalidRoomStatus(current.status.to_string()));
        };

        self.media_best_effort(
            "delete_room",
            self.media.delete_room(&room.external_room_ref),
        )
        .await;

        metrics::record_room_transition("scheduled", "cancelled", Trigger::Client.as_str());
        info!(target: "room.coordinator", room_id = %room_id, "Room cancelled");
        Ok(cancelled)
    }

    // ------------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------------

    /// Join a room.
    ///
    /// The host always lands in joined. Others land in joined or waiting as
    /// the access policy decides. An access grant is included once joined.
    #[instrument(
        skip_all,
        name = "room.coordinator.join_room",
        fields(room_id = %room_id, user_id = %caller.user_id)
    )]
    pub async fn join_room(
        &self,
        room_id: RoomId,
        caller: &Caller,
    ) -> Result<JoinRoomResponse, RoomError> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let now = self.clock.now();
            let room = self.get_room(room_id).await?;
            if room.status.is_terminal() {
                return Err(RoomError::RoomEnded);
            }

            let existing = self.find_candidate_record(room_id, caller).await?;
            let decision = self
                .policy
                .evaluate(&room, caller.user_id, existing.as_ref(), now)?;

            if let Some(record) = &existing {
                if record.is_blocked() {
                    return Err(RoomError::AccessDenied);
                }
                if record.is_joined() {
                    return Err(RoomError::AlreadyInRoom);
                }
            }

            let is_host = room.is_host(caller.user_id);
            let target = if is_host || decision == AccessDecision::Allow {
                ParticipantStatus::Joined
            } else {
                ParticipantStatus::Waiting
            };

            if target == ParticipantStatus::Waiting {
                if let Some(record) = existing
                    .as_ref()
                    .filter(|r| r.status == ParticipantStatus::Waiting)
                {
                    return Ok(JoinRoomResponse {
                        room,
                        participant: record.clone(),
                        access: None,
                    });
                }
            } else if !room.has_capacity() {
                return Err(RoomError::RoomFull);
            }

            let (participant, expected) = match existing {
                Some(record) => {
                    let expected = record.status;
                    (
                        advance_record(record, caller, is_host, target, now),
                        Some(expected),
                    )
                }
                None => (new_record(room_id, caller, is_host, target, now), None),
            };

            let plan = JoinPlan {
                participant,
                expected,
                supersedes: None,
                at: now,
            };
            match self.store.commit_join(&plan).await? {
                JoinCommit::Applied(committed) => {
                    self.note_join(&room, &committed, &plan.participant, Trigger::Client);
                    let access = if plan.participant.is_joined() {
                        Some(self.grant_for(&committed, &plan.participant)?)
                    } else {
                        None
                    };
                    return Ok(JoinRoomResponse {
                        room: committed,
                        participant: plan.participant,
                        access,
                    });
                }
                JoinCommit::RoomFull => return Err(RoomError::RoomFull),
                JoinCommit::RoomEnded => return Err(RoomError::RoomEnded),
                JoinCommit::Stale => self.note_retry("join_room", attempt),
            }
        }

        Err(self.exhausted("join_room"))
    }

    /// Mint media credentials for a joined participant.
    #[instrument(skip_all, name = "room.coordinator.issue_access_token", fields(room_id = %room_id))]
    pub async fn issue_access_token(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<AccessGrant, RoomError> {
        let room = self.get_room(room_id).await?;
        if room.status.is_terminal() {
            return Err(RoomError::RoomEnded);
        }
        let participant = self
            .store
            .find_participant(room_id, user_id)
            .await?
            .ok_or(RoomError::ParticipantNotFound)?;
        if !participant.is_joined() {
            return Err(RoomError::InvalidParticipantStatus(
                participant.status.to_string(),
            ));
        }
        self.grant_for(&room, &participant)
    }

    /// Leave a room.
    ///
    /// The last joined participant leaving ends an active room. A joined host
    /// leaving hands the role to the longest-present remaining participant.
    #[instrument(
        skip_all,
        name = "room.coordinator.leave_room",
        fields(room_id = %room_id, user_id = %user_id)
    )]
    pub async fn leave_room(&self, room_id: RoomId, user_id: UserId) -> Result<(), RoomError> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let room = self.get_room(room_id).await?;
            let participant = self
                .store
                .find_participant(room_id, user_id)
                .await?
                .ok_or(RoomError::ParticipantNotFound)?;

            match participant.status {
                ParticipantStatus::Joined | ParticipantStatus::Waiting => {}
                ParticipantStatus::Left => return Err(RoomError::AlreadyLeft),
                other => return Err(RoomError::InvalidParticipantStatus(other.to_string())),
            }

            let plan = DeparturePlan::leave(&participant, self.clock.now());
            match self.store.commit_departure(&plan).await? {
                DepartureCommit::Applied {
                    remaining,
                    ended,
                    new_host,
                    ..
                } => {
                    metrics::record_participant_transition("left");
                    debug!(
                        target: "room.coordinator",
                        room_id = %room_id,
                        remaining,
                        "Participant left"
                    );
                    if let Some(new_host) = new_host {
                        info!(
                            target: "room.coordinator",
                            room_id = %room_id,
                            new_host = %new_host,
                            "Host left, role passed to successor"
                        );
                    }
                    if ended {
                        self.after_auto_end(&room).await;
                    }
                    return Ok(());
                }
                DepartureCommit::Stale => self.note_retry("leave_room", attempt),
            }
        }

        Err(self.exhausted("leave_room"))
    }

    /// Apply a `participant_joined` notification from the media server.
    ///
    /// `event_at` is when the media server saw the join, in whole seconds. A
    /// join from a second before the record's last departure is ignored; one
    /// from the same second counts as a reconnect.
    #[instrument(
        skip_all,
        name = "room.coordinator.update_participant_status",
        fields(room_id = %room_id, user_id = %user_id)
    )]
    pub async fn update_participant_status(
        &self,
        room_id: RoomId,
        user_id: UserId,
        event_at: Option<DateTime<Utc>>,
    ) -> Result<PresenceUpdate, RoomError> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let room = self.get_room(room_id).await?;
            if room.status.is_terminal() {
                return Err(RoomError::RoomEnded);
            }
            let record = self
                .store
                .find_participant(room_id, user_id)
                .await?
                .ok_or(RoomError::ParticipantNotFound)?;

            match record.status {
                ParticipantStatus::Joined => return Ok(PresenceUpdate::Unchanged),
                ParticipantStatus::Left => {
                    let stale = matches!(
                        (event_at, record.left_at),
                        (Some(seen), Some(left)) if seen < left.trunc_subsecs(0)
                    );
                    if stale {
                        return Ok(PresenceUpdate::StaleEvent);
                    }
                }
                ParticipantStatus::Invited => {}
                refused @ (ParticipantStatus::Waiting
                | ParticipantStatus::Declined
                | ParticipantStatus::Denied
                | ParticipantStatus::Removed) => return Ok(PresenceUpdate::Refused(refused)),
            }
            if record.is_blocked() {
                return Ok(PresenceUpdate::Refused(record.status));
            }
            if !room.has_capacity() {
                return Err(RoomError::RoomFull);
            }

            let now = self.clock.now();
            let expected = record.status;
            let caller = Caller::new(user_id);
            let participant = advance_record(
                record,
                &caller,
                room.is_host(user_id),
                ParticipantStatus::Joined,
                now,
            );
            let plan = JoinPlan {
                participant,
                expected: Some(expected),
                supersedes: None,
                at: now,
            };
            match self.store.commit_join(&plan).await? {
                JoinCommit::Applied(committed) => {
                    self.note_join(&room, &committed, &plan.participant, Trigger::Webhook);
                    return Ok(PresenceUpdate::Joined(committed));
                }
                JoinCommit::RoomFull => return Err(RoomError::RoomFull),
                JoinCommit::RoomEnded => return Err(RoomError::RoomEnded),
                JoinCommit::Stale => self.note_retry("update_participant_status", attempt),
            }
        }

        Err(self.exhausted("update_participant_status"))
    }

    // ------------------------------------------------------------------------
    // Moderation
    // ------------------------------------------------------------------------

    /// Admit a waiting participant and mint their credentials.
    #[instrument(
        skip_all,
        name = "room.coordinator.admit_participant",
        fields(room_id = %room_id, participant_id = %participant_id)
    )]
    pub async fn admit_participant(
        &self,
        room_id: RoomId,
        host_id: UserId,
        participant_id: ParticipantId,
    ) -> Result<AccessGrant, RoomError> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let (room, target) = self.moderation_target(room_id, host_id, participant_id).await?;
            if target.status != ParticipantStatus::Waiting {
                return Err(RoomError::InvalidParticipantStatus(target.status.to_string()));
            }
            if !room.has_capacity() {
                return Err(RoomError::RoomFull);
            }

            let now = self.clock.now();
            let mut admitted = target;
            admitted.mark_joined(now);
            let plan = JoinPlan {
                participant: admitted,
                expected: Some(ParticipantStatus::Waiting),
                supersedes: None,
                at: now,
            };
            match self.store.commit_join(&plan).await? {
                JoinCommit::Applied(committed) => {
                    self.note_join(&room, &committed, &plan.participant, Trigger::Client);
                    info!(target: "room.coordinator", room_id = %room_id, "Participant admitted");
                    return self.grant_for(&committed, &plan.participant);
                }
                JoinCommit::RoomFull => return Err(RoomError::RoomFull),
                JoinCommit::RoomEnded => return Err(RoomError::RoomEnded),
                JoinCommit::Stale => self.note_retry("admit_participant", attempt),
            }
        }

        Err(self.exhausted("admit_participant"))
    }

    /// Turn a waiting participant away. The record is deleted so the user
    /// may ask again later.
    #[instrument(
        skip_all,
        name = "room.coordinator.deny_participant",
        fields(room_id = %room_id, participant_id = %participant_id)
    )]
    pub async fn deny_participant(
        &self,
        room_id: RoomId,
        host_id: UserId,
        participant_id: ParticipantId,
        reason: Option<String>,
    ) -> Result<(), RoomError> {
        let reason = validate_reason(reason)?;
        let (_, target) = self.moderation_target(room_id, host_id, participant_id).await?;
        if target.status != ParticipantStatus::Waiting {
            return Err(RoomError::InvalidParticipantStatus(target.status.to_string()));
        }

        match self
            .store
            .delete_participant(participant_id, ParticipantStatus::Waiting)
            .await?
        {
            WriteOutcome::Applied => {
                metrics::record_participant_transition("deleted");
                info!(
                    target: "room.coordinator",
                    room_id = %room_id,
                    reason = reason.as_deref().unwrap_or(""),
                    "Waiting participant denied"
                );
                Ok(())
            }
            // Admitted, left or denied by someone else in the meantime.
            WriteOutcome::Stale => {
                let current = self
                    .store
                    .get_participant(participant_id)
                    .await?
                    .ok_or(RoomError::ParticipantNotFound)?;
                Err(RoomError::InvalidParticipantStatus(current.status.to_string()))
            }
        }
    }

    /// Permanently keep a user out until they are re-invited.
    #[instrument(
        skip_all,
        name = "room.coordinator.block_participant",
        fields(room_id = %room_id, participant_id = %participant_id)
    )]
    pub async fn block_participant(
        &self,
        room_id: RoomId,
        host_id: UserId,
        participant_id: ParticipantId,
        reason: Option<String>,
    ) -> Result<(), RoomError> {
        let reason = validate_reason(reason)?;
        self.eject(
            "block_participant",
            room_id,
            host_id,
            participant_id,
            ParticipantStatus::Denied,
            reason,
        )
        .await
    }

    /// Kick a participant out of the room.
    #[instrument(
        skip_all,
        name = "room.coordinator.remove_participant",
        fields(room_id = %room_id, participant_id = %participant_id)
    )]
    pub async fn remove_participant(
        &self,
        room_id: RoomId,
        host_id: UserId,
        participant_id: ParticipantId,
        reason: Option<String>,
    ) -> Result<(), RoomError> {
        let reason = validate_reason(reason)?;
        self.eject(
            "remove_participant",
            room_id,
            host_id,
            participant_id,
            ParticipantStatus::Removed,
            reason,
        )
        .await
    }

    /// Shared path of block (→ denied) and remove (→ removed).
    async fn eject(
        &self,
        operation: &'static str,
        room_id: RoomId,
        host_id: UserId,
        participant_id: ParticipantId,
        status: ParticipantStatus,
        reason: Option<String>,
    ) -> Result<(), RoomError> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let (room, target) = self.moderation_target(room_id, host_id, participant_id).await?;
            if target.is_host() || target.user_id == Some(host_id) {
                return Err(RoomError::CannotRemoveSelf);
            }
            if target.status == status {
                return Ok(());
            }
            let allowed = match status {
                // Blocking needs a bound account to block.
                ParticipantStatus::Denied => target.user_id.is_some(),
                _ => matches!(
                    target.status,
                    ParticipantStatus::Joined | ParticipantStatus::Waiting
                ),
            };
            if !allowed {
                return Err(RoomError::InvalidParticipantStatus(target.status.to_string()));
            }

            let plan = DeparturePlan {
                participant_id,
                expected: target.status,
                status,
                removed_by: Some(host_id),
                reason: reason.clone(),
                end_if_empty: true,
                promote_successor: false,
                at: self.clock.now(),
            };
            match self.store.commit_departure(&plan).await? {
                DepartureCommit::Applied { ended, .. } => {
                    metrics::record_participant_transition(status.as_str());
                    info!(
                        target: "room.coordinator",
                        room_id = %room_id,
                        status = %status,
                        "Participant ejected"
                    );
                    if target.is_joined() {
                        if let Some(user) = target.user_id {
                            self.media_best_effort(
                                "remove_participant",
                                self.media
                                    .remove_participant(&room.external_room_ref, &user.identity()),
                            )
                            .await;
                        }
                    }
                    if ended {
                        self.after_auto_end(&room).await;
                    }
                    return Ok(());
                }
                DepartureCommit::Stale => self.note_retry(operation, attempt),
            }
        }

        Err(self.exhausted(operation))
    }

    /// Move the host role to another joined participant.
    #[instrument(
        skip_all,
        name = "room.coordinator.transfer_host",
        fields(room_id = %room_id, new_host_id = %new_host_id)
    )]
    pub async fn transfer_host(
        &self,
        room_id: RoomId,
        current_host_id: UserId,
        new_host_id: UserId,
    ) -> Result<(), RoomError> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let room = self.get_room(room_id).await?;
            if !room.is_host(current_host_id) {
                return Err(RoomError::NotHost);
            }
            if current_host_id == new_host_id {
                return Err(RoomError::CannotTransferToSelf);
            }
            if room.status.is_terminal() {
                return Err(RoomError::RoomEnded);
            }

            let target = self
                .store
                .find_participant(room_id, new_host_id)
                .await?
                .ok_or(RoomError::ParticipantNotFound)?;
            if !target.is_joined() {
                return Err(RoomError::InvalidParticipantStatus(target.status.to_string()));
            }
            let current = self.store.find_participant(room_id, current_host_id).await?;

            let swap = HostSwap {
                room_id,
                expected_host: current_host_id,
                demote: current.map(|p| p.id),
                promote: target.id,
                new_host: new_host_id,
                at: self.clock.now(),
            };
            match self.store.swap_host(&swap).await? {
                WriteOutcome::Applied => {
                    info!(target: "room.coordinator", room_id = %room_id, "Host transferred");
                    return Ok(());
                }
                WriteOutcome::Stale => self.note_retry("transfer_host", attempt),
            }
        }

        Err(self.exhausted("transfer_host"))
    }

    // ------------------------------------------------------------------------
    // Invitations
    // ------------------------------------------------------------------------

    /// Invite an email address. Re-sending a pending invitation returns it
    /// unchanged; a declined, left, denied or removed one is reset.
    #[instrument(skip_all, name = "room.coordinator.invite_by_email", fields(room_id = %room_id))]
    pub async fn invite_by_email(
        &self,
        room_id: RoomId,
        inviter_id: UserId,
        email: &str,
    ) -> Result<Participant, RoomError> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(RoomError::BadRequest("Invalid email address".to_string()));
        }

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let room = self.get_room(room_id).await?;
            if !room.is_host(inviter_id) {
                return Err(RoomError::NotHost);
            }
            if room.status.is_terminal() {
                return Err(RoomError::RoomEnded);
            }

            let now = self.clock.now();
            let outcome = match self.store.find_invitation_by_email(room_id, &email).await? {
                Some(existing) => match existing.status {
                    ParticipantStatus::Joined | ParticipantStatus::Waiting => {
                        return Err(RoomError::AlreadyInvited)
                    }
                    ParticipantStatus::Invited => return Ok(existing),
                    previous => {
                        let mut renewed = existing;
                        renewed.reset_invitation(inviter_id, now);
                        let outcome = self.store.update_participant(&renewed, previous).await?;
                        (outcome, renewed)
                    }
                },
                None => {
                    let invitation =
                        Participant::new_email_invitation(room_id, email.clone(), inviter_id, now);
                    let outcome = self.store.insert_participant(&invitation).await?;
                    (outcome, invitation)
                }
            };

            match outcome {
                (WriteOutcome::Applied, invitation) => {
                    metrics::record_participant_transition("invited");
                    info!(target: "room.coordinator", room_id = %room_id, "Invitation sent");
                    return Ok(invitation);
                }
                (WriteOutcome::Stale, _) => self.note_retry("invite_by_email", attempt),
            }
        }

        Err(self.exhausted("invite_by_email"))
    }

    /// Accept the caller's email invitation.
    ///
    /// In an active room the invitee joins at once and gets credentials. In a
    /// scheduled room the invitation is bound to the caller and stays invited
    /// until they join.
    #[instrument(
        skip_all,
        name = "room.coordinator.accept_invitation",
        fields(room_id = %room_id, user_id = %caller.user_id)
    )]
    pub async fn accept_invitation(
        &self,
        room_id: RoomId,
        caller: &Caller,
    ) -> Result<JoinRoomResponse, RoomError> {
        let email = caller_email(caller)?;

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let room = self.get_room(room_id).await?;
            if room.status.is_terminal() {
                return Err(RoomError::RoomEnded);
            }
            let invitation = self.invitation_for(room_id, caller, &email).await?;
            match invitation.status {
                ParticipantStatus::Invited => {}
                ParticipantStatus::Joined => return Err(RoomError::AlreadyInRoom),
                other => return Err(RoomError::InvalidParticipantStatus(other.to_string())),
            }
            let supersedes = self.superseded_record(room_id, caller, &invitation).await?;

            let now = self.clock.now();
            let join_now = room.status == RoomStatus::Active;
            if join_now && !room.has_capacity() {
                return Err(RoomError::RoomFull);
            }
            let mut accepted = invitation;
            accepted.user_id = Some(caller.user_id);
            if accepted.display_name.is_none() {
                accepted.display_name = caller.display_name.clone();
            }
            accepted.updated_at = now;
            if join_now {
                accepted.mark_joined(now);
            }

            let plan = JoinPlan {
                participant: accepted,
                expected: Some(ParticipantStatus::Invited),
                supersedes,
                at: now,
            };
            match self.store.commit_join(&plan).await? {
                JoinCommit::Applied(committed) => {
                    let access = if plan.participant.is_joined() {
                        self.note_join(&room, &committed, &plan.participant, Trigger::Client);
                        Some(self.grant_for(&committed, &plan.participant)?)
                    } else {
                        None
                    };
                    info!(
                        target: "room.coordinator",
                        room_id = %room_id,
                        joined = access.is_some(),
                        "Invitation accepted"
                    );
                    return Ok(JoinRoomResponse {
                        room: committed,
                        participant: plan.participant,
                        access,
                    });
                }
                JoinCommit::RoomFull => return Err(RoomError::RoomFull),
                JoinCommit::RoomEnded => return Err(RoomError::RoomEnded),
                JoinCommit::Stale => self.note_retry("accept_invitation", attempt),
            }
        }

        Err(self.exhausted("accept_invitation"))
    }

    /// Decline the caller's email invitation.
    #[instrument(
        skip_all,
        name = "room.coordinator.decline_invitation",
        fields(room_id = %room_id, user_id = %caller.user_id)
    )]
    pub async fn decline_invitation(
        &self,
        room_id: RoomId,
        caller: &Caller,
    ) -> Result<Participant, RoomError> {
        let email = caller_email(caller)?;

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let room = self.get_room(room_id).await?;
            if room.status.is_terminal() {
                return Err(RoomError::RoomEnded);
            }
            let invitation = self.invitation_for(room_id, caller, &email).await?;
            match invitation.status {
                ParticipantStatus::Invited => {}
                ParticipantStatus::Declined => return Ok(invitation),
                other => return Err(RoomError::InvalidParticipantStatus(other.to_string())),
            }
            let supersedes = self.superseded_record(room_id, caller, &invitation).await?;

            let now = self.clock.now();
            let mut declined = invitation;
            declined.user_id = Some(caller.user_id);
            declined.status = ParticipantStatus::Declined;
            declined.updated_at = now;

            let plan = JoinPlan {
                participant: declined,
                expected: Some(ParticipantStatus::Invited),
                supersedes,
                at: now,
            };
            match self.store.commit_join(&plan).await? {
                JoinCommit::Applied(_) => {
                    metrics::record_participant_transition("declined");
                    info!(target: "room.coordinator", room_id = %room_id, "Invitation declined");
                    return Ok(plan.participant);
                }
                JoinCommit::RoomEnded => return Err(RoomError::RoomEnded),
                JoinCommit::RoomFull => return Err(RoomError::RoomFull),
                JoinCommit::Stale => self.note_retry("decline_invitation", attempt),
            }
        }

        Err(self.exhausted("decline_invitation"))
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub async fn list_participants(
        &self,
        room_id: RoomId,
        status: Option<ParticipantStatus>,
    ) -> Result<Vec<Participant>, RoomError> {
        self.get_room(room_id).await?;
        self.store.list_participants(room_id, status).await
    }

    /// Waiting-room queue. Host only.
    pub async fn list_waiting_participants(
        &self,
        room_id: RoomId,
        host_id: UserId,
    ) -> Result<Vec<Participant>, RoomError> {
        self.require_host(room_id, host_id).await?;
        self.store
            .list_participants(room_id, Some(ParticipantStatus::Waiting))
            .await
    }

    /// Every email invitation of a room, whatever its status. Host only.
    pub async fn list_room_invitations(
        &self,
        room_id: RoomId,
        host_id: UserId,
    ) -> Result<Vec<Participant>, RoomError> {
        self.require_host(room_id, host_id).await?;
        let participants = self.store.list_participants(room_id, None).await?;
        Ok(participants
            .into_iter()
            .filter(|p| p.invited_email.is_some())
            .collect())
    }

    /// Pending invitations addressed to the caller's email.
    pub async fn list_my_invitations(&self, caller: &Caller) -> Result<Vec<Participant>, RoomError> {
        let email = caller_email(caller)?;
        self.store.list_invitations_for_email(&email).await
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Access grant for a joined participant.
    pub fn grant_for(&self, room: &Room, participant: &Participant) -> Result<AccessGrant, RoomError> {
        let user_id = participant.user_id.ok_or(RoomError::Internal)?;
        let identity = user_id.identity();
        let grants = if room.is_host(user_id) {
            MediaGrants::host()
        } else {
            MediaGrants::participant()
        };

        let token = self.media.generate_access_token(&AccessTokenRequest {
            identity: identity.clone(),
            external_ref: room.external_room_ref.clone(),
            display_name: participant.display_name.clone(),
            grants,
            valid_for: self.settings.access_token_ttl,
        })?;

        Ok(AccessGrant {
            token,
            server_url: self.media.server_url().to_string(),
            identity,
            expires_in: self.settings.access_token_ttl.as_secs(),
        })
    }

    /// Evict an identity from the transport, best-effort.
    pub async fn evict_from_transport(&self, room: &Room, identity: &str) {
        self.media_best_effort(
            "remove_participant",
            self.media.remove_participant(&room.external_room_ref, identity),
        )
        .await;
    }

    async fn require_host(&self, room_id: RoomId, user_id: UserId) -> Result<Room, RoomError> {
        let room = self.get_room(room_id).await?;
        if !room.is_host(user_id) {
            return Err(RoomError::NotHost);
        }
        Ok(room)
    }

    /// Room and target record for a host moderation action.
    async fn moderation_target(
        &self,
        room_id: RoomId,
        host_id: UserId,
        participant_id: ParticipantId,
    ) -> Result<(Room, Participant), RoomError> {
        let room = self.require_host(room_id, host_id).await?;
        if room.status.is_terminal() {
            return Err(RoomError::RoomEnded);
        }
        let target = self
            .store
            .get_participant(participant_id)
            .await?
            .filter(|p| p.room_id == room_id)
            .ok_or(RoomError::ParticipantNotFound)?;
        Ok((room, target))
    }

    /// The caller's record in a room: bound to their account, or else an
    /// unbound email invitation for their address.
    async fn find_candidate_record(
        &self,
        room_id: RoomId,
        caller: &Caller,
    ) -> Result<Option<Participant>, RoomError> {
        if let Some(record) = self.store.find_participant(room_id, caller.user_id).await? {
            return Ok(Some(record));
        }
        let Some(email) = caller.email.as_deref().map(normalize_email) else {
            return Ok(None);
        };
        Ok(self
            .store
            .find_invitation_by_email(room_id, &email)
            .await?
            .filter(|p| p.user_id.is_none()))
    }

    /// The invitation for `email`, unless it is bound to another account.
    async fn invitation_for(
        &self,
        room_id: RoomId,
        caller: &Caller,
        email: &str,
    ) -> Result<Participant, RoomError> {
        self.store
            .find_invitation_by_email(room_id, email)
            .await?
            .filter(|p| p.user_id.map_or(true, |u| u == caller.user_id))
            .ok_or(RoomError::InvitationNotFound)
    }

    /// Another record of the caller in the room that binding the invitation
    /// would collide with.
    ///
    /// A block only yields to an invitation issued after it.
    async fn superseded_record(
        &self,
        room_id: RoomId,
        caller: &Caller,
        invitation: &Participant,
    ) -> Result<Option<ParticipantId>, RoomError> {
        match self.store.find_participant(room_id, caller.user_id).await? {
            Some(other) if other.id != invitation.id => {
                if other.is_joined() {
                    Err(RoomError::AlreadyInRoom)
                } else if other.is_blocked() && !invited_after_block(invitation, &other) {
                    debug!(
                        target: "room.coordinator",
                        room_id = %room_id,
                        "Invitation predates the caller's block"
                    );
                    Err(RoomError::AccessDenied)
                } else {
                    Ok(Some(other.id))
                }
            }
            _ => Ok(None),
        }
    }

    fn note_join(&self, before: &Room, after: &Room, participant: &Participant, trigger: Trigger) {
        metrics::record_participant_transition(participant.status.as_str());
        if before.status != after.status {
            metrics::record_room_transition(
                before.status.as_str(),
                after.status.as_str(),
                trigger.as_str(),
            );
            info!(target: "room.coordinator", room_id = %after.id, "Room active");
        }
        debug!(
            target: "room.coordinator",
            room_id = %after.id,
            participant_id = %participant.id,
            status = %participant.status,
            current_participants = after.current_participants,
            "Join committed"
        );
    }

    /// Clean up the transport after the last participant left.
    async fn after_auto_end(&self, room: &Room) {
        metrics::record_room_transition(room.status.as_str(), "ended", Trigger::Auto.as_str());
        info!(target: "room.coordinator", room_id = %room.id, "Last participant left, room ended");
        self.media_best_effort(
            "delete_room",
            self.media.delete_room(&room.external_room_ref),
        )
        .await;
    }

    fn note_retry(&self, operation: &'static str, attempt: usize) {
        metrics::record_commit_retry(operation);
        debug!(target: "room.coordinator", operation, attempt, "Commit lost a race, retrying");
    }

    fn exhausted(&self, operation: &'static str) -> RoomError {
        warn!(
            target: "room.coordinator",
            operation,
            attempts = MAX_COMMIT_ATTEMPTS,
            "Giving up after repeated concurrent updates"
        );
        RoomError::Conflict("Concurrent update, please retry".to_string())
    }

    /// Run a media server call under the configured deadline.
    async fn media_call<T, F>(&self, operation: &'static str, call: F) -> Result<T, RoomError>
    where
        F: Future<Output = Result<T, RoomError>>,
    {
        match tokio::time::timeout(self.settings.media_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                metrics::record_media_request(operation, "timeout", self.settings.media_timeout);
                warn!(target: "room.media", operation, "Media server call timed out");
                Err(RoomError::MediaUnavailable(format!("{operation} timed out")))
            }
        }
    }

    async fn media_best_effort<F>(&self, operation: &'static str, call: F)
    where
        F: Future<Output = Result<(), RoomError>>,
    {
        if let Err(e) = self.media_call(operation, call).await {
            warn!(
                target: "room.media",
                operation,
                error = %e,
                "Media server cleanup failed, continuing"
            );
        }
    }
}

/// Validated and normalized create-room input.
struct ValidatedRoom {
    name: String,
    description: Option<String>,
    room_type: RoomType,
    max_participants: i32,
    scheduled_start_time: Option<DateTime<Utc>>,
    scheduled_end_time: Option<DateTime<Utc>>,
    tags: Vec<String>,
    waiting_room_enabled: bool,
    recording_enabled: bool,
}

fn validate_create_request(request: CreateRoomRequest) -> Result<ValidatedRoom, RoomError> {
    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(RoomError::BadRequest("Room name is required".to_string()));
    }
    if name.chars().count() > MAX_ROOM_NAME_LENGTH {
        return Err(RoomError::BadRequest(format!(
            "Room name must be at most {MAX_ROOM_NAME_LENGTH} characters"
        )));
    }

    let description = request
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    if description
        .as_ref()
        .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LENGTH)
    {
        return Err(RoomError::BadRequest(format!(
            "Description must be at most {MAX_DESCRIPTION_LENGTH} characters"
        )));
    }

    let max_participants = request.max_participants.unwrap_or(DEFAULT_MAX_PARTICIPANTS);
    if !(MIN_PARTICIPANTS..=MAX_PARTICIPANTS).contains(&max_participants) {
        return Err(RoomError::BadRequest(format!(
            "max_participants must be between {MIN_PARTICIPANTS} and {MAX_PARTICIPANTS}"
        )));
    }

    if request.room_type == RoomType::Scheduled && request.scheduled_start_time.is_none() {
        return Err(RoomError::BadRequest(
            "Scheduled rooms require scheduled_start_time".to_string(),
        ));
    }
    if let (Some(start), Some(end)) = (request.scheduled_start_time, request.scheduled_end_time) {
        if end <= start {
            return Err(RoomError::BadRequest(
                "scheduled_end_time must be after scheduled_start_time".to_string(),
            ));
        }
    }

    let mut tags: Vec<String> = Vec::with_capacity(request.tags.len());
    for tag in request.tags {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() || tag.chars().count() > MAX_TAG_LENGTH {
            return Err(RoomError::BadRequest(format!(
                "Tags must be 1 to {MAX_TAG_LENGTH} characters"
            )));
        }
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    if tags.len() > MAX_ROOM_TAGS {
        return Err(RoomError::BadRequest(format!(
            "At most {MAX_ROOM_TAGS} tags are allowed"
        )));
    }

    Ok(ValidatedRoom {
        name,
        description,
        room_type: request.room_type,
        max_participants,
        scheduled_start_time: request.scheduled_start_time,
        scheduled_end_time: request.scheduled_end_time,
        tags,
        waiting_room_enabled: request.waiting_room_enabled,
        recording_enabled: request.recording_enabled,
    })
}

fn validate_reason(reason: Option<String>) -> Result<Option<String>, RoomError> {
    let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
    if reason
        .as_ref()
        .is_some_and(|r| r.chars().count() > MAX_REASON_LENGTH)
    {
        return Err(RoomError::BadRequest(format!(
            "Reason must be at most {MAX_REASON_LENGTH} characters"
        )));
    }
    Ok(reason)
}

fn caller_email(caller: &Caller) -> Result<String, RoomError> {
    caller
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| RoomError::BadRequest("An email address is required".to_string()))
}

/// Move an existing record towards `target`, binding it to the caller.
fn advance_record(
    mut record: Participant,
    caller: &Caller,
    is_host: bool,
    target: ParticipantStatus,
    now: DateTime<Utc>,
) -> Participant {
    record.user_id = Some(caller.user_id);
    if caller.display_name.is_some() {
        record.display_name = caller.display_name.clone();
    }
    if is_host {
        record.grant_host(now);
    } else if record.is_host() {
        record.revoke_host(now);
    }
    if target == ParticipantStatus::Joined {
        record.mark_joined(now);
    } else {
        record.status = target;
        record.updated_at = now;
    }
    record
}

fn new_record(
    room_id: RoomId,
    caller: &Caller,
    is_host: bool,
    target: ParticipantStatus,
    now: DateTime<Utc>,
) -> Participant {
    let role = if is_host {
        ParticipantRole::Host
    } else {
        ParticipantRole::Participant
    };
    let mut record = Participant::new_for_user(room_id, caller.user_id, role, target, now);
    record.display_name = caller.display_name.clone();
    if target == ParticipantStatus::Joined {
        record.mark_joined(now);
    }
    record
}

/// Whether `invitation` was (re)issued after `blocked` was shut out.
fn invited_after_block(invitation: &Participant, blocked: &Participant) -> bool {
    let blocked_at = blocked.left_at.unwrap_or(blocked.updated_at);
    invitation.invited_at.is_some_and(|invited| invited > blocked_at)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn request(room_type: RoomType) -> CreateRoomRequest {
        CreateRoomRequest {
            name: "  Weekly sync ".to_string(),
            description: None,
            room_type,
            max_participants: None,
            scheduled_start_time: None,
            scheduled_end_time: None,
            tags: vec![],
            waiting_room_enabled: false,
            recording_enabled: false,
        }
    }

    #[test]
    fn test_validate_defaults_and_trims() {
        let mut req = request(RoomType::Public);
        req.tags = vec!["Eng".to_string(), "eng ".to_string(), "infra".to_string()];

        let validated = validate_create_request(req).unwrap();
        assert_eq!(validated.name, "Weekly sync");
        assert_eq!(validated.max_participants, DEFAULT_MAX_PARTICIPANTS);
        assert_eq!(validated.tags, vec!["eng".to_string(), "infra".to_string()]);
    }

    #[test]
    fn test_validate_capacity_bounds() {
        for bad in [0, 1, 101] {
            let mut req = request(RoomType::Public);
            req.max_participants = Some(bad);
            assert!(matches!(
                validate_create_request(req),
                Err(RoomError::BadRequest(_))
            ));
        }
        for good in [2, 100] {
            let mut req = request(RoomType::Public);
            req.max_participants = Some(good);
            assert!(validate_create_request(req).is_ok());
        }
    }

    #[test]
    fn test_validate_schedule() {
        assert!(matches!(
            validate_create_request(request(RoomType::Scheduled)),
            Err(RoomError::BadRequest(_))
        ));

        let start = Utc::now();
        let mut req = request(RoomType::Scheduled);
        req.scheduled_start_time = Some(start);
        req.scheduled_end_time = Some(start);
        assert!(matches!(
            validate_create_request(req),
            Err(RoomError::BadRequest(_))
        ));
    }

    #[test]
    fn test_validate_rejects_blank_name() {
        let mut req = request(RoomType::Public);
        req.name = "   ".to_string();
        assert!(matches!(
            validate_create_request(req),
            Err(RoomError::BadRequest(_))
        ));
    }

    #[test]
    fn test_advance_record_binds_and_demotes() {
        let room_id = RoomId(Uuid::from_u128(1));
        let now = Utc::now();
        let mut record = Participant::new_email_invitation(
            room_id,
            "dana@example.com".to_string(),
            UserId(Uuid::from_u128(10)),
            now,
        );
        record.grant_host(now);
        let caller = Caller::new(UserId(Uuid::from_u128(4))).with_display_name("Dana");

        let advanced = advance_record(record, &caller, false, ParticipantStatus::Joined, now);

        assert_eq!(advanced.user_id, Some(caller.user_id));
        assert_eq!(advanced.display_name.as_deref(), Some("Dana"));
        assert_eq!(advanced.role, ParticipantRole::Participant);
        assert!(advanced.is_joined());
        assert_eq!(advanced.joined_at, Some(now));
    }

    #[test]
    fn test_validate_reason() {
        assert_eq!(validate_reason(Some("  ".to_string())).unwrap(), None);
        assert_eq!(
            validate_reason(Some(" spam ".to_string())).unwrap().as_deref(),
            Some("spam")
        );
        assert!(validate_reason(Some("x".repeat(MAX_REASON_LENGTH + 1))).is_err());
    }
}
