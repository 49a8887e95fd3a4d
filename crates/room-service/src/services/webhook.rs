//! Media server webhook reconciliation.
//!
//! Translates LiveKit events into coordinator transitions. Deliveries may
//! repeat or arrive out of order, so every branch is idempotent: an event
//! that is already reflected in the store is acknowledged as ignored.
//! Only failures the sender should retry propagate as errors.

use crate::errors::RoomError;
use crate::models::{Room, RoomStatus};
use crate::observability::metrics;
use crate::services::coordinator::{PresenceUpdate, SessionCoordinator, Trigger};
use chrono::{DateTime, TimeZone, Utc};
use common::types::UserId;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info, instrument, warn};

/// Identity prefix LiveKit gives recording (egress) participants.
const EGRESS_IDENTITY_PREFIX: &str = "EG_";

/// Event kinds the reconciler acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    ParticipantJoined,
    ParticipantLeft,
    RoomStarted,
    RoomFinished,
    Unhandled(String),
}

impl WebhookEvent {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "participant_joined" => WebhookEvent::ParticipantJoined,
            "participant_left" => WebhookEvent::ParticipantLeft,
            "room_started" => WebhookEvent::RoomStarted,
            "room_finished" => WebhookEvent::RoomFinished,
            other => WebhookEvent::Unhandled(other.to_string()),
        }
    }

    /// Metrics label. Unknown tags collapse to `unhandled`.
    pub fn label(&self) -> &'static str {
        match self {
            WebhookEvent::ParticipantJoined => "participant_joined",
            WebhookEvent::ParticipantLeft => "participant_left",
            WebhookEvent::RoomStarted => "room_started",
            WebhookEvent::RoomFinished => "room_finished",
            WebhookEvent::Unhandled(_) => "unhandled",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookRoom {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sid: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookParticipant {
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub kind: Option<String>,
}

impl WebhookParticipant {
    /// Recording bots never have a participant record.
    pub fn is_egress(&self) -> bool {
        self.identity.starts_with(EGRESS_IDENTITY_PREFIX)
            || self
                .kind
                .as_deref()
                .is_some_and(|k| k.eq_ignore_ascii_case("egress"))
    }
}

/// A webhook delivery body.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    #[serde(default)]
    pub room: Option<WebhookRoom>,
    #[serde(default)]
    pub participant: Option<WebhookParticipant>,
    #[serde(default)]
    pub id: Option<String>,
    /// Unix seconds. LiveKit sends int64 fields as JSON strings.
    #[serde(default, rename = "createdAt", deserialize_with = "unix_seconds")]
    pub created_at: Option<i64>,
}

impl WebhookPayload {
    pub fn parse(body: &[u8]) -> Result<Self, RoomError> {
        serde_json::from_slice(body)
            .map_err(|e| RoomError::BadRequest(format!("Invalid webhook payload: {e}")))
    }

    pub fn event_kind(&self) -> WebhookEvent {
        WebhookEvent::parse(&self.event)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }
}

fn unix_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// What the reconciler did with a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    /// Acknowledged without a state change.
    Ignored(&'static str),
}

impl ReconcileOutcome {
    fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied => "applied",
            ReconcileOutcome::Ignored(_) => "ignored",
        }
    }
}

#[derive(Clone)]
pub struct WebhookReconciler {
    coordinator: SessionCoordinator,
}

impl WebhookReconciler {
    pub fn new(coordinator: SessionCoordinator) -> Self {
        Self { coordinator }
    }

    /// Apply one verified delivery.
    ///
    /// # Errors
    ///
    /// Only retryable failures (database, media server, exhausted retries)
    /// are returned; everything else is acknowledged.
    #[instrument(
        skip_all,
        name = "room.webhook.reconcile",
        fields(event = %payload.event, delivery_id = payload.id.as_deref().unwrap_or(""))
    )]
    pub async fn reconcile(&self, payload: &WebhookPayload) -> Result<ReconcileOutcome, RoomError> {
        let event = payload.event_kind();
        let result = self.dispatch(&event, payload).await;

        let outcome_label = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "error",
        };
        metrics::record_webhook_event(event.label(), outcome_label);

        match &result {
            Ok(ReconcileOutcome::Ignored(reason)) => {
                debug!(target: "room.webhook", event = event.label(), reason, "Webhook ignored");
            }
            Ok(ReconcileOutcome::Applied) => {
                debug!(target: "room.webhook", event = event.label(), "Webhook applied");
            }
            Err(e) => {
                warn!(target: "room.webhook", event = event.label(), error = %e, "Webhook failed, sender will retry");
            }
        }
        result
    }

    async fn dispatch(
        &self,
        event: &WebhookEvent,
        payload: &WebhookPayload,
    ) -> Result<ReconcileOutcome, RoomError> {
        if let WebhookEvent::Unhandled(tag) = event {
            debug!(target: "room.webhook", tag = %tag, "Unhandled webhook event");
            return Ok(ReconcileOutcome::Ignored("unhandled_event"));
        }

        let Some(external) = payload.room.as_ref().filter(|r| !r.name.is_empty()) else {
            return Ok(ReconcileOutcome::Ignored("missing_room"));
        };
        let Some(room) = self
            .coordinator
            .store()
            .find_room_by_external_ref(&external.name)
            .await?
        else {
            info!(target: "room.webhook", external_ref = %external.name, "Webhook for unknown room");
            return Ok(ReconcileOutcome::Ignored("unknown_room"));
        };

        match event {
            WebhookEvent::RoomStarted => self.room_started(&room, external).await,
            WebhookEvent::RoomFinished => self.room_finished(&room).await,
            WebhookEvent::ParticipantJoined | WebhookEvent::ParticipantLeft => {
                let Some(participant) = payload.participant.as_ref() else {
                    return Ok(ReconcileOutcome::Ignored("missing_participant"));
                };
                if participant.is_egress() {
                    return Ok(ReconcileOutcome::Ignored("egress_participant"));
                }
                let Some(user_id) = UserId::from_identity(&participant.identity) else {
                    info!(
                        target: "room.webhook",
                        room_id = %room.id,
                        "Webhook participant identity is not a user id"
                    );
                    return Ok(ReconcileOutcome::Ignored("unknown_identity"));
                };

                if *event == WebhookEvent::ParticipantJoined {
                    self.participant_joined(&room, user_id, &participant.identity, payload.created_at())
                        .await
                } else {
                    self.participant_left(&room, user_id).await
                }
            }
            WebhookEvent::Unhandled(_) => Ok(ReconcileOutcome::Ignored("unhandled_event")),
        }
    }

    async fn participant_joined(
        &self,
        room: &Room,
        user_id: UserId,
        identity: &str,
        event_at: Option<DateTime<Utc>>,
    ) -> Result<ReconcileOutcome, RoomError> {
        let update = self
            .coordinator
            .update_participant_status(room.id, user_id, event_at)
            .await;

        let refusal = match update {
            Ok(PresenceUpdate::Joined(_)) => return Ok(ReconcileOutcome::Applied),
            Ok(PresenceUpdate::Unchanged) => return Ok(ReconcileOutcome::Ignored("already_joined")),
            Ok(PresenceUpdate::StaleEvent) => return Ok(ReconcileOutcome::Ignored("stale_event")),
            Ok(PresenceUpdate::Refused(_)) => "participant_refused",
            Err(RoomError::ParticipantNotFound) => "participant_not_found",
            Err(RoomError::RoomFull) => "room_full",
            Err(RoomError::RoomEnded) => "room_ended",
            Err(e) => return acknowledge(e),
        };

        // Present on the transport without standing in the room: evict.
        info!(
            target: "room.webhook",
            room_id = %room.id,
            reason = refusal,
            "Evicting participant the room does not admit"
        );
        self.coordinator.evict_from_transport(room, identity).await;
        Ok(ReconcileOutcome::Ignored(refusal))
    }

    async fn participant_left(
        &self,
        room: &Room,
        user_id: UserId,
    ) -> Result<ReconcileOutcome, RoomError> {
        match self.coordinator.leave_room(room.id, user_id).await {
            Ok(()) => Ok(ReconcileOutcome::Applied),
            Err(RoomError::ParticipantNotFound | RoomError::RoomNotFound) => {
                Ok(ReconcileOutcome::Ignored("participant_not_found"))
            }
            Err(RoomError::AlreadyLeft) => Ok(ReconcileOutcome::Ignored("already_left")),
            Err(RoomError::InvalidParticipantStatus(_)) => {
                Ok(ReconcileOutcome::Ignored("not_present"))
            }
            Err(e) => acknowledge(e),
        }
    }

    async fn room_started(
        &self,
        room: &Room,
        external: &WebhookRoom,
    ) -> Result<ReconcileOutcome, RoomError> {
        if room.external_room_sid.is_none() && !external.sid.is_empty() {
            self.coordinator
                .store()
                .set_external_sid(room.id, &external.sid)
                .await?;
        }

        match room.status {
            RoomStatus::Active => return Ok(ReconcileOutcome::Ignored("already_active")),
            RoomStatus::Ended | RoomStatus::Cancelled => {
                return Ok(ReconcileOutcome::Ignored("room_terminal"))
            }
            RoomStatus::Scheduled => {}
        }

        match self
            .coordinator
            .start_room_by(room.id, room.host_id, Trigger::Webhook)
            .await
        {
            Ok(_) => Ok(ReconcileOutcome::Applied),
            Err(RoomError::RoomEnded) => Ok(ReconcileOutcome::Ignored("room_terminal")),
            Err(e) => acknowledge(e),
        }
    }

    async fn room_finished(&self, room: &Room) -> Result<ReconcileOutcome, RoomError> {
        if room.status.is_terminal() {
            return Ok(ReconcileOutcome::Ignored("room_terminal"));
        }

        match self
            .coordinator
            .end_room_by(room.id, room.host_id, Trigger::Webhook)
            .await
        {
            Ok(_) => Ok(ReconcileOutcome::Applied),
            Err(RoomError::RoomEnded) => Ok(ReconcileOutcome::Ignored("room_terminal")),
            Err(e) => acknowledge(e),
        }
    }
}

/// Propagate retryable failures; acknowledge the rest.
fn acknowledge(error: RoomError) -> Result<ReconcileOutcome, RoomError> {
    if error.is_retryable() {
        return Err(error);
    }
    warn!(target: "room.webhook", error = %error, "Webhook rejected by coordinator, acknowledging");
    Ok(ReconcileOutcome::Ignored("rejected"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parsing() {
        assert_eq!(
            WebhookEvent::parse("participant_joined"),
            WebhookEvent::ParticipantJoined
        );
        assert_eq!(WebhookEvent::parse("room_finished"), WebhookEvent::RoomFinished);
        assert_eq!(
            WebhookEvent::parse("track_published"),
            WebhookEvent::Unhandled("track_published".to_string())
        );
        assert_eq!(WebhookEvent::parse("track_published").label(), "unhandled");
    }

    #[test]
    fn test_payload_accepts_string_and_number_timestamps() {
        let as_string = WebhookPayload::parse(
            br#"{"event":"participant_left","room":{"name":"r"},"createdAt":"1717340000"}"#,
        )
        .unwrap();
        assert_eq!(as_string.created_at, Some(1_717_340_000));

        let as_number =
            WebhookPayload::parse(br#"{"event":"room_started","createdAt":1717340000}"#).unwrap();
        assert_eq!(as_number.created_at, Some(1_717_340_000));
        assert!(as_number.room.is_none());

        let missing = WebhookPayload::parse(br#"{"event":"room_started"}"#).unwrap();
        assert!(missing.created_at().is_none());
    }

    #[test]
    fn test_payload_rejects_malformed_json() {
        assert!(matches!(
            WebhookPayload::parse(b"{not json"),
            Err(RoomError::BadRequest(_))
        ));
    }

    #[test]
    fn test_egress_detection() {
        let by_prefix = WebhookParticipant {
            identity: "EG_abc123".to_string(),
            ..Default::default()
        };
        let by_kind = WebhookParticipant {
            identity: "recorder".to_string(),
            kind: Some("EGRESS".to_string()),
            ..Default::default()
        };
        let user = WebhookParticipant {
            identity: "user:6f1c2a4e-3b7d-4c1a-9e2f-0a1b2c3d4e5f".to_string(),
            kind: Some("STANDARD".to_string()),
            ..Default::default()
        };

        assert!(by_prefix.is_egress());
        assert!(by_kind.is_egress());
        assert!(!user.is_egress());
    }

    #[test]
    fn test_acknowledge_propagates_only_retryable_errors() {
        assert!(acknowledge(RoomError::Database("down".to_string())).is_err());
        assert!(acknowledge(RoomError::MediaUnavailable("timeout".to_string())).is_err());
        assert_eq!(
            acknowledge(RoomError::NotHost).unwrap(),
            ReconcileOutcome::Ignored("rejected")
        );
    }
}
