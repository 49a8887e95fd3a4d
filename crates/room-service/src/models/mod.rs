//! Room service models.
//!
//! Domain records (`Room`, `Participant`), their state enums, list filters,
//! and the request/response bodies of the HTTP API.

use chrono::{DateTime, Utc};
use common::types::{ParticipantId, RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Smallest allowed room capacity.
pub const MIN_PARTICIPANTS: i32 = 2;

/// Largest allowed room capacity.
pub const MAX_PARTICIPANTS: i32 = 100;

/// Default room capacity when the request omits one.
pub const DEFAULT_MAX_PARTICIPANTS: i32 = 10;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 255;

/// Maximum number of tags on a room.
pub const MAX_ROOM_TAGS: usize = 20;

/// Default page size for room listings.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page size for room listings.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Error returned when a stored enum column holds an unknown value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

/// Room access type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    /// Anyone authenticated may join.
    Public,
    /// Invitation required.
    Private,
    /// Invitation required, within a time window around the scheduled start.
    Scheduled,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::Public => "public",
            RoomType::Private => "private",
            RoomType::Scheduled => "scheduled",
        }
    }
}

impl FromStr for RoomType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(RoomType::Public),
            "private" => Ok(RoomType::Private),
            "scheduled" => Ok(RoomType::Scheduled),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Room lifecycle status.
///
/// Moves forward only: scheduled -> active -> ended, scheduled -> cancelled,
/// and scheduled -> ended for a room ended before anyone joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Scheduled,
    Active,
    Ended,
    Cancelled,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Scheduled => "scheduled",
            RoomStatus::Active => "active",
            RoomStatus::Ended => "ended",
            RoomStatus::Cancelled => "cancelled",
        }
    }

    /// Ended and cancelled rooms accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoomStatus::Ended | RoomStatus::Cancelled)
    }

    /// Whether `self -> next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: RoomStatus) -> bool {
        matches!(
            (self, next),
            (RoomStatus::Scheduled, RoomStatus::Active)
                | (RoomStatus::Scheduled, RoomStatus::Cancelled)
                | (RoomStatus::Scheduled, RoomStatus::Ended)
                | (RoomStatus::Active, RoomStatus::Ended)
        )
    }
}

impl FromStr for RoomStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(RoomStatus::Scheduled),
            "active" => Ok(RoomStatus::Active),
            "ended" => Ok(RoomStatus::Ended),
            "cancelled" => Ok(RoomStatus::Cancelled),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Participant role within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Host,
    Participant,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Host => "host",
            ParticipantRole::Participant => "participant",
        }
    }
}

impl FromStr for ParticipantRole {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(ParticipantRole::Host),
            "participant" => Ok(ParticipantRole::Participant),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Participant admission status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Invited,
    Waiting,
    Joined,
    Left,
    Declined,
    Denied,
    Removed,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Invited => "invited",
            ParticipantStatus::Waiting => "waiting",
            ParticipantStatus::Joined => "joined",
            ParticipantStatus::Left => "left",
            ParticipantStatus::Declined => "declined",
            ParticipantStatus::Denied => "denied",
            ParticipantStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipantStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invited" => Ok(ParticipantStatus::Invited),
            "waiting" => Ok(ParticipantStatus::Waiting),
            "joined" => Ok(ParticipantStatus::Joined),
            "left" => Ok(ParticipantStatus::Left),
            "declined" => Ok(ParticipantStatus::Declined),
            "denied" => Ok(ParticipantStatus::Denied),
            "removed" => Ok(ParticipantStatus::Removed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Per-participant capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_share_screen: bool,
    pub can_record: bool,
    pub can_mute_others: bool,
    pub is_muted: bool,
    pub is_hand_raised: bool,
}

impl Capabilities {
    /// Capabilities of an ordinary participant.
    pub fn participant() -> Self {
        Self {
            can_share_screen: true,
            can_record: false,
            can_mute_others: false,
            is_muted: false,
            is_hand_raised: false,
        }
    }

    /// Capabilities granted to the host.
    pub fn host() -> Self {
        Self {
            can_record: true,
            can_mute_others: true,
            ..Self::participant()
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::participant()
    }
}

/// A meeting room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub description: Option<String>,
    pub host_id: UserId,
    pub room_type: RoomType,
    pub status: RoomStatus,
    pub max_participants: i32,
    pub current_participants: i32,
    pub scheduled_start_time: Option<DateTime<Utc>>,
    pub scheduled_end_time: Option<DateTime<Utc>>,
    /// Room name on the media server.
    pub external_room_ref: String,
    /// Media server's own id for the room, when it reported one.
    pub external_room_sid: Option<String>,
    pub tags: Vec<String>,
    pub waiting_room_enabled: bool,
    pub recording_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Room {
    pub fn is_host(&self, user_id: UserId) -> bool {
        self.host_id == user_id
    }

    pub fn has_capacity(&self) -> bool {
        self.current_participants < self.max_participants
    }
}

/// A user's relationship to a room: invitation, waiting-room entry or
/// presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub room_id: RoomId,
    /// Unset until an email invitation is bound to an account.
    pub user_id: Option<UserId>,
    pub invited_email: Option<String>,
    pub display_name: Option<String>,
    pub role: ParticipantRole,
    pub status: ParticipantStatus,
    #[serde(flatten)]
    pub capabilities: Capabilities,
    pub is_removed: bool,
    pub removed_by: Option<UserId>,
    pub removal_reason: Option<String>,
    pub invited_by: Option<UserId>,
    pub invited_at: Option<DateTime<Utc>>,
    pub joined_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Participant {
    /// A fresh record for `user_id` in `room_id`, in `status`.
    pub fn new_for_user(
        room_id: RoomId,
        user_id: UserId,
        role: ParticipantRole,
        status: ParticipantStatus,
        now: DateTime<Utc>,
    ) -> Self {
        let capabilities = match role {
            ParticipantRole::Host => Capabilities::host(),
            ParticipantRole::Participant => Capabilities::participant(),
        };
        Self {
            id: ParticipantId::new(),
            room_id,
            user_id: Some(user_id),
            invited_email: None,
            display_name: None,
            role,
            status,
            capabilities,
            is_removed: false,
            removed_by: None,
            removal_reason: None,
            invited_by: None,
            invited_at: None,
            joined_at: None,
            left_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A pending email invitation, not yet bound to an account.
    pub fn new_email_invitation(
        room_id: RoomId,
        email: String,
        invited_by: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ParticipantId::new(),
            room_id,
            user_id: None,
            invited_email: Some(email),
            display_name: None,
            role: ParticipantRole::Participant,
            status: ParticipantStatus::Invited,
            capabilities: Capabilities::participant(),
            is_removed: false,
            removed_by: None,
            removal_reason: None,
            invited_by: Some(invited_by),
            invited_at: Some(now),
            joined_at: None,
            left_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_host(&self) -> bool {
        self.role == ParticipantRole::Host
    }

    pub fn is_joined(&self) -> bool {
        self.status == ParticipantStatus::Joined
    }

    /// Denied and removed participants stay out until explicitly re-invited.
    pub fn is_blocked(&self) -> bool {
        self.is_removed
            || matches!(
                self.status,
                ParticipantStatus::Denied | ParticipantStatus::Removed
            )
    }

    /// Promote to host role, granting host capabilities.
    pub fn grant_host(&mut self, now: DateTime<Utc>) {
        self.role = ParticipantRole::Host;
        self.capabilities.can_record = true;
        self.capabilities.can_mute_others = true;
        self.updated_at = now;
    }

    /// Demote to participant role, revoking host-only capabilities.
    pub fn revoke_host(&mut self, now: DateTime<Utc>) {
        self.role = ParticipantRole::Participant;
        self.capabilities.can_record = false;
        self.capabilities.can_mute_others = false;
        self.updated_at = now;
    }

    /// Mark as joined now.
    pub fn mark_joined(&mut self, now: DateTime<Utc>) {
        self.status = ParticipantStatus::Joined;
        self.joined_at = Some(now);
        self.left_at = None;
        self.updated_at = now;
    }

    /// Reset to a fresh invitation, clearing any earlier block.
    pub fn reset_invitation(&mut self, invited_by: UserId, now: DateTime<Utc>) {
        self.status = ParticipantStatus::Invited;
        self.is_removed = false;
        self.removed_by = None;
        self.removal_reason = None;
        self.invited_by = Some(invited_by);
        self.invited_at = Some(now);
        self.updated_at = now;
    }
}

/// The authenticated user behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl Caller {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            email: None,
            display_name: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Normalize an email for storage and comparison.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Minimal shape check: one `@`, non-empty local part, dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

// ============================================================================
// Listing
// ============================================================================

/// Sort key for room listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomSortField {
    #[default]
    CreatedAt,
    Name,
    ScheduledStartTime,
}

impl RoomSortField {
    /// Column name; only ever one of a fixed set, safe to splice into SQL.
    pub fn column(&self) -> &'static str {
        match self {
            RoomSortField::CreatedAt => "created_at",
            RoomSortField::Name => "name",
            RoomSortField::ScheduledStartTime => "scheduled_start_time",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filters for `list_rooms`. Page numbers start at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomFilter {
    pub room_type: Option<RoomType>,
    pub status: Option<RoomStatus>,
    /// Case-insensitive substring over name and description.
    pub search: Option<String>,
    /// Rooms carrying any of these tags.
    pub tags: Vec<String>,
    pub page: u32,
    pub page_size: u32,
    pub sort_by: RoomSortField,
    pub sort_order: SortOrder,
}

impl Default for RoomFilter {
    fn default() -> Self {
        Self {
            room_type: None,
            status: None,
            search: None,
            tags: Vec::new(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_by: RoomSortField::default(),
            sort_order: SortOrder::default(),
        }
    }
}

impl RoomFilter {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

/// One page of rooms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomPage {
    pub rooms: Vec<Room>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

// ============================================================================
// HTTP request/response bodies
// ============================================================================

/// Body of `POST /api/v1/rooms`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub room_type: RoomType,
    #[serde(default)]
    pub max_participants: Option<i32>,
    #[serde(default)]
    pub scheduled_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub waiting_room_enabled: bool,
    #[serde(default)]
    pub recording_enabled: bool,
}

/// Query string of `GET /api/v1/rooms`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListRoomsQuery {
    #[serde(default)]
    pub room_type: Option<RoomType>,
    #[serde(default)]
    pub status: Option<RoomStatus>,
    #[serde(default)]
    pub search: Option<String>,
    /// Comma-separated tag list.
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub sort_by: Option<RoomSortField>,
    #[serde(default)]
    pub sort_order: Option<SortOrder>,
}

/// Body of the admin actions that carry a reason.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Body of `POST /api/v1/rooms/{id}/transfer-host`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferHostRequest {
    pub new_host_id: UserId,
}

/// Body of `POST /api/v1/rooms/{id}/invitations`.
#[derive(Debug, Clone, Deserialize)]
pub struct InviteRequest {
    pub email: String,
}

/// Media credentials handed to a joined participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub token: String,
    pub server_url: String,
    pub identity: String,
    pub expires_in: u64,
}

/// Response of join and accept-invitation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRoomResponse {
    pub room: Room,
    pub participant: Participant,
    /// Present once the participant is joined; absent while waiting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessGrant>,
}

/// Generic status acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Readiness probe response.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
