//! Media infrastructure adapter.
//!
//! The coordinator talks to the real-time media server through
//! [`MediaInfrastructure`]. [`LiveKitClient`] speaks LiveKit's Twirp JSON API
//! and mints LiveKit access tokens; [`mock::MockMediaInfrastructure`] records
//! calls for tests.
//!
//! # Security
//!
//! - Every API call carries a short-lived HS256 token signed with the API secret
//! - Timeouts prevent hanging connections
//! - Errors are logged server-side; callers get generic messages

use crate::errors::RoomError;
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::Utc;
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{error, instrument, warn};

/// Connect timeout for media server requests, in seconds.
const MEDIA_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Lifetime of the tokens authenticating our own API calls, in seconds.
const API_TOKEN_TTL_SECS: i64 = 60;

/// Twirp service path for room management.
const ROOM_SERVICE_PATH: &str = "/twirp/livekit.RoomService";

/// Publish/subscribe permissions carried by an access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaGrants {
    pub can_publish: bool,
    pub can_subscribe: bool,
    pub can_publish_data: bool,
    pub room_admin: bool,
}

impl MediaGrants {
    pub fn participant() -> Self {
        Self {
            can_publish: true,
            can_subscribe: true,
            can_publish_data: true,
            room_admin: false,
        }
    }

    pub fn host() -> Self {
        Self {
            room_admin: true,
            ..Self::participant()
        }
    }
}

/// Room-composite recording started by the media server with the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressSettings {
    pub filepath: String,
}

/// Parameters for allocating an external room.
#[derive(Debug, Clone)]
pub struct CreateExternalRoom {
    pub name: String,
    pub max_participants: u32,
    pub empty_timeout_secs: u32,
    pub departure_timeout_secs: u32,
    pub metadata: String,
    pub egress: Option<EgressSettings>,
}

/// Handle of an allocated external room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRoom {
    /// The room name on the media server.
    pub external_ref: String,
    /// The media server's own id for the room.
    pub sid: String,
}

/// Parameters for minting a participant access token.
#[derive(Debug, Clone)]
pub struct AccessTokenRequest {
    pub identity: String,
    pub external_ref: String,
    pub display_name: Option<String>,
    pub grants: MediaGrants,
    pub valid_for: Duration,
}

/// A participant as seen by the media server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MediaParticipant {
    #[serde(default)]
    pub sid: String,
    pub identity: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: Option<String>,
}

/// Operations the session coordinator needs from the media server.
#[async_trait]
pub trait MediaInfrastructure: Send + Sync {
    /// Allocate a room on the media server.
    async fn create_room(&self, params: &CreateExternalRoom) -> Result<ExternalRoom, RoomError>;

    /// Delete a room. Deleting an unknown room succeeds.
    async fn delete_room(&self, external_ref: &str) -> Result<(), RoomError>;

    /// Mint an access token. Local operation, no network call.
    fn generate_access_token(&self, request: &AccessTokenRequest) -> Result<String, RoomError>;

    /// Disconnect a participant. Removing an absent participant succeeds.
    async fn remove_participant(&self, external_ref: &str, identity: &str)
        -> Result<(), RoomError>;

    async fn list_participants(&self, external_ref: &str)
        -> Result<Vec<MediaParticipant>, RoomError>;

    /// URL clients connect to with their access token.
    fn server_url(&self) -> &str;
}

// ============================================================================
// LiveKit
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoGrant<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    room: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    room_create: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    room_join: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    room_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    can_publish: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    can_subscribe: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    can_publish_data: Option<bool>,
}

#[derive(Debug, Serialize)]
struct GrantClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    nbf: i64,
    exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    video: VideoGrant<'a>,
}

#[derive(Debug, Serialize)]
struct FileOutput<'a> {
    filepath: &'a str,
}

#[derive(Debug, Serialize)]
struct RoomCompositeEgress<'a> {
    room_name: &'a str,
    file_outputs: Vec<FileOutput<'a>>,
}

#[derive(Debug, Serialize)]
struct RoomEgress<'a> {
    room: RoomCompositeEgress<'a>,
}

#[derive(Debug, Serialize)]
struct CreateRoomBody<'a> {
    name: &'a str,
    empty_timeout: u32,
    departure_timeout: u32,
    max_participants: u32,
    metadata: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    egress: Option<RoomEgress<'a>>,
}

#[derive(Debug, Serialize)]
struct RoomBody<'a> {
    room: &'a str,
}

#[derive(Debug, Serialize)]
struct RoomParticipantBody<'a> {
    room: &'a str,
    identity: &'a str,
}

#[derive(Debug, Deserialize)]
struct RoomResponse {
    #[serde(default)]
    sid: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ListParticipantsResponse {
    #[serde(default)]
    participants: Vec<MediaParticipant>,
}

#[derive(Debug, Deserialize)]
struct Empty {}

/// LiveKit server client.
#[derive(Clone)]
pub struct LiveKitClient {
    client: Client,
    /// http(s) base for the Twirp API.
    api_url: String,
    /// URL handed to clients, as configured.
    server_url: String,
    api_key: String,
    api_secret: SecretString,
}

impl LiveKitClient {
    /// Create a new LiveKit client.
    ///
    /// `server_url` may use a ws(s) scheme; API calls go to the matching
    /// http(s) URL.
    ///
    /// # Errors
    ///
    /// Returns `RoomError::Internal` if the HTTP client cannot be built.
    pub fn new(
        server_url: &str,
        api_key: String,
        api_secret: SecretString,
        request_timeout: Duration,
    ) -> Result<Self, RoomError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(MEDIA_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "room.media", error = %e, "Failed to build HTTP client");
                RoomError::Internal
            })?;

        let server_url = server_url.trim_end_matches('/').to_string();
        Ok(Self {
            client,
            api_url: api_base_url(&server_url),
            server_url,
            api_key,
            api_secret,
        })
    }

    fn sign(&self, claims: &GrantClaims<'_>) -> Result<String, RoomError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.api_secret.expose_secret().as_bytes()),
        )
        .map_err(|e| {
            error!(target: "room.media", error = %e, "Failed to sign media token");
            RoomError::Internal
        })
    }

    /// Token authenticating one of our own API calls.
    fn api_token(&self, room: Option<&str>, room_create: bool) -> Result<String, RoomError> {
        let now = Utc::now().timestamp();
        self.sign(&GrantClaims {
            iss: &self.api_key,
            sub: &self.api_key,
            nbf: now,
            exp: now + API_TOKEN_TTL_SECS,
            name: None,
            video: VideoGrant {
                room,
                room_create,
                room_join: false,
                room_admin: room.is_some(),
                can_publish: None,
                can_subscribe: None,
                can_publish_data: None,
            },
        })
    }

    async fn call<B, R>(
        &self,
        operation: &'static str,
        method: &str,
        token: &str,
        body: &B,
    ) -> Result<Option<R>, RoomError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{ROOM_SERVICE_PATH}/{method}", self.api_url);
        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let status = if e.is_timeout() { "timeout" } else { "error" };
                metrics::record_media_request(operation, status, start.elapsed());
                warn!(target: "room.media", error = %e, operation, "Media server request failed");
                return Err(RoomError::MediaUnavailable(format!("{operation}: {e}")));
            }
        };

        let result = handle_response(operation, response).await;
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_media_request(operation, status, start.elapsed());
        result
    }
}

/// Map a Twirp response. `Ok(None)` is a 404, which callers may treat as done.
async fn handle_response<R: DeserializeOwned>(
    operation: &'static str,
    response: reqwest::Response,
) -> Result<Option<R>, RoomError> {
    let status = response.status();

    if status.is_success() {
        response.json().await.map(Some).map_err(|e| {
            error!(target: "room.media", error = %e, operation, "Failed to parse media server response");
            RoomError::MediaUnavailable(format!("{operation}: malformed response"))
        })
    } else if status == StatusCode::NOT_FOUND {
        Ok(None)
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        error!(target: "room.media", status = %status, operation, "Media server rejected API credentials");
        Err(RoomError::Internal)
    } else {
        let body = response.text().await.unwrap_or_default();
        warn!(target: "room.media", status = %status, body = %body, operation, "Media server returned error");
        Err(RoomError::MediaUnavailable(format!("{operation}: status {status}")))
    }
}

/// The http(s) URL matching a ws(s) server URL.
fn api_base_url(server_url: &str) -> String {
    if let Some(rest) = server_url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        server_url.to_string()
    }
}

#[async_trait]
impl MediaInfrastructure for LiveKitClient {
    #[instrument(skip_all, name = "room.media.create_room", fields(room = %params.name))]
    async fn create_room(&self, params: &CreateExternalRoom) -> Result<ExternalRoom, RoomError> {
        let token = self.api_token(None, true)?;
        let body = CreateRoomBody {
            name: &params.name,
            empty_timeout: params.empty_timeout_secs,
            departure_timeout: params.departure_timeout_secs,
            max_participants: params.max_participants,
            metadata: &params.metadata,
            egress: params.egress.as_ref().map(|egress| RoomEgress {
                room: RoomCompositeEgress {
                    room_name: &params.name,
                    file_outputs: vec![FileOutput {
                        filepath: &egress.filepath,
                    }],
                },
            }),
        };

        let room: Option<RoomResponse> = self.call("create_room", "CreateRoom", &token, &body).await?;
        let room = room.ok_or_else(|| {
            RoomError::MediaUnavailable("create_room: unexpected not found".to_string())
        })?;

        Ok(ExternalRoom {
            external_ref: room.name,
            sid: room.sid,
        })
    }

    #[instrument(skip_all, name = "room.media.delete_room", fields(room = %external_ref))]
    async fn delete_room(&self, external_ref: &str) -> Result<(), RoomError> {
        let token = self.api_token(None, true)?;
        let _: Option<Empty> = self
            .call("delete_room", "DeleteRoom", &token, &RoomBody { room: external_ref })
            .await?;
        Ok(())
    }

    fn generate_access_token(&self, request: &AccessTokenRequest) -> Result<String, RoomError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(request.valid_for.as_secs()).unwrap_or(i64::MAX);

        self.sign(&GrantClaims {
            iss: &self.api_key,
            sub: &request.identity,
            nbf: now,
            exp: now.saturating_add(ttl),
            name: request.display_name.as_deref(),
            video: VideoGrant {
                room: Some(&request.external_ref),
                room_create: false,
                room_join: true,
                room_admin: request.grants.room_admin,
                can_publish: Some(request.grants.can_publish),
                can_subscribe: Some(request.grants.can_subscribe),
                can_publish_data: Some(request.grants.can_publish_data),
            },
        })
    }

    #[instrument(skip_all, name = "room.media.remove_participant", fields(room = %external_ref))]
    async fn remove_participant(
        &self,
        external_ref: &str,
        identity: &str,
    ) -> Result<(), RoomError> {
        let token = self.api_token(Some(external_ref), false)?;
        let body = RoomParticipantBody {
            room: external_ref,
            identity,
        };
        let _: Option<Empty> = self
            .call("remove_participant", "RemoveParticipant", &token, &body)
            .await?;
        Ok(())
    }

    #[instrument(skip_all, name = "room.media.list_participants", fields(room = %external_ref))]
    async fn list_participants(
        &self,
        external_ref: &str,
    ) -> Result<Vec<MediaParticipant>, RoomError> {
        let token = self.api_token(Some(external_ref), false)?;
        let listed: Option<ListParticipantsResponse> = self
            .call(
                "list_participants",
                "ListParticipants",
                &token,
                &RoomBody { room: external_ref },
            )
            .await?;
        Ok(listed.map(|l| l.participants).unwrap_or_default())
    }

    fn server_url(&self) -> &str {
        &self.server_url
    }
}

/// Mock media infrastructure for testing.
///
/// Records every call and can be told to fail specific operations.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// A call observed by the mock.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MediaCall {
        CreateRoom { name: String, egress: bool },
        DeleteRoom { room: String },
        GenerateToken { room: String, identity: String, room_admin: bool },
        RemoveParticipant { room: String, identity: String },
        ListParticipants { room: String },
    }

    #[derive(Default)]
    pub struct MockMediaInfrastructure {
        calls: Mutex<Vec<MediaCall>>,
        call_count: AtomicUsize,
        fail_create: AtomicBool,
        fail_delete: AtomicBool,
        fail_remove: AtomicBool,
        fail_token: AtomicBool,
        participants: Mutex<Vec<MediaParticipant>>,
    }

    impl MockMediaInfrastructure {
        /// A mock that accepts every call.
        pub fn accepting() -> Self {
            Self::default()
        }

        /// A mock whose every network call fails.
        pub fn failing() -> Self {
            let mock = Self::default();
            mock.fail_create.store(true, Ordering::SeqCst);
            mock.fail_delete.store(true, Ordering::SeqCst);
            mock.fail_remove.store(true, Ordering::SeqCst);
            mock
        }

        pub fn fail_create(&self, fail: bool) {
            self.fail_create.store(fail, Ordering::SeqCst);
        }

        pub fn fail_delete(&self, fail: bool) {
            self.fail_delete.store(fail, Ordering::SeqCst);
        }

        pub fn fail_remove(&self, fail: bool) {
            self.fail_remove.store(fail, Ordering::SeqCst);
        }

        pub fn fail_token(&self, fail: bool) {
            self.fail_token.store(fail, Ordering::SeqCst);
        }

        /// Participants returned by `list_participants`.
        pub fn set_participants(&self, participants: Vec<MediaParticipant>) {
            if let Ok(mut current) = self.participants.lock() {
                *current = participants;
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        pub fn calls(&self) -> Vec<MediaCall> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        fn record(&self, call: MediaCall) {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call);
            }
        }

        fn unavailable(operation: &str) -> RoomError {
            RoomError::MediaUnavailable(format!("mock {operation} failure"))
        }
    }

    #[async_trait]
    impl MediaInfrastructure for MockMediaInfrastructure {
        async fn create_room(
            &self,
            params: &CreateExternalRoom,
        ) -> Result<ExternalRoom, RoomError> {
            self.record(MediaCall::CreateRoom {
                name: params.name.clone(),
                egress: params.egress.is_some(),
            });
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(Self::unavailable("create_room"));
            }
            Ok(ExternalRoom {
                external_ref: params.name.clone(),
                sid: format!("RM_{}", params.name),
            })
        }

        async fn delete_room(&self, external_ref: &str) -> Result<(), RoomError> {
            self.record(MediaCall::DeleteRoom {
                room: external_ref.to_string(),
            });
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(Self::unavailable("delete_room"));
            }
            Ok(())
        }

        fn generate_access_token(
            &self,
            request: &AccessTokenRequest,
        ) -> Result<String, RoomError> {
            self.record(MediaCall::GenerateToken {
                room: request.external_ref.clone(),
                identity: request.identity.clone(),
                room_admin: request.grants.room_admin,
            });
            if self.fail_token.load(Ordering::SeqCst) {
                return Err(RoomError::Internal);
            }
            Ok(format!(
                "mock-token:{}:{}",
                request.external_ref, request.identity
            ))
        }

        async fn remove_participant(
            &self,
            external_ref: &str,
            identity: &str,
        ) -> Result<(), RoomError> {
            self.record(MediaCall::RemoveParticipant {
                room: external_ref.to_string(),
                identity: identity.to_string(),
            });
            if self.fail_remove.load(Ordering::SeqCst) {
                return Err(Self::unavailable("remove_participant"));
            }
            Ok(())
        }

        async fn list_participants(
            &self,
            external_ref: &str,
        ) -> Result<Vec<MediaParticipant>, RoomError> {
            self.record(MediaCall::ListParticipants {
                room: external_ref.to_string(),
            });
            Ok(self
                .participants
                .lock()
                .map(|p| p.clone())
                .unwrap_or_default())
        }

        fn server_url(&self) -> &str {
            "ws://media.test"
        }
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used, clippy::expect_used)]
    mod tests {
        use super::*;

        fn create_params() -> CreateExternalRoom {
            CreateExternalRoom {
                name: "room-a".to_string(),
                max_participants: 10,
                empty_timeout_secs: 300,
                departure_timeout_secs: 20,
                metadata: String::new(),
                egress: None,
            }
        }

        #[tokio::test]
        async fn test_mock_accepting_records_calls() {
            let mock = MockMediaInfrastructure::accepting();

            let room = mock.create_room(&create_params()).await.unwrap();
            assert_eq!(room.external_ref, "room-a");
            mock.remove_participant("room-a", "u1").await.unwrap();
            mock.delete_room("room-a").await.unwrap();

            assert_eq!(mock.call_count(), 3);
            assert_eq!(
                mock.calls().last(),
                Some(&MediaCall::DeleteRoom {
                    room: "room-a".to_string()
                })
            );
        }

        #[tokio::test]
        async fn test_mock_failing() {
            let mock = MockMediaInfrastructure::failing();

            let err = mock.create_room(&create_params()).await.unwrap_err();
            assert!(matches!(err, RoomError::MediaUnavailable(_)));
            assert!(mock.delete_room("room-a").await.is_err());
            assert_eq!(mock.call_count(), 2);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    const SECRET: &str = "livekit-test-secret-0123456789abcdef";

    fn client() -> LiveKitClient {
        LiveKitClient::new(
            "wss://media.example.com/",
            "APIkey".to_string(),
            SecretString::from(SECRET.to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_api_base_url_maps_websocket_schemes() {
        assert_eq!(api_base_url("wss://lk.example.com"), "https://lk.example.com");
        assert_eq!(api_base_url("ws://localhost:7880"), "http://localhost:7880");
        assert_eq!(api_base_url("https://lk.example.com"), "https://lk.example.com");
    }

    #[test]
    fn test_server_url_is_kept_as_configured() {
        assert_eq!(client().server_url(), "wss://media.example.com");
    }

    #[test]
    fn test_access_token_carries_video_grant() {
        let token = client()
            .generate_access_token(&AccessTokenRequest {
                identity: "user:6f1c2a4e-3b7d-4c1a-9e2f-0a1b2c3d4e5f".to_string(),
                external_ref: "room-a".to_string(),
                display_name: Some("Ada".to_string()),
                grants: MediaGrants::host(),
                valid_for: Duration::from_secs(600),
            })
            .unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_nbf = true;
        let decoded = decode::<serde_json::Value>(
            &token,
            &DecodingKey::from_secret(SECRET.as_bytes()),
            &validation,
        )
        .unwrap();
        let claims = decoded.claims;

        assert_eq!(claims["iss"], "APIkey");
        assert_eq!(claims["sub"], "user:6f1c2a4e-3b7d-4c1a-9e2f-0a1b2c3d4e5f");
        assert_eq!(claims["name"], "Ada");
        assert_eq!(claims["video"]["room"], "room-a");
        assert_eq!(claims["video"]["roomJoin"], true);
        assert_eq!(claims["video"]["roomAdmin"], true);
        assert_eq!(claims["video"]["canPublish"], true);
        assert!(claims["video"].get("roomCreate").is_none());
    }

    #[test]
    fn test_create_room_body_with_egress() {
        let body = CreateRoomBody {
            name: "room-a",
            empty_timeout: 300,
            departure_timeout: 20,
            max_participants: 10,
            metadata: "{}",
            egress: Some(RoomEgress {
                room: RoomCompositeEgress {
                    room_name: "room-a",
                    file_outputs: vec![FileOutput {
                        filepath: "recordings/room-a.mp4",
                    }],
                },
            }),
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_participants"], 10);
        assert_eq!(
            json["egress"]["room"]["file_outputs"][0]["filepath"],
            "recordings/room-a.mp4"
        );
    }

    #[test]
    fn test_media_participant_deserialization_tolerates_missing_fields() {
        let json = r#"{"participants":[{"identity":"user:1","sid":"PA_1","kind":"EGRESS"},{"identity":"user:2"}]}"#;
        let listed: ListParticipantsResponse = serde_json::from_str(json).unwrap();

        assert_eq!(listed.participants.len(), 2);
        assert_eq!(listed.participants[0].kind.as_deref(), Some("EGRESS"));
        assert_eq!(listed.participants[1].sid, "");
    }
}
