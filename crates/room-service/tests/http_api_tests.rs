//! HTTP API integration tests.
//!
//! Spawns the real router over the in-memory store and exercises it with
//! reqwest:
//! - Public probes and metrics
//! - User token authentication on protected routes
//! - Room create/join/leave and the error body format
//! - Signed media server webhooks

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use reqwest::StatusCode;
use room_test_utils::*;
use serde_json::{json, Value};

fn token_for(user: common::types::UserId, email: &str) -> String {
    TestTokenBuilder::new()
        .for_user(user)
        .with_email(email)
        .build()
}

fn alice_token() -> String {
    token_for(TEST_USER_ALICE, TEST_EMAIL_ALICE)
}

fn bob_token() -> String {
    token_for(TEST_USER_BOB, TEST_EMAIL_BOB)
}

async fn create_room(server: &TestRoomServer, token: &str, body: Value) -> Result<Value> {
    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/rooms", server.url()))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    Ok(response.json().await?)
}

// ============================================================================
// Probes
// ============================================================================

#[tokio::test]
async fn test_health_and_readiness() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = reqwest::Client::new();

    let health = client.get(format!("{}/health", server.url())).send().await?;
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(health.text().await?, "OK");

    let ready = client.get(format!("{}/ready", server.url())).send().await?;
    assert_eq!(ready.status(), StatusCode::OK);
    let body: Value = ready.json().await?;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["store"], "memory");
    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_is_public() -> Result<()> {
    let server = TestRoomServer::spawn().await?;

    let response = reqwest::get(format!("{}/metrics", server.url())).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_protected_routes_require_token() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = reqwest::Client::new();

    let missing = client
        .get(format!("{}/api/v1/rooms", server.url()))
        .send()
        .await?;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let body: Value = missing.json().await?;
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");

    let forged = TestTokenBuilder::new()
        .for_user(TEST_USER_ALICE)
        .signed_with("some-other-secret")
        .build();
    let rejected = client
        .get(format!("{}/api/v1/rooms", server.url()))
        .bearer_auth(forged)
        .send()
        .await?;
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

    let expired = TestTokenBuilder::new()
        .for_user(TEST_USER_ALICE)
        .expires_in(-600)
        .build();
    let rejected = client
        .get(format!("{}/api/v1/rooms", server.url()))
        .bearer_auth(expired)
        .send()
        .await?;
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

    let malformed_subject = TestTokenBuilder::new().with_subject("alice").build();
    let rejected = client
        .get(format!("{}/api/v1/rooms", server.url()))
        .bearer_auth(malformed_subject)
        .send()
        .await?;
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

// ============================================================================
// Rooms
// ============================================================================

#[tokio::test]
async fn test_create_join_leave_over_http() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = reqwest::Client::new();

    let room = create_room(
        &server,
        &alice_token(),
        json!({ "name": "Design review", "room_type": "public", "max_participants": 4 }),
    )
    .await?;
    let room_id = room["id"].as_str().unwrap().to_string();
    assert_eq!(room["status"], "scheduled");
    assert_eq!(room["host_id"], TEST_USER_ALICE.to_string());

    let joined: Value = client
        .post(format!("{}/api/v1/rooms/{room_id}/join", server.url()))
        .bearer_auth(bob_token())
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(joined["participant"]["status"], "joined");
    assert_eq!(joined["room"]["current_participants"], 1);
    assert_eq!(joined["access"]["server_url"], "ws://media.test");

    let again = client
        .post(format!("{}/api/v1/rooms/{room_id}/join", server.url()))
        .bearer_auth(bob_token())
        .send()
        .await?;
    assert_eq!(again.status(), StatusCode::CONFLICT);
    let body: Value = again.json().await?;
    assert_eq!(body["error"]["code"], "ALREADY_IN_ROOM");

    let left = client
        .post(format!("{}/api/v1/rooms/{room_id}/leave", server.url()))
        .bearer_auth(bob_token())
        .send()
        .await?;
    assert_eq!(left.status(), StatusCode::OK);

    let fetched: Value = client
        .get(format!("{}/api/v1/rooms/{room_id}", server.url()))
        .bearer_auth(bob_token())
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(fetched["status"], "ended", "last participant leaving ends the room");
    Ok(())
}

#[tokio::test]
async fn test_create_room_rejects_bad_bodies() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = reqwest::Client::new();

    let not_json = client
        .post(format!("{}/api/v1/rooms", server.url()))
        .bearer_auth(alice_token())
        .body("{not json")
        .send()
        .await?;
    assert_eq!(not_json.status(), StatusCode::BAD_REQUEST);

    let invalid = client
        .post(format!("{}/api/v1/rooms", server.url()))
        .bearer_auth(alice_token())
        .json(&json!({ "name": "x", "room_type": "public", "max_participants": 500 }))
        .send()
        .await?;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    let body: Value = invalid.json().await?;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let bad_query = client
        .get(format!("{}/api/v1/rooms?page=abc", server.url()))
        .bearer_auth(alice_token())
        .send()
        .await?;
    assert_eq!(bad_query.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_private_room_and_invitations_over_http() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = reqwest::Client::new();

    let room = create_room(
        &server,
        &alice_token(),
        json!({ "name": "Board", "room_type": "private" }),
    )
    .await?;
    let room_id = room["id"].as_str().unwrap().to_string();

    let uninvited = client
        .post(format!("{}/api/v1/rooms/{room_id}/join", server.url()))
        .bearer_auth(bob_token())
        .send()
        .await?;
    assert_eq!(uninvited.status(), StatusCode::FORBIDDEN);

    let invited = client
        .post(format!("{}/api/v1/rooms/{room_id}/invitations", server.url()))
        .bearer_auth(alice_token())
        .json(&json!({ "email": TEST_EMAIL_BOB }))
        .send()
        .await?;
    assert_eq!(invited.status(), StatusCode::CREATED);

    let mine: Value = client
        .get(format!("{}/api/v1/invitations", server.url()))
        .bearer_auth(bob_token())
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(mine.as_array().map(Vec::len), Some(1));

    let joined = client
        .post(format!("{}/api/v1/rooms/{room_id}/join", server.url()))
        .bearer_auth(bob_token())
        .send()
        .await?;
    assert_eq!(joined.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_waiting_room_over_http() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = reqwest::Client::new();

    let room = create_room(
        &server,
        &alice_token(),
        json!({ "name": "Office hours", "room_type": "public", "waiting_room_enabled": true }),
    )
    .await?;
    let room_id = room["id"].as_str().unwrap().to_string();

    let waiting: Value = client
        .post(format!("{}/api/v1/rooms/{room_id}/join", server.url()))
        .bearer_auth(bob_token())
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(waiting["participant"]["status"], "waiting");
    assert!(waiting.get("access").is_none());
    let participant_id = waiting["participant"]["id"].as_str().unwrap().to_string();

    let forbidden = client
        .get(format!("{}/api/v1/rooms/{room_id}/participants/waiting", server.url()))
        .bearer_auth(bob_token())
        .send()
        .await?;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let grant: Value = client
        .post(format!(
            "{}/api/v1/rooms/{room_id}/participants/{participant_id}/admit",
            server.url()
        ))
        .bearer_auth(alice_token())
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(grant["identity"], TEST_USER_BOB.identity());

    let joined: Value = client
        .get(format!(
            "{}/api/v1/rooms/{room_id}/participants?status=joined",
            server.url()
        ))
        .bearer_auth(alice_token())
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(joined.as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn test_unknown_room_is_not_found() -> Result<()> {
    let server = TestRoomServer::spawn().await?;

    let response = reqwest::Client::new()
        .get(format!("{}/api/v1/rooms/{}", server.url(), TEST_ROOM_UNKNOWN))
        .bearer_auth(alice_token())
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "ROOM_NOT_FOUND");
    Ok(())
}

// ============================================================================
// Webhooks
// ============================================================================

#[tokio::test]
async fn test_webhook_requires_valid_signature() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/webhooks/media", server.url());
    let body = WebhookBuilder::event("room_started").room("unknown").build();

    let unsigned = client.post(&url).body(body.clone()).send().await?;
    assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

    let wrong_key = sign_webhook_with(&body, "other-key", TEST_LIVEKIT_API_SECRET);
    let rejected = client
        .post(&url)
        .header("authorization", wrong_key)
        .body(body.clone())
        .send()
        .await?;
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

    // Signed for a different body.
    let other = sign_webhook(b"{}");
    let tampered = client
        .post(&url)
        .header("authorization", other)
        .body(body.clone())
        .send()
        .await?;
    assert_eq!(tampered.status(), StatusCode::UNAUTHORIZED);

    let signed = client
        .post(&url)
        .header("authorization", sign_webhook(&body))
        .body(body)
        .send()
        .await?;
    assert_eq!(signed.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_signed_garbage_is_bad_request() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let body = b"definitely not json".to_vec();

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/webhooks/media", server.url()))
        .header("authorization", sign_webhook(&body))
        .body(body)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_webhook_leave_updates_room() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = reqwest::Client::new();

    let room = create_room(
        &server,
        &alice_token(),
        json!({ "name": "Standup", "room_type": "public" }),
    )
    .await?;
    let room_id = room["id"].as_str().unwrap().to_string();
    let external_ref = room["external_room_ref"].as_str().unwrap().to_string();

    for token in [alice_token(), bob_token()] {
        let response = client
            .post(format!("{}/api/v1/rooms/{room_id}/join", server.url()))
            .bearer_auth(token)
            .send()
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let body = WebhookBuilder::event("participant_left")
        .room(&external_ref)
        .participant(&TEST_USER_BOB.identity())
        .build();
    let delivered = client
        .post(format!("{}/api/v1/webhooks/media", server.url()))
        .header("authorization", format!("Bearer {}", sign_webhook(&body)))
        .body(body)
        .send()
        .await?;
    assert_eq!(delivered.status(), StatusCode::OK);

    let fetched: Value = client
        .get(format!("{}/api/v1/rooms/{room_id}", server.url()))
        .bearer_auth(alice_token())
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(fetched["current_participants"], 1);
    assert_eq!(fetched["status"], "active");
    Ok(())
}
