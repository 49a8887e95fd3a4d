//! Participant queries for the Postgres session store.

use super::session::{observe, PgSessionStore};
use super::ParticipantStore;
use crate::errors::RoomError;
use crate::models::{Capabilities, Participant, ParticipantStatus};
use async_trait::async_trait;
use common::types::{ParticipantId, RoomId, UserId};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use std::time::Instant;
use tracing::instrument;

/// Column list shared by every query returning a participant.
pub(crate) const PARTICIPANT_COLUMNS: &str = r#"
    participant_id, room_id, user_id, invited_email, display_name, role, status,
    can_share_screen, can_record, can_mute_others, is_muted, is_hand_raised,
    is_removed, removed_by, removal_reason, invited_by,
    invited_at, joined_at, left_at, created_at, updated_at
"#;

#[async_trait]
impl ParticipantStore for PgSessionStore {
    #[instrument(skip_all, name = "room.repo.get_participant")]
    async fn get_participant(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Option<Participant>, RoomError> {
        let start = Instant::now();
        let sql = format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE participant_id = $1");

        let row = observe(
            "get_participant",
            start,
            sqlx::query(&sql)
                .bind(participant_id.0) // $1
                .fetch_optional(&self.pool)
                .await,
        )?;

        row.map(map_row_to_participant).transpose()
    }

    #[instrument(skip_all, name = "room.repo.find_participant", fields(room_id = %room_id))]
    async fn find_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Participant>, RoomError> {
        let start = Instant::now();
        let sql = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE room_id = $1 AND user_id = $2"
        );

        let row = observe(
            "find_participant",
            start,
            sqlx::query(&sql)
                .bind(room_id.0) // $1
                .bind(user_id.0) // $2
                .fetch_optional(&self.pool)
                .await,
        )?;

        row.map(map_row_to_participant).transpose()
    }

    #[instrument(skip_all, name = "room.repo.find_invitation_by_email", fields(room_id = %room_id))]
    async fn find_invitation_by_email(
        &self,
        room_id: RoomId,
        email: &str,
    ) -> Result<Option<Participant>, RoomError> {
        let start = Instant::now();
        let sql = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE room_id = $1 AND invited_email = $2"
        );

        let row = observe(
            "find_invitation_by_email",
            start,
            sqlx::query(&sql)
                .bind(room_id.0) // $1
                .bind(email) // $2
                .fetch_optional(&self.pool)
                .await,
        )?;

        row.map(map_row_to_participant).transpose()
    }

    #[instrument(skip_all, name = "room.repo.list_participants", fields(room_id = %room_id))]
    async fn list_participants(
        &self,
        room_id: RoomId,
        status: Option<ParticipantStatus>,
    ) -> Result<Vec<Participant>, RoomError> {
        let start = Instant::now();
        let sql = format!(
            r#"
            SELECT {PARTICIPANT_COLUMNS} FROM participants
            WHERE room_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at ASC, participant_id ASC
            "#
        );

        let rows = observe(
            "list_participants",
            start,
            sqlx::query(&sql)
                .bind(room_id.0) // $1
                .bind(status.map(|s| s.as_str())) // $2
                .fetch_all(&self.pool)
                .await,
        )?;

        rows.into_iter().map(map_row_to_participant).collect()
    }

    #[instrument(skip_all, name = "room.repo.list_invitations_for_email")]
    async fn list_invitations_for_email(
        &self,
        email: &str,
    ) -> Result<Vec<Participant>, RoomError> {
        let start = Instant::now();
        let sql = format!(
            r#"
            SELECT {} FROM participants p
            JOIN rooms r ON r.room_id = p.room_id
            WHERE p.invited_email = $1
              AND p.status = 'invited'
              AND r.status IN ('scheduled', 'active')
            ORDER BY p.invited_at ASC, p.participant_id ASC
            "#,
            qualified_participant_columns("p")
        );

        let rows = observe(
            "list_invitations_for_email",
            start,
            sqlx::query(&sql)
                .bind(email) // $1
                .fetch_all(&self.pool)
                .await,
        )?;

        rows.into_iter().map(map_row_to_participant).collect()
    }
}

/// `PARTICIPANT_COLUMNS` prefixed with a table alias.
fn qualified_participant_columns(alias: &str) -> String {
    PARTICIPANT_COLUMNS
        .split(',')
        .map(|column| format!("{alias}.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Insert a participant row. Returns rows affected (0 on a uniqueness clash).
pub(crate) async fn insert_participant_row(
    conn: &mut PgConnection,
    p: &Participant,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO participants (
            participant_id, room_id, user_id, invited_email, display_name, role, status,
            can_share_screen, can_record, can_mute_others, is_muted, is_hand_raised,
            is_removed, removed_by, removal_reason, invited_by,
            invited_at, joined_at, left_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(p.id.0) // $1
    .bind(p.room_id.0) // $2
    .bind(p.user_id.map(|u| u.0)) // $3
    .bind(p.invited_email.as_deref()) // $4
    .bind(p.display_name.as_deref()) // $5
    .bind(p.role.as_str()) // $6
    .bind(p.status.as_str()) // $7
    .bind(p.capabilities.can_share_screen) // $8
    .bind(p.capabilities.can_record) // $9
    .bind(p.capabilities.can_mute_others) // $10
    .bind(p.capabilities.is_muted) // $11
    .bind(p.capabilities.is_hand_raised) // $12
    .bind(p.is_removed) // $13
    .bind(p.removed_by.map(|u| u.0)) // $14
    .bind(p.removal_reason.as_deref()) // $15
    .bind(p.invited_by.map(|u| u.0)) // $16
    .bind(p.invited_at) // $17
    .bind(p.joined_at) // $18
    .bind(p.left_at) // $19
    .bind(p.created_at) // $20
    .bind(p.updated_at) // $21
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Overwrite a participant row if it is still in `expected`.
/// Returns rows affected (0 when the guard failed).
pub(crate) async fn update_participant_row(
    conn: &mut PgConnection,
    p: &Participant,
    expected: ParticipantStatus,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE participants SET
            user_id = $3, invited_email = $4, display_name = $5, role = $6, status = $7,
            can_share_screen = $8, can_record = $9, can_mute_others = $10,
            is_muted = $11, is_hand_raised = $12,
            is_removed = $13, removed_by = $14, removal_reason = $15, invited_by = $16,
            invited_at = $17, joined_at = $18, left_at = $19, updated_at = $20
        WHERE participant_id = $1 AND status = $2
        "#,
    )
    .bind(p.id.0) // $1
    .bind(expected.as_str()) // $2
    .bind(p.user_id.map(|u| u.0)) // $3
    .bind(p.invited_email.as_deref()) // $4
    .bind(p.display_name.as_deref()) // $5
    .bind(p.role.as_str()) // $6
    .bind(p.status.as_str()) // $7
    .bind(p.capabilities.can_share_screen) // $8
    .bind(p.capabilities.can_record) // $9
    .bind(p.capabilities.can_mute_others) // $10
    .bind(p.capabilities.is_muted) // $11
    .bind(p.capabilities.is_hand_raised) // $12
    .bind(p.is_removed) // $13
    .bind(p.removed_by.map(|u| u.0)) // $14
    .bind(p.removal_reason.as_deref()) // $15
    .bind(p.invited_by.map(|u| u.0)) // $16
    .bind(p.invited_at) // $17
    .bind(p.joined_at) // $18
    .bind(p.left_at) // $19
    .bind(p.updated_at) // $20
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Map a database row to a Participant.
pub(crate) fn map_row_to_participant(row: PgRow) -> Result<Participant, RoomError> {
    let role: String = row.try_get("role")?;
    let status: String = row.try_get("status")?;
    let user_id: Option<uuid::Uuid> = row.try_get("user_id")?;
    let removed_by: Option<uuid::Uuid> = row.try_get("removed_by")?;
    let invited_by: Option<uuid::Uuid> = row.try_get("invited_by")?;

    Ok(Participant {
        id: ParticipantId(row.try_get("participant_id")?),
        room_id: RoomId(row.try_get("room_id")?),
        user_id: user_id.map(UserId),
        invited_email: row.try_get("invited_email")?,
        display_name: row.try_get("display_name")?,
        role: role
            .parse()
            .map_err(|e| RoomError::Database(format!("participants.role: {e}")))?,
        status: status
            .parse()
            .map_err(|e| RoomError::Database(format!("participants.status: {e}")))?,
        capabilities: Capabilities {
            can_share_screen: row.try_get("can_share_screen")?,
            can_record: row.try_get("can_record")?,
            can_mute_others: row.try_get("can_mute_others")?,
            is_muted: row.try_get("is_muted")?,
            is_hand_raised: row.try_get("is_hand_raised")?,
        },
        is_removed: row.try_get("is_removed")?,
        removed_by: removed_by.map(UserId),
        removal_reason: row.try_get("removal_reason")?,
        invited_by: invited_by.map(UserId),
        invited_at: row.try_get("invited_at")?,
        joined_at: row.try_get("joined_at")?,
        left_at: row.try_get("left_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_columns() {
        let columns = qualified_participant_columns("p");
        assert!(columns.starts_with("p.participant_id, p.room_id"));
        assert!(columns.ends_with("p.updated_at"));
        assert!(!columns.contains('\n'));
    }
}
