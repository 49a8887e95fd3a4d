//! Postgres session store: the transactional transitions.
//!
//! Every method that touches more than one row opens a transaction and locks
//! the room row with `SELECT ... FOR UPDATE` first, so concurrent joins,
//! departures and host swaps on the same room serialize on that lock.
//! Participant writes are additionally guarded by their expected prior status.

use super::participants::{insert_participant_row, update_participant_row};
use super::rooms::{map_row_to_room, ROOM_COLUMNS};
use super::{
    DepartureCommit, DeparturePlan, HostSwap, JoinCommit, JoinPlan, SessionStore, WriteOutcome,
};
use crate::errors::RoomError;
use crate::models::{Participant, ParticipantStatus, Room, RoomStatus};
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{ParticipantId, RoomId, UserId};
use sqlx::{PgConnection, PgPool};
use std::time::Instant;
use tracing::instrument;

/// Session store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgSessionStore {
    pub(crate) pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Record query latency and outcome, converting the error.
pub(crate) fn observe<T>(
    operation: &'static str,
    start: Instant,
    result: Result<T, sqlx::Error>,
) -> Result<T, RoomError> {
    let duration = start.elapsed();
    match result {
        Ok(value) => {
            metrics::record_db_query(operation, "success", duration);
            Ok(value)
        }
        Err(e) => {
            metrics::record_db_query(operation, "error", duration);
            Err(RoomError::Database(e.to_string()))
        }
    }
}

/// Room mapping inside a transaction body, where errors stay `sqlx::Error`.
fn decode_room(row: sqlx::postgres::PgRow) -> Result<Room, sqlx::Error> {
    map_row_to_room(row).map_err(|e| sqlx::Error::Decode(Box::new(std::io::Error::other(e.to_string()))))
}

/// Lock and load a room row for the rest of the transaction.
async fn lock_room(conn: &mut PgConnection, room_id: RoomId) -> Result<Option<Room>, sqlx::Error> {
    let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE room_id = $1 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(room_id.0) // $1
        .fetch_optional(&mut *conn)
        .await?;

    row.map(decode_room).transpose()
}

/// Mark joined and waiting participants left and close the room.
async fn end_room_rows(
    conn: &mut PgConnection,
    room_id: RoomId,
    at: DateTime<Utc>,
) -> Result<Option<Room>, sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE participants
        SET status = 'left', left_at = $2, updated_at = $2
        WHERE room_id = $1 AND status IN ('joined', 'waiting')
        "#,
    )
    .bind(room_id.0) // $1
    .bind(at) // $2
    .execute(&mut *conn)
    .await?;

    let sql = format!(
        r#"
        UPDATE rooms
        SET status = 'ended', current_participants = 0, ended_at = $2, updated_at = $2
        WHERE room_id = $1 AND status IN ('scheduled', 'active')
        RETURNING {ROOM_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(room_id.0) // $1
        .bind(at) // $2
        .fetch_optional(&mut *conn)
        .await?;

    row.map(decode_room).transpose()
}

/// Hand the host role from `departed` to the earliest-joined remaining
/// participant (lowest id on ties). Expects the room row to be locked.
async fn promote_successor_rows(
    conn: &mut PgConnection,
    room_id: RoomId,
    departed_record: ParticipantId,
    departed: UserId,
    at: DateTime<Utc>,
) -> Result<Option<Room>, sqlx::Error> {
    let successor: Option<(uuid::Uuid, uuid::Uuid)> = sqlx::query_as(
        r#"
        SELECT participant_id, user_id
        FROM participants
        WHERE room_id = $1 AND status = 'joined' AND user_id IS NOT NULL AND user_id <> $2
        ORDER BY joined_at ASC NULLS LAST, participant_id ASC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(room_id.0) // $1
    .bind(departed.0) // $2
    .fetch_optional(&mut *conn)
    .await?;
    let Some((successor_id, successor_user)) = successor else {
        return Ok(None);
    };

    sqlx::query(
        r#"
        UPDATE participants
        SET role = 'participant', can_record = false, can_mute_others = false, updated_at = $2
        WHERE participant_id = $1
        "#,
    )
    .bind(departed_record.0) // $1
    .bind(at) // $2
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        UPDATE participants
        SET role = 'host', can_record = true, can_mute_others = true, updated_at = $2
        WHERE participant_id = $1
        "#,
    )
    .bind(successor_id) // $1
    .bind(at) // $2
    .execute(&mut *conn)
    .await?;

    let sql = format!(
        r#"
        UPDATE rooms SET host_id = $2, updated_at = $3
        WHERE room_id = $1
        RETURNING {ROOM_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(room_id.0) // $1
        .bind(successor_user) // $2
        .bind(at) // $3
        .fetch_one(&mut *conn)
        .await?;

    decode_room(row).map(Some)
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn ping(&self) -> Result<(), RoomError> {
        let start = Instant::now();
        observe(
            "ping",
            start,
            sqlx::query("SELECT 1").execute(&self.pool).await,
        )?;
        Ok(())
    }

    #[instrument(skip_all, name = "room.repo.create_room", fields(room_id = %room.id))]
    async fn create_room(&self, room: &Room, host: &Participant) -> Result<(), RoomError> {
        let start = Instant::now();

        let result: Result<(), sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"
                INSERT INTO rooms (
                    room_id, name, description, host_id, room_type, status,
                    max_participants, current_participants,
                    scheduled_start_time, scheduled_end_time,
                    external_room_ref, external_room_sid, tags,
                    waiting_room_enabled, recording_enabled,
                    created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9, $10, $11, $12, $13, $14, $15, $15)
                "#,
            )
            .bind(room.id.0) // $1
            .bind(&room.name) // $2
            .bind(room.description.as_deref()) // $3
            .bind(room.host_id.0) // $4
            .bind(room.room_type.as_str()) // $5
            .bind(room.status.as_str()) // $6
            .bind(room.max_participants) // $7
            .bind(room.scheduled_start_time) // $8
            .bind(room.scheduled_end_time) // $9
            .bind(&room.external_room_ref) // $10
            .bind(room.external_room_sid.as_deref()) // $11
            .bind(&room.tags) // $12
            .bind(room.waiting_room_enabled) // $13
            .bind(room.recording_enabled) // $14
            .bind(room.created_at) // $15
            .execute(&mut *tx)
            .await?;

            insert_participant_row(&mut tx, host).await?;

            tx.commit().await
        }
        .await;

        observe("create_room", start, result)
    }

    #[instrument(skip_all, name = "room.repo.insert_participant", fields(room_id = %participant.room_id))]
    async fn insert_participant(
        &self,
        participant: &Participant,
    ) -> Result<WriteOutcome, RoomError> {
        let start = Instant::now();

        let result: Result<u64, sqlx::Error> = async {
            let mut conn = self.pool.acquire().await?;
            insert_participant_row(&mut conn, participant).await
        }
        .await;

        let affected = match result {
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                metrics::record_db_query("insert_participant", "error", start.elapsed());
                return Err(RoomError::RoomNotFound);
            }
            other => observe("insert_participant", start, other)?,
        };

        Ok(if affected == 1 {
            WriteOutcome::Applied
        } else {
            WriteOutcome::Stale
        })
    }

    #[instrument(skip_all, name = "room.repo.update_participant", fields(participant_id = %participant.id))]
    async fn update_participant(
        &self,
        participant: &Participant,
        expected: ParticipantStatus,
    ) -> Result<WriteOutcome, RoomError> {
        let start = Instant::now();

        let result: Result<u64, sqlx::Error> = async {
            let mut conn = self.pool.acquire().await?;
            update_participant_row(&mut conn, participant, expected).await
        }
        .await;

        let affected = match result {
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => 0,
            other => observe("update_participant", start, other)?,
        };

        Ok(if affected == 1 {
            WriteOutcome::Applied
        } else {
            WriteOutcome::Stale
        })
    }

    #[instrument(skip_all, name = "room.repo.delete_participant", fields(participant_id = %participant_id))]
    async fn delete_participant(
        &self,
        participant_id: ParticipantId,
        expected: ParticipantStatus,
    ) -> Result<WriteOutcome, RoomError> {
        let start = Instant::now();

        let result = observe(
            "delete_participant",
            start,
            sqlx::query("DELETE FROM participants WHERE participant_id = $1 AND status = $2")
                .bind(participant_id.0) // $1
                .bind(expected.as_str()) // $2
                .execute(&self.pool)
                .await,
        )?;

        Ok(if result.rows_affected() == 1 {
            WriteOutcome::Applied
        } else {
            WriteOutcome::Stale
        })
    }

    #[instrument(
        skip_all,
        name = "room.repo.commit_join",
        fields(room_id = %plan.participant.room_id, participant_id = %plan.participant.id)
    )]
    async fn commit_join(&self, plan: &JoinPlan) -> Result<JoinCommit, RoomError> {
        let start = Instant::now();
        let room_id = plan.participant.room_id;

        let result: Result<Option<JoinCommit>, sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;

            let Some(room) = lock_room(&mut tx, room_id).await? else {
                return Ok(None);
            };
            if room.status.is_terminal() {
                return Ok(Some(JoinCommit::RoomEnded));
            }
            let occupies_slot = plan.occupies_slot();
            if occupies_slot && !room.has_capacity() {
                return Ok(Some(JoinCommit::RoomFull));
            }

            if let Some(stale_id) = plan.supersedes {
                sqlx::query(
                    r#"
                    DELETE FROM participants
                    WHERE participant_id = $1 AND room_id = $2 AND status <> 'joined'
                    "#,
                )
                .bind(stale_id.0) // $1
                .bind(room_id.0) // $2
                .execute(&mut *tx)
                .await?;
            }

            let written = match plan.expected {
                None => insert_participant_row(&mut tx, &plan.participant).await?,
                Some(expected) => update_participant_row(&mut tx, &plan.participant, expected).await?,
            };
            if written != 1 {
                // Dropping the transaction rolls it back.
                return Ok(Some(JoinCommit::Stale));
            }

            let room = if occupies_slot {
                let sql = format!(
                    r#"
                    UPDATE rooms SET
                        current_participants = current_participants + 1,
                        status = CASE WHEN status = 'scheduled' THEN 'active' ELSE status END,
                        started_at = COALESCE(started_at, $2),
                        updated_at = $2
                    WHERE room_id = $1 AND current_participants < max_participants
                    RETURNING {ROOM_COLUMNS}
                    "#
                );
                let row = sqlx::query(&sql)
                    .bind(room_id.0) // $1
                    .bind(plan.at) // $2
                    .fetch_optional(&mut *tx)
                    .await?;
                match row {
                    Some(row) => decode_room(row)?,
                    None => return Ok(Some(JoinCommit::RoomFull)),
                }
            } else {
                room
            };

            tx.commit().await?;
            Ok(Some(JoinCommit::Applied(room)))
        }
        .await;

        let commit = match result {
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Some(JoinCommit::Stale)
            }
            other => observe("commit_join", start, other)?,
        };

        commit.ok_or(RoomError::RoomNotFound)
    }

    #[instrument(skip_all, name = "room.repo.commit_departure", fields(participant_id = %plan.participant_id))]
    async fn commit_departure(&self, plan: &DeparturePlan) -> Result<DepartureCommit, RoomError> {
        let start = Instant::now();

        let result: Result<DepartureCommit, sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;

            let room_id: Option<uuid::Uuid> =
                sqlx::query_scalar("SELECT room_id FROM participants WHERE participant_id = $1")
                    .bind(plan.participant_id.0) // $1
                    .fetch_optional(&mut *tx)
                    .await?;
            let Some(room_id) = room_id.map(RoomId) else {
                return Ok(DepartureCommit::Stale);
            };
            let Some(room) = lock_room(&mut tx, room_id).await? else {
                return Ok(DepartureCommit::Stale);
            };

            let departed: Option<Option<uuid::Uuid>> = sqlx::query_scalar(
                r#"
                UPDATE participants SET
                    status = $3,
                    left_at = $4,
                    updated_at = $4,
                    is_removed = CASE WHEN $3 IN ('denied', 'removed') THEN true ELSE is_removed END,
                    removed_by = CASE WHEN $3 IN ('denied', 'removed') THEN $5 ELSE removed_by END,
                    removal_reason = CASE WHEN $3 IN ('denied', 'removed') THEN $6 ELSE removal_reason END
                WHERE participant_id = $1 AND status = $2
                RETURNING user_id
                "#,
            )
            .bind(plan.participant_id.0) // $1
            .bind(plan.expected.as_str()) // $2
            .bind(plan.status.as_str()) // $3
            .bind(plan.at) // $4
            .bind(plan.removed_by.map(|u| u.0)) // $5
            .bind(plan.reason.as_deref()) // $6
            .fetch_optional(&mut *tx)
            .await?;
            let Some(departed_user) = departed else {
                return Ok(DepartureCommit::Stale);
            };
            let departed_user = departed_user.map(UserId);

            let mut room = room;
            if plan.frees_slot() {
                let sql = format!(
                    r#"
                    UPDATE rooms SET
                        current_participants = GREATEST(current_participants - 1, 0),
                        updated_at = $2
                    WHERE room_id = $1
                    RETURNING {ROOM_COLUMNS}
                    "#
                );
                let row = sqlx::query(&sql)
                    .bind(room_id.0) // $1
                    .bind(plan.at) // $2
                    .fetch_one(&mut *tx)
                    .await?;
                room = decode_room(row)?;
            }

            let remaining: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM participants WHERE room_id = $1 AND status = 'joined'",
            )
            .bind(room_id.0) // $1
            .fetch_one(&mut *tx)
            .await?;

            let mut ended = false;
            if plan.end_if_empty && room.status == RoomStatus::Active && remaining == 0 {
                if let Some(closed) = end_room_rows(&mut tx, room_id, plan.at).await? {
                    room = closed;
                    ended = true;
                }
            }

            let promote = plan.promote_successor
                && plan.frees_slot()
                && !ended
                && !room.status.is_terminal();
            let mut new_host = None;
            if let Some(departed) = departed_user.filter(|user| promote && room.is_host(*user)) {
                if let Some(promoted) =
                    promote_successor_rows(&mut tx, room_id, plan.participant_id, departed, plan.at)
                        .await?
                {
                    new_host = Some(promoted.host_id);
                    room = promoted;
                }
            }

            tx.commit().await?;
            Ok(DepartureCommit::Applied {
                room,
                remaining,
                ended,
                new_host,
            })
        }
        .await;

        observe("commit_departure", start, result)
    }

    #[instrument(skip_all, name = "room.repo.swap_host", fields(room_id = %swap.room_id))]
    async fn swap_host(&self, swap: &HostSwap) -> Result<WriteOutcome, RoomError> {
        let start = Instant::now();

        let result: Result<WriteOutcome, sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;

            let Some(room) = lock_room(&mut tx, swap.room_id).await? else {
                return Ok(WriteOutcome::Stale);
            };
            if room.host_id != swap.expected_host || room.status.is_terminal() {
                return Ok(WriteOutcome::Stale);
            }

            if let Some(demote) = swap.demote {
                sqlx::query(
                    r#"
                    UPDATE participants
                    SET role = 'participant', can_record = false, can_mute_others = false,
                        updated_at = $2
                    WHERE participant_id = $1
                    "#,
                )
                .bind(demote.0) // $1
                .bind(swap.at) // $2
                .execute(&mut *tx)
                .await?;
            }

            let promoted = sqlx::query(
                r#"
                UPDATE participants
                SET role = 'host', can_record = true, can_mute_others = true, updated_at = $4
                WHERE participant_id = $1 AND room_id = $2 AND user_id = $3 AND status = 'joined'
                "#,
            )
            .bind(swap.promote.0) // $1
            .bind(swap.room_id.0) // $2
            .bind(swap.new_host.0) // $3
            .bind(swap.at) // $4
            .execute(&mut *tx)
            .await?;
            if promoted.rows_affected() != 1 {
                return Ok(WriteOutcome::Stale);
            }

            sqlx::query("UPDATE rooms SET host_id = $2, updated_at = $3 WHERE room_id = $1")
                .bind(swap.room_id.0) // $1
                .bind(swap.new_host.0) // $2
                .bind(swap.at) // $3
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(WriteOutcome::Applied)
        }
        .await;

        match result {
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(WriteOutcome::Stale),
            other => observe("swap_host", start, other),
        }
    }

    #[instrument(skip_all, name = "room.repo.transition_room", fields(room_id = %room_id, from = %from, to = %to))]
    async fn transition_room(
        &self,
        room_id: RoomId,
        from: RoomStatus,
        to: RoomStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Room>, RoomError> {
        if !from.can_transition_to(to) {
            return Ok(None);
        }
        let start = Instant::now();

        let sql = format!(
            r#"
            UPDATE rooms SET
                status = $3,
                started_at = CASE WHEN $3 = 'active' THEN $4 ELSE started_at END,
                ended_at = CASE WHEN $3 IN ('ended', 'cancelled') THEN $4 ELSE ended_at END,
                updated_at = $4
            WHERE room_id = $1 AND status = $2
            RETURNING {ROOM_COLUMNS}
            "#
        );
        let row = observe(
            "transition_room",
            start,
            sqlx::query(&sql)
                .bind(room_id.0) // $1
                .bind(from.as_str()) // $2
                .bind(to.as_str()) // $3
                .bind(at) // $4
                .fetch_optional(&self.pool)
                .await,
        )?;

        row.map(map_row_to_room).transpose()
    }

    #[instrument(skip_all, name = "room.repo.end_room", fields(room_id = %room_id))]
    async fn end_room(
        &self,
        room_id: RoomId,
        at: DateTime<Utc>,
    ) -> Result<Option<Room>, RoomError> {
        let start = Instant::now();

        let result: Result<Option<Option<Room>>, sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;

            let Some(room) = lock_room(&mut tx, room_id).await? else {
                return Ok(None);
            };
            if room.status.is_terminal() {
                return Ok(Some(None));
            }
            let ended = end_room_rows(&mut tx, room_id, at).await?;

            tx.commit().await?;
            Ok(Some(ended))
        }
        .await;

        observe("end_room", start, result)?.ok_or(RoomError::RoomNotFound)
    }
}
