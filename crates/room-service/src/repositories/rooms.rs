//! Room queries for the Postgres session store.
//!
//! All queries are parameterized. Listing builds its WHERE clause with
//! `QueryBuilder`; only the sort column and direction are spliced in, and
//! both come from closed enums.

use super::session::{observe, PgSessionStore};
use super::RoomStore;
use crate::errors::RoomError;
use crate::models::{Room, RoomFilter, RoomPage};
use async_trait::async_trait;
use common::types::{RoomId, UserId};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};
use std::time::Instant;
use tracing::instrument;

/// Column list shared by every query returning a room.
pub(crate) const ROOM_COLUMNS: &str = r#"
    room_id, name, description, host_id, room_type, status,
    max_participants, current_participants,
    scheduled_start_time, scheduled_end_time,
    external_room_ref, external_room_sid, tags,
    waiting_room_enabled, recording_enabled,
    created_at, updated_at, started_at, ended_at
"#;

#[async_trait]
impl RoomStore for PgSessionStore {
    #[instrument(skip_all, name = "room.repo.get_room", fields(room_id = %room_id))]
    async fn get_room(&self, room_id: RoomId) -> Result<Option<Room>, RoomError> {
        let start = Instant::now();
        let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE room_id = $1");

        let row = observe(
            "get_room",
            start,
            sqlx::query(&sql)
                .bind(room_id.0) // $1
                .fetch_optional(&self.pool)
                .await,
        )?;

        row.map(map_row_to_room).transpose()
    }

    #[instrument(skip_all, name = "room.repo.find_room_by_external_ref")]
    async fn find_room_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<Room>, RoomError> {
        let start = Instant::now();
        let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE external_room_ref = $1");

        let row = observe(
            "find_room_by_external_ref",
            start,
            sqlx::query(&sql)
                .bind(external_ref) // $1
                .fetch_optional(&self.pool)
                .await,
        )?;

        row.map(map_row_to_room).transpose()
    }

    #[instrument(skip_all, name = "room.repo.list_rooms")]
    async fn list_rooms(&self, filter: &RoomFilter) -> Result<RoomPage, RoomError> {
        let start = Instant::now();

        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM rooms");
        push_filters(&mut count_query, filter);
        let total: i64 = observe(
            "count_rooms",
            start,
            count_query
                .build_query_scalar::<i64>()
                .fetch_one(&self.pool)
                .await,
        )?;

        let start = Instant::now();
        let mut page_query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {ROOM_COLUMNS} FROM rooms"
        ));
        push_filters(&mut page_query, filter);
        page_query.push(format!(
            " ORDER BY {} {} NULLS LAST, room_id ASC",
            filter.sort_by.column(),
            filter.sort_order.keyword()
        ));
        page_query
            .push(" LIMIT ")
            .push_bind(i64::from(filter.page_size))
            .push(" OFFSET ")
            .push_bind(i64::try_from(filter.offset()).unwrap_or(i64::MAX));

        let rows = observe(
            "list_rooms",
            start,
            page_query.build().fetch_all(&self.pool).await,
        )?;

        let rooms = rows
            .into_iter()
            .map(map_row_to_room)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RoomPage {
            rooms,
            total,
            page: filter.page,
            page_size: filter.page_size,
        })
    }

    #[instrument(skip_all, name = "room.repo.set_external_sid", fields(room_id = %room_id))]
    async fn set_external_sid(&self, room_id: RoomId, sid: &str) -> Result<(), RoomError> {
        let start = Instant::now();

        observe(
            "set_external_sid",
            start,
            sqlx::query(
                r#"
                UPDATE rooms
                SET external_room_sid = $2
                WHERE room_id = $1 AND external_room_sid IS DISTINCT FROM $2
                "#,
            )
            .bind(room_id.0) // $1
            .bind(sid) // $2
            .execute(&self.pool)
            .await,
        )?;

        Ok(())
    }
}

/// Append the WHERE clause for a room filter.
fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &RoomFilter) {
    query.push(" WHERE TRUE");

    if let Some(room_type) = filter.room_type {
        query.push(" AND room_type = ").push_bind(room_type.as_str());
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = format!("%{}%", escape_like(search.trim()));
        query
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if !filter.tags.is_empty() {
        query.push(" AND tags && ").push_bind(filter.tags.clone());
    }
}

/// Escape LIKE metacharacters so user search text matches literally.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Map a database row to a Room.
pub(crate) fn map_row_to_room(row: PgRow) -> Result<Room, RoomError> {
    let room_type: String = row.try_get("room_type")?;
    let status: String = row.try_get("status")?;

    Ok(Room {
        id: RoomId(row.try_get("room_id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        host_id: UserId(row.try_get("host_id")?),
        room_type: room_type
            .parse()
            .map_err(|e| RoomError::Database(format!("rooms.room_type: {e}")))?,
        status: status
            .parse()
            .map_err(|e| RoomError::Database(format!("rooms.status: {e}")))?,
        max_participants: row.try_get("max_participants")?,
        current_participants: row.try_get("current_participants")?,
        scheduled_start_time: row.try_get("scheduled_start_time")?,
        scheduled_end_time: row.try_get("scheduled_end_time")?,
        external_room_ref: row.try_get("external_room_ref")?,
        external_room_sid: row.try_get("external_room_sid")?,
        tags: row.try_get("tags")?,
        waiting_room_enabled: row.try_get("waiting_room_enabled")?,
        recording_enabled: row.try_get("recording_enabled")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
    })
}
