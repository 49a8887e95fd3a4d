//! In-memory session store.
//!
//! Backs development runs (`STORE_BACKEND=memory`) and the coordinator test
//! suites. Every method runs inside one mutex section, which gives the same
//! atomicity the Postgres store gets from a transaction.

use super::{
    select_successor, DepartureCommit, DeparturePlan, HostSwap, JoinCommit, JoinPlan,
    ParticipantStore, RoomStore, SessionStore, WriteOutcome,
};
use crate::errors::RoomError;
use crate::models::{
    Participant, ParticipantStatus, Room, RoomFilter, RoomPage, RoomSortField, RoomStatus,
    SortOrder,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{ParticipantId, RoomId, UserId};
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    rooms: HashMap<RoomId, Room>,
    participants: HashMap<ParticipantId, Participant>,
}

impl Inner {
    /// Uniqueness rules mirrored from the Postgres indexes.
    fn clashes(&self, candidate: &Participant) -> bool {
        self.participants.values().any(|existing| {
            existing.id != candidate.id
                && existing.room_id == candidate.room_id
                && ((candidate.user_id.is_some() && existing.user_id == candidate.user_id)
                    || (candidate.invited_email.is_some()
                        && existing.invited_email == candidate.invited_email)
                    || (candidate.is_host()
                        && candidate.is_joined()
                        && existing.is_host()
                        && existing.is_joined()))
        })
    }

    fn joined_count(&self, room_id: RoomId) -> i64 {
        self.participants
            .values()
            .filter(|p| p.room_id == room_id && p.is_joined())
            .count() as i64
    }

    /// Close out a room. Caller checks that the room is not terminal.
    fn end(&mut self, room_id: RoomId, at: DateTime<Utc>) -> Option<Room> {
        for participant in self.participants.values_mut() {
            if participant.room_id == room_id
                && matches!(
                    participant.status,
                    ParticipantStatus::Joined | ParticipantStatus::Waiting
                )
            {
                participant.status = ParticipantStatus::Left;
                participant.left_at = Some(at);
                participant.updated_at = at;
            }
        }

        let room = self.rooms.get_mut(&room_id)?;
        room.status = RoomStatus::Ended;
        room.current_participants = 0;
        room.ended_at = Some(at);
        room.updated_at = at;
        Some(room.clone())
    }
}

/// Session store held entirely in process memory.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Inner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_filter(room: &Room, filter: &RoomFilter) -> bool {
    if filter.room_type.is_some_and(|t| t != room.room_type) {
        return false;
    }
    if filter.status.is_some_and(|s| s != room.status) {
        return false;
    }
    if let Some(search) = filter.search.as_deref() {
        let needle = search.to_lowercase();
        let in_name = room.name.to_lowercase().contains(&needle);
        let in_description = room
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(&needle));
        if !in_name && !in_description {
            return false;
        }
    }
    if !filter.tags.is_empty() && !filter.tags.iter().any(|t| room.tags.contains(t)) {
        return false;
    }
    true
}

fn compare_rooms(a: &Room, b: &Room, sort_by: RoomSortField) -> Ordering {
    let primary = match sort_by {
        RoomSortField::CreatedAt => a.created_at.cmp(&b.created_at),
        RoomSortField::Name => a.name.cmp(&b.name),
        // Unscheduled rooms sort last in either direction, like NULLS LAST.
        RoomSortField::ScheduledStartTime => {
            match (a.scheduled_start_time, b.scheduled_start_time) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        }
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl RoomStore for MemorySessionStore {
    async fn get_room(&self, room_id: RoomId) -> Result<Option<Room>, RoomError> {
        let inner = self.inner.lock().await;
        Ok(inner.rooms.get(&room_id).cloned())
    }

    async fn find_room_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<Room>, RoomError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rooms
            .values()
            .find(|r| r.external_room_ref == external_ref)
            .cloned())
    }

    async fn list_rooms(&self, filter: &RoomFilter) -> Result<RoomPage, RoomError> {
        let inner = self.inner.lock().await;
        let mut rooms: Vec<Room> = inner
            .rooms
            .values()
            .filter(|r| matches_filter(r, filter))
            .cloned()
            .collect();

        rooms.sort_by(|a, b| {
            let ordering = compare_rooms(a, b, filter.sort_by);
            match (filter.sort_order, filter.sort_by) {
                (SortOrder::Asc, _) => ordering,
                (SortOrder::Desc, RoomSortField::ScheduledStartTime)
                    if a.scheduled_start_time.is_none() != b.scheduled_start_time.is_none() =>
                {
                    ordering
                }
                (SortOrder::Desc, _) => ordering.reverse(),
            }
        });

        let total = rooms.len() as i64;
        let offset = usize::try_from(filter.offset()).unwrap_or(usize::MAX);
        let page_size = usize::try_from(filter.page_size).unwrap_or(usize::MAX);
        let rooms = rooms.into_iter().skip(offset).take(page_size).collect();

        Ok(RoomPage {
            rooms,
            total,
            page: filter.page,
            page_size: filter.page_size,
        })
    }

    async fn set_external_sid(&self, room_id: RoomId, sid: &str) -> Result<(), RoomError> {
        let mut inner = self.inner.lock().await;
        if let Some(room) = inner.rooms.get_mut(&room_id) {
            room.external_room_sid = Some(sid.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl ParticipantStore for MemorySessionStore {
    async fn get_participant(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Option<Participant>, RoomError> {
        let inner = self.inner.lock().await;
        Ok(inner.participants.get(&participant_id).cloned())
    }

    async fn find_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Participant>, RoomError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .participants
            .values()
            .find(|p| p.room_id == room_id && p.user_id == Some(user_id))
            .cloned())
    }

    async fn find_invitation_by_email(
        &self,
        room_id: RoomId,
        email: &str,
    ) -> Result<Option<Participant>, RoomError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .participants
            .values()
            .find(|p| p.room_id == room_id && p.invited_email.as_deref() == Some(email))
            .cloned())
    }

    async fn list_participants(
        &self,
        room_id: RoomId,
        status: Option<ParticipantStatus>,
    ) -> Result<Vec<Participant>, RoomError> {
        let inner = self.inner.lock().await;
        let mut participants: Vec<Participant> = inner
            .participants
            .values()
            .filter(|p| p.room_id == room_id && status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        participants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(participants)
    }

    async fn list_invitations_for_email(
        &self,
        email: &str,
    ) -> Result<Vec<Participant>, RoomError> {
        let inner = self.inner.lock().await;
        let mut invitations: Vec<Participant> = inner
            .participants
            .values()
            .filter(|p| {
                p.invited_email.as_deref() == Some(email)
                    && p.status == ParticipantStatus::Invited
                    && inner
                        .rooms
                        .get(&p.room_id)
                        .is_some_and(|r| !r.status.is_terminal())
            })
            .cloned()
            .collect();
        invitations.sort_by(|a, b| a.invited_at.cmp(&b.invited_at).then(a.id.cmp(&b.id)));
        Ok(invitations)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn ping(&self) -> Result<(), RoomError> {
        Ok(())
    }

    async fn create_room(&self, room: &Room, host: &Participant) -> Result<(), RoomError> {
        let mut inner = self.inner.lock().await;
        if inner.rooms.contains_key(&room.id)
            || inner
                .rooms
                .values()
                .any(|r| r.external_room_ref == room.external_room_ref)
        {
            return Err(RoomError::Conflict("Room already exists".to_string()));
        }
        inner.rooms.insert(room.id, room.clone());
        inner.participants.insert(host.id, host.clone());
        Ok(())
    }

    async fn insert_participant(
        &self,
        participant: &Participant,
    ) -> Result<WriteOutcome, RoomError> {
        let mut inner = self.inner.lock().await;
        if !inner.rooms.contains_key(&participant.room_id) {
            return Err(RoomError::RoomNotFound);
        }
        if inner.participants.contains_key(&participant.id) || inner.clashes(participant) {
            return Ok(WriteOutcome::Stale);
        }
        inner
            .participants
            .insert(participant.id, participant.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn update_participant(
        &self,
        participant: &Participant,
        expected: ParticipantStatus,
    ) -> Result<WriteOutcome, RoomError> {
        let mut inner = self.inner.lock().await;
        let current_matches = inner
            .participants
            .get(&participant.id)
            .is_some_and(|p| p.status == expected);
        if !current_matches || inner.clashes(participant) {
            return Ok(WriteOutcome::Stale);
        }
        inner
            .participants
            .insert(participant.id, participant.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn delete_participant(
        &self,
        participant_id: ParticipantId,
        expected: ParticipantStatus,
    ) -> Result<WriteOutcome, RoomError> {
        let mut inner = self.inner.lock().await;
        match inner.participants.get(&participant_id) {
            Some(p) if p.status == expected => {
                inner.participants.remove(&participant_id);
                Ok(WriteOutcome::Applied)
            }
            _ => Ok(WriteOutcome::Stale),
        }
    }

    async fn commit_join(&self, plan: &JoinPlan) -> Result<JoinCommit, RoomError> {
        let mut inner = self.inner.lock().await;
        let room_id = plan.participant.room_id;

        let Some(room) = inner.rooms.get(&room_id) else {
            return Err(RoomError::RoomNotFound);
        };
        if room.status.is_terminal() {
            return Ok(JoinCommit::RoomEnded);
        }
        let occupies_slot = plan.occupies_slot();
        if occupies_slot && !room.has_capacity() {
            return Ok(JoinCommit::RoomFull);
        }

        // Guard the prior state before touching anything.
        match plan.expected {
            None => {
                if inner.participants.contains_key(&plan.participant.id) {
                    return Ok(JoinCommit::Stale);
                }
            }
            Some(expected) => {
                let matches = inner
                    .participants
                    .get(&plan.participant.id)
                    .is_some_and(|p| p.status == expected && p.room_id == room_id);
                if !matches {
                    return Ok(JoinCommit::Stale);
                }
            }
        }

        let superseded = match plan.supersedes {
            Some(stale_id) => {
                let removable = match inner.participants.get(&stale_id) {
                    Some(stale) if stale.is_joined() || stale.room_id != room_id => {
                        return Ok(JoinCommit::Stale)
                    }
                    Some(_) => true,
                    None => false,
                };
                if removable {
                    inner.participants.remove(&stale_id)
                } else {
                    None
                }
            }
            None => None,
        };

        if inner.clashes(&plan.participant) {
            if let Some(restored) = superseded {
                inner.participants.insert(restored.id, restored);
            }
            return Ok(JoinCommit::Stale);
        }

        inner
            .participants
            .insert(plan.participant.id, plan.participant.clone());

        let Some(room) = inner.rooms.get_mut(&room_id) else {
            return Err(RoomError::RoomNotFound);
        };
        if occupies_slot {
            room.current_participants += 1;
            if room.status == RoomStatus::Scheduled {
                room.status = RoomStatus::Active;
                room.started_at = Some(plan.at);
            }
            room.updated_at = plan.at;
        }

        Ok(JoinCommit::Applied(room.clone()))
    }

    async fn commit_departure(&self, plan: &DeparturePlan) -> Result<DepartureCommit, RoomError> {
        let mut inner = self.inner.lock().await;

        let Some(participant) = inner.participants.get_mut(&plan.participant_id) else {
            return Ok(DepartureCommit::Stale);
        };
        if participant.status != plan.expected {
            return Ok(DepartureCommit::Stale);
        }
        plan.apply(participant);
        let room_id = participant.room_id;
        let departed_user = participant.user_id;

        let remaining = inner.joined_count(room_id);
        let Some(room) = inner.rooms.get_mut(&room_id) else {
            return Err(RoomError::RoomNotFound);
        };
        if plan.frees_slot() {
            room.current_participants = (room.current_participants - 1).max(0);
            room.updated_at = plan.at;
        }

        if plan.end_if_empty && room.status == RoomStatus::Active && remaining == 0 {
            let ended = inner.end(room_id, plan.at).ok_or(RoomError::RoomNotFound)?;
            return Ok(DepartureCommit::Applied {
                room: ended,
                remaining,
                ended: true,
                new_host: None,
            });
        }

        let promote = plan.promote_successor && plan.frees_slot() && !room.status.is_terminal();
        let departed_host = departed_user.filter(|user| promote && room.is_host(*user));

        let mut new_host = None;
        if let Some(departed) = departed_host {
            let successor = select_successor(
                inner.participants.values().filter(|p| p.room_id == room_id),
                departed,
            )
            .and_then(|p| p.user_id.map(|user| (p.id, user)));

            if let Some((successor_id, successor_user)) = successor {
                if let Some(old_host) = inner.participants.get_mut(&plan.participant_id) {
                    old_host.revoke_host(plan.at);
                }
                if let Some(promoted) = inner.participants.get_mut(&successor_id) {
                    promoted.grant_host(plan.at);
                }
                if let Some(room) = inner.rooms.get_mut(&room_id) {
                    room.host_id = successor_user;
                    room.updated_at = plan.at;
                }
                new_host = Some(successor_user);
            }
        }

        let snapshot = inner
            .rooms
            .get(&room_id)
            .cloned()
            .ok_or(RoomError::RoomNotFound)?;
        Ok(DepartureCommit::Applied {
            room: snapshot,
            remaining,
            ended: false,
            new_host,
        })
    }

    async fn swap_host(&self, swap: &HostSwap) -> Result<WriteOutcome, RoomError> {
        let mut inner = self.inner.lock().await;

        let room_ok = inner
            .rooms
            .get(&swap.room_id)
            .is_some_and(|r| r.host_id == swap.expected_host && !r.status.is_terminal());
        let promote_ok = inner.participants.get(&swap.promote).is_some_and(|p| {
            p.room_id == swap.room_id && p.is_joined() && p.user_id == Some(swap.new_host)
        });
        if !room_ok || !promote_ok {
            return Ok(WriteOutcome::Stale);
        }

        if let Some(demote_id) = swap.demote {
            if let Some(old_host) = inner.participants.get_mut(&demote_id) {
                old_host.revoke_host(swap.at);
            }
        }
        if let Some(new_host) = inner.participants.get_mut(&swap.promote) {
            new_host.grant_host(swap.at);
        }
        if let Some(room) = inner.rooms.get_mut(&swap.room_id) {
            room.host_id = swap.new_host;
            room.updated_at = swap.at;
        }
        Ok(WriteOutcome::Applied)
    }

    async fn transition_room(
        &self,
        room_id: RoomId,
        from: RoomStatus,
        to: RoomStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Room>, RoomError> {
        let mut inner = self.inner.lock().await;
        let Some(room) = inner.rooms.get_mut(&room_id) else {
            return Err(RoomError::RoomNotFound);
        };
        if room.status != from || !from.can_transition_to(to) {
            return Ok(None);
        }
        room.status = to;
        room.updated_at = at;
        match to {
            RoomStatus::Active => room.started_at = Some(at),
            RoomStatus::Ended | RoomStatus::Cancelled => room.ended_at = Some(at),
            RoomStatus::Scheduled => {}
        }
        Ok(Some(room.clone()))
    }

    async fn end_room(
        &self,
        room_id: RoomId,
        at: DateTime<Utc>,
    ) -> Result<Option<Room>, RoomError> {
        let mut inner = self.inner.lock().await;
        let Some(room) = inner.rooms.get(&room_id) else {
            return Err(RoomError::RoomNotFound);
        };
        if room.status.is_terminal() {
            return Ok(None);
        }
        Ok(inner.end(room_id, at))
    }
}
