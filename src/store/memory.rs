use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::audit::AuditEntry;
use crate::models::booking::{Booking, BookingStatus};
use crate::models::outbox::{MissionAssigned, OutboxEvent, OutboxPayload, ProviderNotification};
use crate::models::provider::Provider;
use crate::models::request::{RequestStatus, ServiceRequest};
use crate::store::{
    AssignmentCommit, AuditLog, BookingLedger, MissionRepository, NotificationSink,
    ProviderDirectory, RepositoryError,
};

/// DashMap-backed tables. Row mutations hold the row's shard lock, which is what
/// makes a request update and its outbox row atomic.
#[derive(Default)]
pub struct InMemoryStore {
    requests: DashMap<Uuid, ServiceRequest>,
    providers: DashMap<Uuid, Provider>,
    bookings: DashMap<Uuid, Booking>,
    outbox: DashMap<Uuid, OutboxEvent>,
    audit: DashMap<Uuid, AuditEntry>,
    notifications: DashMap<Uuid, ProviderNotification>,
    audit_sequence: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications_for(&self, provider_id: Uuid) -> Vec<ProviderNotification> {
        let mut notifications: Vec<ProviderNotification> = self
            .notifications
            .iter()
            .filter(|entry| entry.provider_id == provider_id)
            .map(|entry| entry.value().clone())
            .collect();
        notifications.sort_by_key(|notification| notification.created_at);
        notifications
    }
}

fn by_rating_desc(a: &Provider, b: &Provider) -> Ordering {
    let by_rating = match (a.rating, b.rating) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_rating
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.id.cmp(&b.id))
}

impl MissionRepository for InMemoryStore {
    fn insert_request(&self, request: ServiceRequest) -> Result<ServiceRequest, RepositoryError> {
        self.requests.insert(request.id, request.clone());
        Ok(request)
    }

    fn fetch_request(&self, id: Uuid) -> Result<Option<ServiceRequest>, RepositoryError> {
        Ok(self.requests.get(&id).map(|entry| entry.value().clone()))
    }

    fn transition_request(
        &self,
        id: Uuid,
        status: RequestStatus,
        now: DateTime<Utc>,
    ) -> Result<ServiceRequest, RepositoryError> {
        let mut request = self
            .requests
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("request {id} not found")))?;

        request.transition(status, now)?;
        Ok(request.clone())
    }

    fn pending_requests(&self, limit: usize) -> Result<Vec<ServiceRequest>, RepositoryError> {
        let mut pending: Vec<ServiceRequest> = self
            .requests
            .iter()
            .filter(|entry| entry.status.is_pending())
            .map(|entry| entry.value().clone())
            .collect();

        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        pending.truncate(limit);
        Ok(pending)
    }

    fn count_pending(&self) -> Result<u64, RepositoryError> {
        Ok(self
            .requests
            .iter()
            .filter(|entry| entry.status.is_pending())
            .count() as u64)
    }

    fn count_assigned_since(&self, since: DateTime<Utc>) -> Result<u64, RepositoryError> {
        Ok(self
            .requests
            .iter()
            .filter(|entry| entry.status == RequestStatus::Assigned && entry.updated_at >= since)
            .count() as u64)
    }

    fn count_requests(&self) -> Result<u64, RepositoryError> {
        Ok(self.requests.len() as u64)
    }

    fn commit_assignment(
        &self,
        commit: AssignmentCommit,
    ) -> Result<(ServiceRequest, OutboxEvent), RepositoryError> {
        let mut request = self.requests.get_mut(&commit.mission_id).ok_or_else(|| {
            RepositoryError::NotFound(format!("mission {} not found", commit.mission_id))
        })?;

        if request.version != commit.expected_version {
            return Err(RepositoryError::VersionConflict {
                expected: commit.expected_version,
                actual: request.version,
            });
        }

        let previous_provider = request.assigned_provider;
        request.assign(commit.provider_id, commit.now);

        let event = OutboxEvent::new(
            OutboxPayload::MissionAssigned(MissionAssigned {
                mission_id: request.id,
                provider_id: commit.provider_id,
                previous_provider,
                actor_id: commit.actor_id,
                service_type: request.service_type.clone(),
                location: request.location.clone(),
                version: request.version,
            }),
            commit.now,
        );
        self.outbox.insert(event.id, event.clone());

        Ok((request.clone(), event))
    }

    fn due_events(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let mut events: Vec<OutboxEvent> = self
            .outbox
            .iter()
            .filter(|entry| {
                entry.dispatched_at.is_none()
                    && entry.dead_lettered_at.is_none()
                    && entry.next_attempt_at <= now
            })
            .map(|entry| entry.value().clone())
            .collect();

        events.sort_by(|a, b| {
            a.next_attempt_at
                .cmp(&b.next_attempt_at)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        events.truncate(limit);
        Ok(events)
    }

    fn mark_dispatched(&self, event_id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut event = self
            .outbox
            .get_mut(&event_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("outbox event {event_id} not found")))?;

        event.attempts = event.attempts.saturating_add(1);
        event.last_error = None;
        event.dispatched_at = Some(at);
        Ok(())
    }

    fn record_attempt_failure(
        &self,
        event_id: Uuid,
        error: String,
        failed_at: DateTime<Utc>,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let mut event = self
            .outbox
            .get_mut(&event_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("outbox event {event_id} not found")))?;

        event.attempts = event.attempts.saturating_add(1);
        event.last_error = Some(error);
        match retry_at {
            Some(at) => event.next_attempt_at = at,
            None => event.dead_lettered_at = Some(failed_at),
        }
        Ok(())
    }

    fn count_undispatched(&self) -> Result<u64, RepositoryError> {
        Ok(self
            .outbox
            .iter()
            .filter(|entry| entry.dispatched_at.is_none() && entry.dead_lettered_at.is_none())
            .count() as u64)
    }

    fn count_dead_lettered(&self) -> Result<u64, RepositoryError> {
        Ok(self
            .outbox
            .iter()
            .filter(|entry| entry.dead_lettered_at.is_some())
            .count() as u64)
    }
}

impl ProviderDirectory for InMemoryStore {
    fn insert_provider(&self, provider: Provider) -> Result<Provider, RepositoryError> {
        self.providers.insert(provider.id, provider.clone());
        Ok(provider)
    }

    fn fetch_provider(&self, id: Uuid) -> Result<Option<Provider>, RepositoryError> {
        Ok(self.providers.get(&id).map(|entry| entry.value().clone()))
    }

    fn list_providers(&self) -> Result<Vec<Provider>, RepositoryError> {
        let mut providers: Vec<Provider> = self
            .providers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        providers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(providers)
    }

    fn top_rated_eligible(&self, limit: usize) -> Result<Vec<Provider>, RepositoryError> {
        let mut eligible: Vec<Provider> = self
            .providers
            .iter()
            .filter(|entry| entry.is_eligible())
            .map(|entry| entry.value().clone())
            .collect();

        eligible.sort_by(by_rating_desc);
        eligible.truncate(limit);
        Ok(eligible)
    }

    fn count_eligible(&self) -> Result<u64, RepositoryError> {
        Ok(self
            .providers
            .iter()
            .filter(|entry| entry.is_eligible())
            .count() as u64)
    }
}

impl BookingLedger for InMemoryStore {
    fn insert_booking(&self, booking: Booking) -> Result<Booking, RepositoryError> {
        self.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    fn update_booking_status(
        &self,
        id: Uuid,
        status: BookingStatus,
        now: DateTime<Utc>,
    ) -> Result<Booking, RepositoryError> {
        let mut booking = self
            .bookings
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("booking {id} not found")))?;

        booking.status = status;
        booking.updated_at = now;
        Ok(booking.clone())
    }

    fn count_created_since(&self, since: DateTime<Utc>) -> Result<u64, RepositoryError> {
        Ok(self
            .bookings
            .iter()
            .filter(|entry| entry.created_at >= since)
            .count() as u64)
    }

    fn count_completed_created_since(&self, since: DateTime<Utc>) -> Result<u64, RepositoryError> {
        Ok(self
            .bookings
            .iter()
            .filter(|entry| entry.created_at >= since && entry.status == BookingStatus::Completed)
            .count() as u64)
    }
}

impl AuditLog for InMemoryStore {
    fn append(&self, entry: AuditEntry) -> Result<AuditEntry, RepositoryError> {
        let stored = self
            .audit
            .entry(entry.id)
            .or_insert_with(|| {
                let mut entry = entry;
                entry.sequence = self.audit_sequence.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                entry
            })
            .value()
            .clone();

        Ok(stored)
    }

    fn entries(&self) -> Result<Vec<AuditEntry>, RepositoryError> {
        let mut entries: Vec<AuditEntry> =
            self.audit.iter().map(|entry| entry.value().clone()).collect();
        entries.sort_by_key(|entry| entry.sequence);
        Ok(entries)
    }

    fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, RepositoryError> {
        let mut entries = self.entries()?;
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }
}

impl NotificationSink for InMemoryStore {
    fn notify(&self, notification: ProviderNotification) -> Result<(), RepositoryError> {
        self.notifications
            .entry(notification.id)
            .or_insert(notification);
        Ok(())
    }
}
