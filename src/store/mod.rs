//! Storage seams of the engine.
//!
//! Requests, providers and bookings live in a shared data store that other
//! subsystems write to as well. The engine only reaches it through these traits
//! so the in-memory tables can be swapped for a real database client.

pub mod memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::audit::AuditEntry;
use crate::models::booking::{Booking, BookingStatus};
use crate::models::outbox::{OutboxEvent, ProviderNotification};
use crate::models::provider::Provider;
use crate::models::request::{RequestStatus, ServiceRequest};

pub use memory::InMemoryStore;

#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("{0}")]
    NotFound(String),

    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("{0}")]
    Invariant(String),

    #[error("{0}")]
    Unavailable(String),
}

/// Authoritative part of a manual assignment.
#[derive(Debug, Clone)]
pub struct AssignmentCommit {
    pub mission_id: Uuid,
    pub provider_id: Uuid,
    pub expected_version: u64,
    pub actor_id: String,
    pub now: DateTime<Utc>,
}

pub trait MissionRepository: Send + Sync {
    fn insert_request(&self, request: ServiceRequest) -> Result<ServiceRequest, RepositoryError>;
    fn fetch_request(&self, id: Uuid) -> Result<Option<ServiceRequest>, RepositoryError>;
    fn transition_request(
        &self,
        id: Uuid,
        status: RequestStatus,
        now: DateTime<Utc>,
    ) -> Result<ServiceRequest, RepositoryError>;
    /// Requests in `new` or `unmatched`, oldest first.
    fn pending_requests(&self, limit: usize) -> Result<Vec<ServiceRequest>, RepositoryError>;
    fn count_pending(&self) -> Result<u64, RepositoryError>;
    fn count_assigned_since(&self, since: DateTime<Utc>) -> Result<u64, RepositoryError>;
    fn count_requests(&self) -> Result<u64, RepositoryError>;

    /// Updates the request and records its outbox event as one unit.
    fn commit_assignment(
        &self,
        commit: AssignmentCommit,
    ) -> Result<(ServiceRequest, OutboxEvent), RepositoryError>;
    /// Undelivered, live outbox events whose next attempt is due at `now`,
    /// earliest due first.
    fn due_events(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, RepositoryError>;
    fn mark_dispatched(&self, event_id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError>;
    /// Records a failed attempt. `retry_at` schedules the next one; `None`
    /// dead-letters the event.
    fn record_attempt_failure(
        &self,
        event_id: Uuid,
        error: String,
        failed_at: DateTime<Utc>,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError>;
    /// Events still awaiting delivery, dead letters excluded.
    fn count_undispatched(&self) -> Result<u64, RepositoryError>;
    fn count_dead_lettered(&self) -> Result<u64, RepositoryError>;
}

pub trait ProviderDirectory: Send + Sync {
    fn insert_provider(&self, provider: Provider) -> Result<Provider, RepositoryError>;
    fn fetch_provider(&self, id: Uuid) -> Result<Option<Provider>, RepositoryError>;
    fn list_providers(&self) -> Result<Vec<Provider>, RepositoryError>;
    /// Active, verified providers ordered by raw rating (unrated last).
    fn top_rated_eligible(&self, limit: usize) -> Result<Vec<Provider>, RepositoryError>;
    fn count_eligible(&self) -> Result<u64, RepositoryError>;
}

pub trait BookingLedger: Send + Sync {
    fn insert_booking(&self, booking: Booking) -> Result<Booking, RepositoryError>;
    fn update_booking_status(
        &self,
        id: Uuid,
        status: BookingStatus,
        now: DateTime<Utc>,
    ) -> Result<Booking, RepositoryError>;
    fn count_created_since(&self, since: DateTime<Utc>) -> Result<u64, RepositoryError>;
    fn count_completed_created_since(&self, since: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

pub trait AuditLog: Send + Sync {
    /// Appending an entry whose id is already present returns the stored entry.
    fn append(&self, entry: AuditEntry) -> Result<AuditEntry, RepositoryError>;
    /// Every entry in append order.
    fn entries(&self) -> Result<Vec<AuditEntry>, RepositoryError>;
    /// Newest first.
    fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, RepositoryError>;
}

pub trait NotificationSink: Send + Sync {
    /// Delivering a notification id twice stores it once.
    fn notify(&self, notification: ProviderNotification) -> Result<(), RepositoryError>;
}

#[derive(Clone)]
pub struct Backend {
    pub missions: Arc<dyn MissionRepository>,
    pub providers: Arc<dyn ProviderDirectory>,
    pub bookings: Arc<dyn BookingLedger>,
    pub audit: Arc<dyn AuditLog>,
    pub notifications: Arc<dyn NotificationSink>,
}

impl Backend {
    pub fn from_store(store: Arc<InMemoryStore>) -> Self {
        Self {
            missions: store.clone(),
            providers: store.clone(),
            bookings: store.clone(),
            audit: store.clone(),
            notifications: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(InMemoryStore::new()))
    }
}
