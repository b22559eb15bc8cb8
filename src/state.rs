use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::config::{require_positive, EngineLimits, OutboxPolicy};
use crate::engine::settings::AssignmentSettings;
use crate::error::AppError;
use crate::geo::{LocationMatcher, TextLocationMatcher};
use crate::models::assignment::AssignmentEvent;
use crate::observability::metrics::Metrics;
use crate::store::Backend;

pub struct AppState {
    pub backend: Backend,
    pub authenticator: Arc<dyn Authenticator>,
    pub matcher: Arc<dyn LocationMatcher>,
    pub settings: RwLock<AssignmentSettings>,
    pub limits: EngineLimits,
    pub outbox_policy: OutboxPolicy,
    pub outbox_tx: mpsc::Sender<Uuid>,
    pub assignment_events_tx: broadcast::Sender<AssignmentEvent>,
    pub metrics: Metrics,
}

impl AppState {
    /// Builds the state and replays the audit log into the settings projection.
    /// The receiver wakes the outbox dispatcher after each committed assignment.
    pub fn new(
        backend: Backend,
        authenticator: Arc<dyn Authenticator>,
        limits: EngineLimits,
        outbox_queue_size: usize,
        event_buffer_size: usize,
    ) -> Result<(Self, mpsc::Receiver<Uuid>), AppError> {
        require_positive("OUTBOX_QUEUE_SIZE", outbox_queue_size)?;
        require_positive("EVENT_BUFFER_SIZE", event_buffer_size)?;
        limits.validate()?;

        let (outbox_tx, outbox_rx) = mpsc::channel(outbox_queue_size);
        let (assignment_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        let history = backend.audit.entries()?;
        let settings = AssignmentSettings::replay(&history);

        Ok((
            Self {
                backend,
                authenticator,
                matcher: Arc::new(TextLocationMatcher),
                settings: RwLock::new(settings),
                limits,
                outbox_policy: OutboxPolicy::default(),
                outbox_tx,
                assignment_events_tx,
                metrics: Metrics::new(),
            },
            outbox_rx,
        ))
    }

    pub fn with_outbox_policy(mut self, policy: OutboxPolicy) -> Self {
        self.outbox_policy = policy;
        self
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn LocationMatcher>) -> Self {
        self.matcher = matcher;
        self
    }
}
