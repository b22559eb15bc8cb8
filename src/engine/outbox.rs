use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::assignment::AssignmentEvent;
use crate::models::audit::{AuditAction, AuditEntry};
use crate::models::outbox::{MissionAssigned, OutboxEvent, OutboxPayload, ProviderNotification};
use crate::state::AppState;

/// Most events attempted per sweep.
pub const SWEEP_BATCH: usize = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    /// Failed events that will not be retried; included in `failed`.
    pub dead_lettered: usize,
}

/// Delivers outbox events when woken by a commit and on every retry tick.
pub async fn run_outbox_dispatcher(
    state: Arc<AppState>,
    mut wake_rx: mpsc::Receiver<Uuid>,
    retry_every: Duration,
) {
    info!("outbox dispatcher started");

    let mut retry = interval(retry_every);
    retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            woke = wake_rx.recv() => {
                if woke.is_none() {
                    break;
                }
            }
            _ = retry.tick() => {}
        }

        let report = dispatch_pending(&state);
        if report.delivered > 0 || report.failed > 0 {
            debug!(
                delivered = report.delivered,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                "outbox sweep finished"
            );
        }
    }

    warn!("outbox dispatcher stopped: wake channel closed");
}

/// Attempts every event that is due now.
pub fn dispatch_pending(state: &AppState) -> DispatchReport {
    dispatch_due(state, Utc::now())
}

/// Attempts up to one batch of events due at `now`, earliest due first. A failed
/// event is rescheduled with exponential backoff, so it stops occupying the head
/// of the queue, and is dead-lettered once its attempt budget is spent.
pub fn dispatch_due(state: &AppState, now: DateTime<Utc>) -> DispatchReport {
    let mut report = DispatchReport::default();
    let policy = &state.outbox_policy;

    let events = match state.backend.missions.due_events(now, SWEEP_BATCH) {
        Ok(events) => events,
        Err(err) => {
            warn!(error = %err, "outbox unavailable; skipping sweep");
            return report;
        }
    };

    for event in events {
        let reason = match deliver(state, &event, now) {
            Ok(()) => {
                report.delivered += 1;
                continue;
            }
            Err(reason) => reason,
        };

        report.failed += 1;
        let failed_attempts = event.attempts.saturating_add(1);
        let retry_at = (failed_attempts < policy.max_attempts)
            .then(|| now + policy.backoff(failed_attempts));

        if retry_at.is_none() {
            report.dead_lettered += 1;
            state.metrics.outbox_dead_lettered_total.inc();
            error!(
                event_id = %event.id,
                attempts = failed_attempts,
                last_error = %reason,
                "outbox event dead-lettered"
            );
        }

        if let Err(err) = state
            .backend
            .missions
            .record_attempt_failure(event.id, reason, now, retry_at)
        {
            warn!(event_id = %event.id, error = %err, "failed to record outbox attempt");
        }
    }

    if let Ok(pending) = state.backend.missions.count_undispatched() {
        state.metrics.outbox_pending.set(pending as i64);
    }

    report
}

fn deliver(state: &AppState, event: &OutboxEvent, now: DateTime<Utc>) -> Result<(), String> {
    match &event.payload {
        OutboxPayload::MissionAssigned(assigned) => {
            deliver_assignment(state, event, assigned, now)
        }
    }
}

fn deliver_assignment(
    state: &AppState,
    event: &OutboxEvent,
    assigned: &MissionAssigned,
    now: DateTime<Utc>,
) -> Result<(), String> {
    let mut failures = Vec::new();

    let notification = ProviderNotification {
        id: event.id,
        provider_id: assigned.provider_id,
        mission_id: assigned.mission_id,
        kind: "mission_assigned".to_string(),
        title: "New mission assigned".to_string(),
        message: format!(
            "You have been assigned a {} mission in {}",
            assigned.service_type, assigned.location
        ),
        read: false,
        created_at: event.created_at,
    };

    if let Err(err) = state.backend.notifications.notify(notification) {
        warn!(event_id = %event.id, provider_id = %assigned.provider_id, error = %err, "provider notification failed");
        state
            .metrics
            .outbox_delivery_failures_total
            .with_label_values(&["notification"])
            .inc();
        failures.push(format!("notification: {err}"));
    }

    let entry = AuditEntry::new(
        event.id,
        assigned.actor_id.clone(),
        "service_request",
        assigned.mission_id.to_string(),
        AuditAction::ManualAssignment,
        json!(assigned.previous_provider),
        json!(assigned.provider_id),
        format!(
            "Mission {} assigned to provider {}",
            assigned.mission_id, assigned.provider_id
        ),
        event.created_at,
    );

    if let Err(err) = state.backend.audit.append(entry) {
        warn!(event_id = %event.id, mission_id = %assigned.mission_id, error = %err, "audit append failed");
        state
            .metrics
            .outbox_delivery_failures_total
            .with_label_values(&["audit"])
            .inc();
        failures.push(format!("audit: {err}"));
    }

    if !failures.is_empty() {
        return Err(failures.join("; "));
    }

    state
        .backend
        .missions
        .mark_dispatched(event.id, now)
        .map_err(|err| format!("mark dispatched: {err}"))?;

    let _ = state.assignment_events_tx.send(AssignmentEvent {
        event_id: event.id,
        mission_id: assigned.mission_id,
        provider_id: assigned.provider_id,
        actor_id: assigned.actor_id.clone(),
        version: assigned.version,
        assigned_at: event.created_at,
    });

    Ok(())
}
