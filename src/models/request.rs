use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::RepositoryError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Urgent,
    Normal,
    Low,
}

impl Urgency {
    /// Label shown on the back-office mission board.
    pub fn label(&self) -> &'static str {
        match self {
            Urgency::Urgent => "Haute",
            Urgency::Normal => "Normale",
            Urgency::Low => "Basse",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    New,
    Unmatched,
    Assigned,
    Confirmed,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, RequestStatus::New | RequestStatus::Unmatched)
    }

    /// Statuses in which the request must reference an assigned provider.
    pub fn holds_provider(&self) -> bool {
        matches!(
            self,
            RequestStatus::Assigned | RequestStatus::Confirmed | RequestStatus::Completed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub service_type: String,
    pub location: String,
    pub urgency: Urgency,
    pub status: RequestStatus,
    pub assigned_provider: Option<Uuid>,
    pub client_email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl ServiceRequest {
    pub fn new(
        service_type: String,
        location: String,
        urgency: Urgency,
        client_email: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_type,
            location,
            urgency,
            status: RequestStatus::New,
            assigned_provider: None,
            client_email,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    pub fn assign(&mut self, provider_id: Uuid, now: DateTime<Utc>) {
        self.assigned_provider = Some(provider_id);
        self.status = RequestStatus::Assigned;
        self.touch(now);
    }

    /// Lifecycle changes made by the booking subsystem. `assigned` is reachable only via [`assign`].
    ///
    /// [`assign`]: ServiceRequest::assign
    pub fn transition(
        &mut self,
        status: RequestStatus,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        match status {
            RequestStatus::Assigned => {
                return Err(RepositoryError::Invariant(
                    "requests are assigned through the assignment executor".to_string(),
                ));
            }
            RequestStatus::Confirmed | RequestStatus::Completed
                if self.assigned_provider.is_none() =>
            {
                return Err(RepositoryError::Invariant(format!(
                    "request {} has no assigned provider",
                    self.id
                )));
            }
            RequestStatus::New | RequestStatus::Unmatched | RequestStatus::Cancelled => {
                self.assigned_provider = None;
            }
            RequestStatus::Confirmed | RequestStatus::Completed => {}
        }

        self.status = status;
        self.touch(now);
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{RequestStatus, ServiceRequest, Urgency};

    fn request() -> ServiceRequest {
        ServiceRequest::new(
            "plumbing".to_string(),
            "Paris 15e".to_string(),
            Urgency::Urgent,
            "client@example.com".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn assign_sets_provider_status_and_bumps_version() {
        let mut req = request();
        let provider = Uuid::new_v4();

        req.assign(provider, Utc::now());

        assert_eq!(req.status, RequestStatus::Assigned);
        assert_eq!(req.assigned_provider, Some(provider));
        assert_eq!(req.version, 2);
    }

    #[test]
    fn confirming_without_provider_is_rejected() {
        let mut req = request();
        assert!(req.transition(RequestStatus::Confirmed, Utc::now()).is_err());
        assert_eq!(req.status, RequestStatus::New);
        assert_eq!(req.version, 1);
    }

    #[test]
    fn cancelling_clears_the_provider() {
        let mut req = request();
        req.assign(Uuid::new_v4(), Utc::now());

        req.transition(RequestStatus::Cancelled, Utc::now()).unwrap();

        assert_eq!(req.status, RequestStatus::Cancelled);
        assert!(req.assigned_provider.is_none());
    }

    #[test]
    fn assigned_status_cannot_be_set_directly() {
        let mut req = request();
        assert!(req.transition(RequestStatus::Assigned, Utc::now()).is_err());
    }

    #[test]
    fn urgency_labels() {
        assert_eq!(Urgency::Urgent.label(), "Haute");
        assert_eq!(Urgency::Normal.label(), "Normale");
        assert_eq!(Urgency::Low.label(), "Basse");
    }
}
