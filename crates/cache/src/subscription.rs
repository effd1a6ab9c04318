//! Subscription model as pushed by the sync collaborator.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ApiId, ApplicationId, PlanId, SubscriptionId};

/// Lifecycle status of a subscription.
///
/// Only [`SubscriptionStatus::Accepted`] subscriptions are indexed. Statuses
/// this crate does not know about are kept verbatim in
/// [`SubscriptionStatus::Unknown`] and treated as not accepted, so a newer
/// control plane can never make the sync path fail.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionStatus {
    /// The subscription authorizes traffic.
    Accepted,
    /// Awaiting validation by the API publisher.
    Pending,
    /// Refused by the API publisher.
    Rejected,
    /// Terminated.
    Closed,
    /// Temporarily suspended.
    Paused,
    /// A status this crate does not recognise.
    Unknown(String),
}

impl SubscriptionStatus {
    /// Returns the upper-case wire name of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Accepted => "ACCEPTED",
            Self::Pending => "PENDING",
            Self::Rejected => "REJECTED",
            Self::Closed => "CLOSED",
            Self::Paused => "PAUSED",
            Self::Unknown(raw) => raw,
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "ACCEPTED" => Self::Accepted,
            "PENDING" => Self::Pending,
            "REJECTED" => Self::Rejected,
            "CLOSED" => Self::Closed,
            "PAUSED" => Self::Paused,
            _ => Self::Unknown(s.to_owned()),
        })
    }
}

impl From<String> for SubscriptionStatus {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(status) => status,
            Err(never) => match never {},
        }
    }
}

impl From<SubscriptionStatus> for String {
    fn from(status: SubscriptionStatus) -> Self {
        status.as_str().to_owned()
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client's right to call an API under a plan.
///
/// A subscription may be bound to an OAuth client identifier, to a TLS
/// client certificate, or to neither (API-key plans reach it through the
/// key's `subscription` field instead). Empty credential strings are
/// treated as absent.
///
/// # Example
///
/// ```
/// use gateway_common_cache::{Subscription, SubscriptionStatus};
///
/// let sub = Subscription::builder()
///     .id("sub-1")
///     .api("api-1")
///     .plan("plan-1")
///     .client_id("client-A")
///     .status(SubscriptionStatus::Accepted)
///     .build();
///
/// assert!(sub.is_accepted());
/// assert_eq!(sub.credential_client_id(), Some("client-A"));
/// assert_eq!(sub.credential_certificate(), None);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Subscription {
    /// Subscription identifier.
    #[builder(into)]
    pub id: SubscriptionId,

    /// The API this subscription grants access to.
    #[builder(into)]
    pub api: ApiId,

    /// The plan the subscription is scoped to.
    #[builder(into)]
    pub plan: Option<PlanId>,

    /// The subscribing application.
    #[builder(into)]
    pub application: Option<ApplicationId>,

    /// Current lifecycle status.
    pub status: SubscriptionStatus,

    /// OAuth client identifier bound to the subscription.
    #[builder(into)]
    pub client_id: Option<String>,

    /// Client certificate bound to the subscription (PEM or fingerprint).
    #[builder(into)]
    pub client_certificate: Option<String>,

    /// Organization owning the API.
    #[builder(into)]
    pub organization_id: Option<String>,

    /// Environment the API is deployed in.
    #[builder(into)]
    pub environment_id: Option<String>,

    /// Last modification time reported by the control plane.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Returns `true` if the subscription currently authorizes traffic.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.status == SubscriptionStatus::Accepted
    }

    /// The client identifier, if one is bound and non-empty.
    #[must_use]
    pub fn credential_client_id(&self) -> Option<&str> {
        self.client_id.as_deref().filter(|c| !c.is_empty())
    }

    /// The client certificate, if one is bound and non-empty.
    #[must_use]
    pub fn credential_certificate(&self) -> Option<&str> {
        self.client_certificate.as_deref().filter(|c| !c.is_empty())
    }

    /// The plan identifier as a string slice.
    #[must_use]
    pub fn plan_str(&self) -> Option<&str> {
        self.plan.as_ref().map(PlanId::as_str)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parses_case_insensitively() {
        assert_eq!("accepted".parse::<SubscriptionStatus>().unwrap(), SubscriptionStatus::Accepted);
        assert_eq!("CLOSED".parse::<SubscriptionStatus>().unwrap(), SubscriptionStatus::Closed);
    }

    #[test]
    fn test_unknown_status_is_preserved_and_not_accepted() {
        let status: SubscriptionStatus = serde_json::from_str("\"RESUMED\"").unwrap();
        assert_eq!(status, SubscriptionStatus::Unknown("RESUMED".into()));
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"RESUMED\"");

        let sub = Subscription::builder().id("sub-1").api("api-1").status(status).build();
        assert!(!sub.is_accepted());
    }

    #[test]
    fn test_empty_credentials_are_absent() {
        let sub = Subscription::builder()
            .id("sub-1")
            .api("api-1")
            .status(SubscriptionStatus::Accepted)
            .client_id("")
            .client_certificate("")
            .build();
        assert_eq!(sub.credential_client_id(), None);
        assert_eq!(sub.credential_certificate(), None);
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let json = r#"{"id":"sub-1","api":"api-1","status":"ACCEPTED","bogus":true}"#;
        assert!(serde_json::from_str::<Subscription>(json).is_err());
    }

    #[test]
    fn test_deserialize_camel_case() {
        let json = r#"{"id":"sub-1","api":"api-1","plan":"p","status":"ACCEPTED","clientId":"c"}"#;
        let sub: Subscription = serde_json::from_str(json).unwrap();
        assert_eq!(sub.plan_str(), Some("p"));
        assert_eq!(sub.credential_client_id(), Some("c"));
        assert!(sub.is_accepted());
    }
}
