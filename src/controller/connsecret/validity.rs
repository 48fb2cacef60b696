//! # Validity Gate
//!
//! Decides whether a resolved pair may have a live secret. Expiration is
//! checked first, then scope; both are authoritative deletion triggers and
//! are evaluated before readiness.

use crate::controller::connsecret::pair::ResourcePair;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use kube::{Resource, ResourceExt};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Secret may be created or updated
    Valid,
    /// `deleteAfterDate` has passed
    Expired { deadline: DateTime<Utc> },
    /// The user's cluster scopes exclude this deployment
    OutOfScope { cluster: String },
    /// Not an error; the listed objects (`Kind/name`) are not ready yet
    NotReady { blocking: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidityError {
    #[error("user {user} has an invalid deleteAfterDate {value:?}")]
    InvalidExpiration { user: String, value: String },
}

/// Evaluate the gate for `pair` at `now`.
pub fn evaluate(pair: &ResourcePair, now: DateTime<Utc>) -> Result<Verdict, ValidityError> {
    if let Some(raw) = pair
        .user
        .spec
        .delete_after_date
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        let deadline =
            parse_delete_after_date(raw).ok_or_else(|| ValidityError::InvalidExpiration {
                user: pair.user.name_any(),
                value: raw.to_string(),
            })?;
        if now >= deadline {
            return Ok(Verdict::Expired { deadline });
        }
    }

    let cluster = pair.deployment.deployment_name();
    let mut scopes = pair.user.cluster_scopes().peekable();
    if scopes.peek().is_some() && !scopes.any(|s| s == cluster) {
        return Ok(Verdict::OutOfScope {
            cluster: cluster.to_string(),
        });
    }

    let mut blocking = Vec::new();
    if !pair.deployment.is_ready() {
        blocking.push(kind_name(&pair.deployment));
    }
    if !pair.user.is_ready() {
        blocking.push(kind_name(&pair.user));
    }
    if !blocking.is_empty() {
        return Ok(Verdict::NotReady { blocking });
    }

    Ok(Verdict::Valid)
}

/// Parse an ISO-8601 instant. Offsets are honoured; naive timestamps and bare
/// dates are read as UTC.
#[must_use]
pub fn parse_delete_after_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = raw.strip_suffix('Z').unwrap_or(raw);
    if let Ok(dt) = NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn kind_name<K: Resource<DynamicType = ()>>(obj: &K) -> String {
    format!("{}/{}", K::kind(&()), obj.name_any())
}
