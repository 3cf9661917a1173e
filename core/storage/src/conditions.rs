//! Conditional-request predicates.
//!
//! Every predicate is optional. Present predicates are combined with a
//! logical AND, and absent ones impose no constraint. Backends evaluate a
//! request against a [`ConditionTarget`] built from the blob's current
//! state, or against `None` when the blob does not exist.

use chrono::{DateTime, Utc};

use cask_common::{ETag, Error, LeaseId, Result};

use crate::provider::Tags;
use crate::tag_query::TagQuery;

/// Current state of a blob, as seen by precondition evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ConditionTarget<'a> {
    /// Current ETag.
    pub etag: &'a ETag,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Id of the lease currently held on the blob, if any.
    pub active_lease: Option<&'a LeaseId>,
    /// Current tag set.
    pub tags: &'a Tags,
}

/// Time- and ETag-based predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobConditions {
    /// Only proceed if the blob changed after this instant.
    pub if_modified_since: Option<DateTime<Utc>>,
    /// Only proceed if the blob has not changed after this instant.
    pub if_unmodified_since: Option<DateTime<Utc>>,
    /// Only proceed if the ETag matches (`*` matches any existing blob).
    pub if_match: Option<ETag>,
    /// Only proceed if the ETag does not match (`*` requires absence).
    pub if_none_match: Option<ETag>,
}

impl BlobConditions {
    /// Create an empty predicate set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_if_modified_since(mut self, at: DateTime<Utc>) -> Self {
        self.if_modified_since = Some(at);
        self
    }

    pub fn with_if_unmodified_since(mut self, at: DateTime<Utc>) -> Self {
        self.if_unmodified_since = Some(at);
        self
    }

    pub fn with_if_match(mut self, etag: ETag) -> Self {
        self.if_match = Some(etag);
        self
    }

    pub fn with_if_none_match(mut self, etag: ETag) -> Self {
        self.if_none_match = Some(etag);
        self
    }

    /// Whether no predicate is set.
    pub fn is_empty(&self) -> bool {
        self.if_modified_since.is_none()
            && self.if_unmodified_since.is_none()
            && self.if_match.is_none()
            && self.if_none_match.is_none()
    }

    /// Evaluate the predicates against a blob.
    ///
    /// Timestamps compare at whole-second granularity, as HTTP dates do.
    /// Against a missing blob only `if_match` can fail.
    ///
    /// # Errors
    /// - `PreconditionFailed` naming the first predicate that did not hold
    pub fn check(&self, target: Option<&ConditionTarget<'_>>) -> Result<()> {
        let Some(target) = target else {
            if let Some(expected) = &self.if_match {
                return Err(Error::PreconditionFailed(format!(
                    "If-Match {} against a missing blob",
                    expected
                )));
            }
            return Ok(());
        };

        if let Some(expected) = &self.if_match {
            if !expected.is_wildcard() && expected != target.etag {
                return Err(Error::PreconditionFailed(format!(
                    "If-Match {} does not match current ETag {}",
                    expected, target.etag
                )));
            }
        }

        if let Some(unexpected) = &self.if_none_match {
            if unexpected.is_wildcard() || unexpected == target.etag {
                return Err(Error::PreconditionFailed(format!(
                    "If-None-Match {} matches current ETag {}",
                    unexpected, target.etag
                )));
            }
        }

        let modified = target.last_modified.timestamp();

        if let Some(since) = self.if_modified_since {
            if modified <= since.timestamp() {
                return Err(Error::PreconditionFailed(format!(
                    "Blob not modified since {}",
                    since
                )));
            }
        }

        if let Some(since) = self.if_unmodified_since {
            if modified > since.timestamp() {
                return Err(Error::PreconditionFailed(format!(
                    "Blob modified since {}",
                    since
                )));
            }
        }

        Ok(())
    }
}

/// Request-scoped predicates: blob predicates plus lease and tag checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestConditions {
    /// Time- and ETag-based predicates.
    pub blob: BlobConditions,
    /// The operation must hold this lease.
    pub lease_id: Option<LeaseId>,
    /// Tag-query expression the blob's tags must satisfy.
    pub tags_condition: Option<String>,
}

impl RequestConditions {
    /// Create an empty predicate set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob_conditions(mut self, blob: BlobConditions) -> Self {
        self.blob = blob;
        self
    }

    pub fn with_if_match(mut self, etag: ETag) -> Self {
        self.blob.if_match = Some(etag);
        self
    }

    pub fn with_if_none_match(mut self, etag: ETag) -> Self {
        self.blob.if_none_match = Some(etag);
        self
    }

    pub fn with_lease_id(mut self, lease_id: LeaseId) -> Self {
        self.lease_id = Some(lease_id);
        self
    }

    pub fn with_tags_condition(mut self, expression: impl Into<String>) -> Self {
        self.tags_condition = Some(expression.into());
        self
    }

    /// Evaluate all present predicates against a blob.
    ///
    /// # Errors
    /// - `InvalidInput` if the tag expression does not parse
    /// - `PreconditionFailed` if any predicate does not hold
    pub fn check(&self, target: Option<&ConditionTarget<'_>>) -> Result<()> {
        let query = self
            .tags_condition
            .as_deref()
            .map(TagQuery::parse)
            .transpose()?;

        self.blob.check(target)?;

        if let Some(lease_id) = &self.lease_id {
            let held = target.and_then(|t| t.active_lease);
            if held != Some(lease_id) {
                return Err(Error::PreconditionFailed(format!(
                    "Lease {} is not the active lease on the blob",
                    lease_id
                )));
            }
        }

        if let Some(query) = query {
            let satisfied = target.map(|t| query.matches(t.tags)).unwrap_or(false);
            if !satisfied {
                return Err(Error::PreconditionFailed(format!(
                    "Blob tags do not satisfy {}",
                    query
                )));
            }
        }

        Ok(())
    }

    /// Evaluate optional conditions for a mutating request.
    ///
    /// In addition to [`check`](Self::check), a blob with an active lease
    /// may only be written by a request that names that lease.
    pub fn check_write(
        conditions: Option<&RequestConditions>,
        target: Option<&ConditionTarget<'_>>,
    ) -> Result<()> {
        if let Some(conditions) = conditions {
            conditions.check(target)?;
        }

        if let Some(active) = target.and_then(|t| t.active_lease) {
            let presented = conditions.and_then(|c| c.lease_id.as_ref());
            if presented != Some(active) {
                return Err(Error::PreconditionFailed(
                    "Blob has an active lease and no matching lease id was given".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl From<BlobConditions> for RequestConditions {
    fn from(blob: BlobConditions) -> Self {
        Self {
            blob,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn target<'a>(
        etag: &'a ETag,
        tags: &'a Tags,
        lease: Option<&'a LeaseId>,
    ) -> ConditionTarget<'a> {
        ConditionTarget {
            etag,
            last_modified: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            active_lease: lease,
            tags,
        }
    }

    #[test]
    fn test_empty_conditions_always_pass() {
        let etag = ETag::generate();
        let tags = Tags::new();
        assert!(BlobConditions::new().is_empty());
        assert!(RequestConditions::new().check(Some(&target(&etag, &tags, None))).is_ok());
        assert!(RequestConditions::new().check(None).is_ok());
    }

    #[test]
    fn test_if_match() {
        let etag = ETag::new("v1");
        let tags = Tags::new();
        let t = target(&etag, &tags, None);

        assert!(BlobConditions::new().with_if_match(ETag::new("v1")).check(Some(&t)).is_ok());
        assert!(BlobConditions::new().with_if_match(ETag::any()).check(Some(&t)).is_ok());
        let err = BlobConditions::new()
            .with_if_match(ETag::new("v0"))
            .check(Some(&t))
            .unwrap_err();
        assert!(err.is_precondition());
        assert!(BlobConditions::new().with_if_match(ETag::any()).check(None).is_err());
    }

    #[test]
    fn test_if_none_match() {
        let etag = ETag::new("v1");
        let tags = Tags::new();
        let t = target(&etag, &tags, None);

        assert!(BlobConditions::new().with_if_none_match(ETag::new("v0")).check(Some(&t)).is_ok());
        assert!(BlobConditions::new().with_if_none_match(ETag::new("v1")).check(Some(&t)).is_err());
        assert!(BlobConditions::new().with_if_none_match(ETag::any()).check(Some(&t)).is_err());
        assert!(BlobConditions::new().with_if_none_match(ETag::any()).check(None).is_ok());
    }

    #[test]
    fn test_time_predicates() {
        let etag = ETag::new("v1");
        let tags = Tags::new();
        let t = target(&etag, &tags, None);
        let modified = t.last_modified;

        let before = modified - Duration::hours(1);
        let after = modified + Duration::hours(1);

        assert!(BlobConditions::new().with_if_modified_since(before).check(Some(&t)).is_ok());
        assert!(BlobConditions::new().with_if_modified_since(after).check(Some(&t)).is_err());
        // Equal timestamps count as not modified.
        assert!(BlobConditions::new().with_if_modified_since(modified).check(Some(&t)).is_err());

        assert!(BlobConditions::new().with_if_unmodified_since(after).check(Some(&t)).is_ok());
        assert!(BlobConditions::new().with_if_unmodified_since(modified).check(Some(&t)).is_ok());
        assert!(BlobConditions::new().with_if_unmodified_since(before).check(Some(&t)).is_err());
    }

    #[test]
    fn test_lease_predicate() {
        let etag = ETag::new("v1");
        let tags = Tags::new();
        let lease = LeaseId::new("lease-1");

        let cond = RequestConditions::new().with_lease_id(lease.clone());
        assert!(cond.check(Some(&target(&etag, &tags, Some(&lease)))).is_ok());
        assert!(cond.check(Some(&target(&etag, &tags, None))).is_err());

        let other = LeaseId::new("lease-2");
        assert!(cond.check(Some(&target(&etag, &tags, Some(&other)))).is_err());
    }

    #[test]
    fn test_write_requires_active_lease_id() {
        let etag = ETag::new("v1");
        let tags = Tags::new();
        let lease = LeaseId::new("lease-1");
        let t = target(&etag, &tags, Some(&lease));

        assert!(RequestConditions::check_write(None, Some(&t)).is_err());
        let with_lease = RequestConditions::new().with_lease_id(lease.clone());
        assert!(RequestConditions::check_write(Some(&with_lease), Some(&t)).is_ok());

        // Unleased blobs accept writes without conditions.
        assert!(RequestConditions::check_write(None, Some(&target(&etag, &tags, None))).is_ok());
        assert!(RequestConditions::check_write(None, None).is_ok());
    }

    #[test]
    fn test_tags_condition() {
        let etag = ETag::new("v1");
        let tags: Tags = [("env".to_string(), "prod".to_string())].into_iter().collect();
        let t = target(&etag, &tags, None);

        let ok = RequestConditions::new().with_tags_condition("\"env\" = 'prod'");
        assert!(ok.check(Some(&t)).is_ok());

        let fail = RequestConditions::new().with_tags_condition("\"env\" = 'dev'");
        assert!(fail.check(Some(&t)).unwrap_err().is_precondition());

        let malformed = RequestConditions::new().with_tags_condition("env ==");
        assert!(matches!(malformed.check(Some(&t)), Err(Error::InvalidInput(_))));
    }
}
