//! Job domain types for the persisted lifecycle record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// On-disk shape written by the current build. Older shapes are migrated on load.
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

const MAX_ID_LEN: usize = 128;

/// Error returned when an identifier is not usable as a storage key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identifier {value:?}: {reason}")]
pub struct InvalidId {
    pub value: String,
    pub reason: &'static str,
}

/// Validate an identifier segment used in file names.
///
/// Accepted: 1..=128 characters from `[A-Za-z0-9_.-]`, not starting with `.`.
pub fn validate_id(value: &str) -> Result<(), InvalidId> {
    let invalid = |reason| InvalidId {
        value: value.to_string(),
        reason,
    };

    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.len() > MAX_ID_LEN {
        return Err(invalid("longer than 128 characters"));
    }
    if value.starts_with('.') {
        return Err(invalid("must not start with '.'"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(invalid("allowed characters are A-Z a-z 0-9 _ - ."));
    }
    Ok(())
}

/// Tenant that owns a job. Job ids are namespaced by tenant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parse a tenant ID from a string.
    pub fn parse(s: impl Into<String>) -> Result<Self, InvalidId> {
        let s = s.into();
        validate_id(&s)?;
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TenantId {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier for a job within its tenant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Create a new unique job ID, using ULID for chronological sorting.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: impl Into<String>) -> Result<Self, InvalidId> {
        let s = s.into();
        validate_id(&s)?;
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobId {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full identity of a job: the tenant plus the tenant-scoped job id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub tenant_id: TenantId,
    pub job_id: JobId,
}

impl JobKey {
    pub fn new(tenant_id: TenantId, job_id: JobId) -> Self {
        Self { tenant_id, job_id }
    }

    /// Parse both halves of a key.
    pub fn parse(tenant_id: &str, job_id: &str) -> Result<Self, InvalidId> {
        Ok(Self {
            tenant_id: TenantId::parse(tenant_id)?,
            job_id: JobId::parse(job_id)?,
        })
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.job_id)
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job was submitted, no draft yet.
    #[default]
    Created,
    /// A draft has been generated and awaits confirmation.
    DraftReady,
    /// The client confirmed the draft.
    Confirmed,
    /// Handed to the dispatch queue.
    Queued,
    /// A worker is executing the job.
    Running,
    /// Job completed successfully.
    Succeeded,
    /// Job failed after exhausting its attempts.
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Created,
        JobStatus::DraftReady,
        JobStatus::Confirmed,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::DraftReady => "DRAFT_READY",
            JobStatus::Confirmed => "CONFIRMED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single execution attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded {
        summary: String,
    },
    Failed {
        error: String,
    },
}

/// One execution attempt, appended to the record's run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRun {
    pub attempt: u32,
    pub worker_id: String,
    pub claim_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

/// Entry in a job's artifact index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    /// Location relative to the artifact root; the bytes are not managed here.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// The persisted state of one job.
///
/// `version` is the optimistic-concurrency token: the store increments it by
/// exactly one on every successful save and rejects saves presenting a stale one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub schema_version: u32,
    pub job_id: JobId,
    pub tenant_id: TenantId,
    /// Type of job (used for routing to handlers).
    pub job_type: String,
    pub status: JobStatus,
    pub version: u64,
    /// Correlation id carried into logs and audit events.
    pub trace_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub draft: Option<serde_json::Value>,
    #[serde(default)]
    pub plan: Option<serde_json::Value>,
    /// Execution attempts since the job was last queued.
    #[serde(default)]
    pub attempts: u32,
    pub runs: Vec<JobRun>,
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl JobRecord {
    /// Build a fresh record in `CREATED`. The store stamps `version` on create.
    pub fn new(key: JobKey, job_type: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            job_id: key.job_id,
            tenant_id: key.tenant_id,
            job_type: job_type.into(),
            status: JobStatus::Created,
            version: 0,
            trace_id: Ulid::new().to_string(),
            created_at: now,
            updated_at: now,
            draft: None,
            plan: None,
            attempts: 0,
            runs: Vec::new(),
            artifacts: Vec::new(),
            last_error: None,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(self.tenant_id.clone(), self.job_id.clone())
    }

    /// Most recent run, if any.
    pub fn last_run(&self) -> Option<&JobRun> {
        self.runs.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_reject_path_like_values() {
        assert!(JobId::parse("job_42").is_ok());
        assert!(JobId::parse("01HZX3.v2-a").is_ok());
        assert!(JobId::parse("").is_err());
        assert!(JobId::parse("../etc").is_err());
        assert!(JobId::parse(".hidden").is_err());
        assert!(JobId::parse("a/b").is_err());
        assert!(TenantId::parse("acme~corp").is_err());
        assert!(TenantId::parse("x".repeat(129)).is_err());
    }

    #[test]
    fn status_serializes_upper_snake() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&JobStatus::DraftReady)?, "\"DRAFT_READY\"");
        let parsed: JobStatus = serde_json::from_str("\"SUCCEEDED\"")?;
        assert_eq!(parsed, JobStatus::Succeeded);
        Ok(())
    }

    #[test]
    fn invalid_id_fails_deserialization() {
        let parsed: Result<JobId, _> = serde_json::from_str("\"bad/id\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn run_outcome_is_flattened() -> Result<(), serde_json::Error> {
        let now = Utc::now();
        let run = JobRun {
            attempt: 1,
            worker_id: "w1".into(),
            claim_id: "c1".into(),
            started_at: now,
            finished_at: now,
            outcome: RunOutcome::Failed {
                error: "boom".into(),
            },
        };
        let value = serde_json::to_value(&run)?;
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["error"], "boom");
        Ok(())
    }
}
