//! Progress state machine shared by Backup and Restore

use std::fmt;

use chrono::{DateTime, Utc};
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Value of `status.progress`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum Progress {
    /// Dependent resource submitted, waiting for it to become ready
    Creating,
    /// Dependent resource is ready
    Created,
    /// Reconciliation gave up; see `status.message`
    Failed,
}

impl Progress {
    pub fn as_str(&self) -> &'static str {
        match self {
            Progress::Creating => "Creating",
            Progress::Created => "Created",
            Progress::Failed => "Failed",
        }
    }

    /// No further transitions are possible from a terminal value
    pub fn is_terminal(&self) -> bool {
        matches!(self, Progress::Created | Progress::Failed)
    }

    fn rank(progress: Option<Progress>) -> u8 {
        match progress {
            None => 0,
            Some(Progress::Creating) => 1,
            Some(Progress::Created) | Some(Progress::Failed) => 2,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `current -> next` moves strictly forward
pub fn can_advance(current: Option<Progress>, next: Progress) -> bool {
    Progress::rank(current) < Progress::rank(Some(next))
}

/// Status sub-resource for Backup and Restore
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStatus {
    /// Creating, Created or Failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,

    /// Human-readable reason, set when progress is Failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// When progress last changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// A namespaced custom resource whose status carries a [`Progress`]
pub trait ProgressResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn status(&self) -> Option<&ProgressStatus>;

    fn status_mut(&mut self) -> &mut Option<ProgressStatus>;

    fn progress(&self) -> Option<Progress> {
        self.status().and_then(|s| s.progress)
    }

    /// Overwrite progress and message, stamping the transition time
    fn set_progress(&mut self, progress: Progress, message: Option<String>) {
        let status = self.status_mut().get_or_insert_with(ProgressStatus::default);
        status.progress = Some(progress);
        status.message = message;
        status.last_transition_time = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_only_moves_forward() {
        assert!(can_advance(None, Progress::Creating));
        assert!(can_advance(None, Progress::Failed));
        assert!(can_advance(Some(Progress::Creating), Progress::Created));
        assert!(can_advance(Some(Progress::Creating), Progress::Failed));

        assert!(!can_advance(Some(Progress::Creating), Progress::Creating));
        assert!(!can_advance(Some(Progress::Created), Progress::Creating));
        assert!(!can_advance(Some(Progress::Created), Progress::Failed));
        assert!(!can_advance(Some(Progress::Failed), Progress::Created));
    }

    #[test]
    fn progress_serializes_as_plain_strings() {
        let status = ProgressStatus {
            progress: Some(Progress::Creating),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value, serde_json::json!({ "progress": "Creating" }));
    }
}
