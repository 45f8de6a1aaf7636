use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical lifecycle status shared by batch and fine-tuning jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Expired,
    Cancelling,
    Cancelled,
}

impl JobStatus {
    /// Map an AWS PascalCase job status onto the canonical enum.
    ///
    /// AWS reports `Submitted`/`Validating`/`Scheduled`/`InProgress`/
    /// `PartiallyCompleted`/`Completed`/`Failed`/`Expired`/`Stopping`/
    /// `Stopped` for invocation jobs and a subset for customization jobs.
    pub fn from_aws(status: &str) -> Self {
        match status {
            "Submitted" | "Validating" | "Scheduled" | "Pending" => JobStatus::Validating,
            "InProgress" => JobStatus::InProgress,
            "PartiallyCompleted" | "Completed" => JobStatus::Completed,
            "Failed" => JobStatus::Failed,
            "Expired" => JobStatus::Expired,
            "Stopping" => JobStatus::Cancelling,
            "Stopped" => JobStatus::Cancelled,
            other => match pascal_to_snake(other).as_str() {
                "validating" => JobStatus::Validating,
                "in_progress" => JobStatus::InProgress,
                "finalizing" => JobStatus::Finalizing,
                "completed" => JobStatus::Completed,
                "expired" => JobStatus::Expired,
                "cancelling" => JobStatus::Cancelling,
                "cancelled" => JobStatus::Cancelled,
                _ => JobStatus::Failed,
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Expired | JobStatus::Cancelled
        )
    }
}

/// Convert a PascalCase identifier to snake_case.
pub fn pascal_to_snake(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Canonical batch job record (OpenAI `batch` object shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub object: String,
    pub endpoint: String,
    pub input_file_id: String,
    pub completion_window: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_file_id: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_progress_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalizing_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelling_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_counts: Option<RequestCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<JobError>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCounts {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Canonical create-batch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBatchRequest {
    pub input_file_id: String,
    pub endpoint: String,
    pub completion_window: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Canonical fine-tuning job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineTuningJob {
    pub id: String,
    pub object: String,
    pub model: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fine_tuned_model: Option<String>,
    pub status: JobStatus,
    pub training_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_file: Option<String>,
    pub hyperparameters: Hyperparameters,
    pub result_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

/// Canonical create-fine-tuning-job request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFineTuningJobRequest {
    pub model: String,
    pub training_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hyperparameters: Option<Hyperparameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hyperparameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_epochs: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_rate_multiplier: Option<Value>,
}

/// Canonical file object. In Bedrock mode the id is a URL-encoded S3 URI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileObject {
    pub id: String,
    pub object: String,
    pub bytes: u64,
    pub created_at: i64,
    pub filename: String,
    pub purpose: String,
    pub status: String,
}

/// Canonical list wrapper for job and file listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub object: String,
    pub data: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_id: Option<String>,
    pub has_more: bool,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            object: "list".to_string(),
            data,
            first_id: None,
            last_id: None,
            has_more: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pascal_to_snake() {
        assert_eq!(pascal_to_snake("InProgress"), "in_progress");
        assert_eq!(pascal_to_snake("PartiallyCompleted"), "partially_completed");
        assert_eq!(pascal_to_snake("Stopped"), "stopped");
        assert_eq!(pascal_to_snake("completed"), "completed");
    }

    #[test]
    fn test_status_from_aws() {
        assert_eq!(JobStatus::from_aws("Submitted"), JobStatus::Validating);
        assert_eq!(JobStatus::from_aws("InProgress"), JobStatus::InProgress);
        assert_eq!(JobStatus::from_aws("PartiallyCompleted"), JobStatus::Completed);
        assert_eq!(JobStatus::from_aws("Stopping"), JobStatus::Cancelling);
        assert_eq!(JobStatus::from_aws("Stopped"), JobStatus::Cancelled);
        assert_eq!(JobStatus::from_aws("Expired"), JobStatus::Expired);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::InProgress).unwrap(),
            r#""in_progress""#
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Cancelling).unwrap(),
            r#""cancelling""#
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Cancelling.is_terminal());
        assert!(!JobStatus::Validating.is_terminal());
    }

    #[test]
    fn test_batch_job_omits_absent_timestamps() {
        let job = BatchJob {
            id: "arn".to_string(),
            object: "batch".to_string(),
            endpoint: "/v1/chat/completions".to_string(),
            input_file_id: "file".to_string(),
            completion_window: "24h".to_string(),
            status: JobStatus::Validating,
            output_file_id: None,
            error_file_id: None,
            created_at: 1_704_067_200,
            in_progress_at: None,
            finalizing_at: None,
            completed_at: None,
            failed_at: None,
            expired_at: None,
            cancelling_at: None,
            cancelled_at: None,
            request_counts: None,
            errors: None,
        };
        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("completed_at").is_none());
        assert_eq!(json["status"], "validating");
    }
}
