use crate::aggregate::StudentSummary;
use crate::errors::AppError;
use crate::identity::JoinOutcome;
use crate::ingest::IngestOutcome;
use crate::model::records::{Certificate, Device, VideoProgressRecord};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClassDetails {
    pub teacher_name: String,
    pub teacher_email: String,
    pub school_name: String,
    pub program_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JoinClassResponse {
    pub student_id: Uuid,
    pub teacher_id: i64,
    pub school_id: i64,
    pub class_details: ClassDetails,
    pub created: bool,
    pub merged_progress_records: usize,
    pub merged_activity_records: usize,
    pub certificates_issued: Vec<Certificate>,
}

impl From<JoinOutcome> for JoinClassResponse {
    fn from(outcome: JoinOutcome) -> Self {
        JoinClassResponse {
            student_id: outcome.student.id,
            teacher_id: outcome.class.teacher_id,
            school_id: outcome.class.school_id,
            class_details: ClassDetails {
                teacher_name: outcome.class.teacher_name,
                teacher_email: outcome.class.teacher_email,
                school_name: outcome.class.school_name,
                program_name: outcome.class.program_name,
            },
            created: outcome.created,
            merged_progress_records: outcome.merged.progress_records,
            merged_activity_records: outcome.merged.activity_records,
            certificates_issued: outcome.certificates_issued,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VideoProgressResponse {
    pub video_id: String,
    pub course_id: String,
    pub watched_sec: f64,
    pub progress_percentage: f64,
    pub completed: bool,
    pub certificates_issued: Vec<Certificate>,
}

impl From<IngestOutcome> for VideoProgressResponse {
    fn from(outcome: IngestOutcome) -> Self {
        VideoProgressResponse {
            progress_percentage: outcome.record.progress_percentage(),
            video_id: outcome.record.video_id,
            course_id: outcome.record.course_id,
            watched_sec: outcome.record.watched_sec,
            completed: outcome.record.completed,
            certificates_issued: outcome.certificates_issued,
        }
    }
}

/// Result of one item of a sync batch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SyncItemResult {
    pub video_id: String,
    pub accepted: bool,
    pub progress: Option<VideoProgressResponse>,
    /// Error kind, e.g. `ValidationError` or `TransientError`.
    pub error: Option<String>,
    pub message: Option<String>,
    /// Whether resubmitting the same item later may succeed.
    pub retryable: bool,
}

impl SyncItemResult {
    pub fn accepted(progress: VideoProgressResponse) -> Self {
        SyncItemResult {
            video_id: progress.video_id.clone(),
            accepted: true,
            progress: Some(progress),
            error: None,
            message: None,
            retryable: false,
        }
    }

    pub fn rejected(video_id: String, err: &AppError) -> Self {
        SyncItemResult {
            video_id,
            accepted: false,
            progress: None,
            error: Some(err.kind().to_string()),
            message: Some(err.to_string()),
            retryable: err.is_retryable(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SyncProgressResponse {
    pub device_id: String,
    pub accepted: usize,
    pub rejected: usize,
    pub results: Vec<SyncItemResult>,
}

impl SyncProgressResponse {
    pub fn new(device_id: String, results: Vec<SyncItemResult>) -> Self {
        let accepted = results.iter().filter(|r| r.accepted).count();
        SyncProgressResponse {
            device_id,
            accepted,
            rejected: results.len() - accepted,
            results,
        }
    }
}

/// Everything stored for a device, plus the state derived from it.
///
/// Once the device is bound, `records` and `summary` cover all devices of its student.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeviceProgressResponse {
    pub device: Device,
    pub student_id: Option<Uuid>,
    pub records: Vec<VideoProgressRecord>,
    pub summary: StudentSummary,
}
