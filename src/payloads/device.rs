use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterDevicePayload {
    pub device_id: String,
    pub platform: String,
    pub app_version: String,
    #[serde(default)]
    pub device_name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JoinClassPayload {
    pub device_id: String,
    pub class_code: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// One video's progress as last computed by the device ledger.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub video_id: String,
    pub course_id: String,
    pub last_position_sec: f64,
    pub watched_sec: f64,
    pub total_duration_sec: f64,
    #[serde(default)]
    pub completed_hint: bool,
    /// Device clock at the time of the update; last-writer-wins for the playback position.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Device-local calendar day the watch time belongs to.
    #[serde(default)]
    pub local_date: Option<NaiveDate>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpdateVideoProgressPayload {
    pub device_id: String,
    #[serde(flatten)]
    pub update: ProgressUpdate,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SyncProgressPayload {
    pub device_id: String,
    pub updates: Vec<ProgressUpdate>,
}
