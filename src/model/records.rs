use crate::schema::{daily_activity, devices, schools, students, teachers, video_progress};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A single app installation. Anonymous until `student_id` is set, and never unset afterwards.
#[derive(Queryable, Selectable, Insertable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = devices)]
pub struct Device {
    pub device_id: String,
    pub platform: String,
    pub app_version: String,
    pub device_name: Option<String>,
    pub student_id: Option<Uuid>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Device {
    pub fn new(
        device_id: impl Into<String>,
        platform: impl Into<String>,
        app_version: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Device {
            device_id: device_id.into(),
            platform: platform.into(),
            app_version: app_version.into(),
            device_name: None,
            student_id: None,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Binds the device to a student unless it is already bound. Returns the effective binding.
    pub fn bind(&mut self, student_id: Uuid) -> Uuid {
        *self.student_id.get_or_insert(student_id)
    }
}

#[derive(Queryable, Selectable, Insertable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = students)]
pub struct Student {
    pub id: Uuid,
    pub teacher_id: i64,
    pub school_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub class_code: String,
    pub joined_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = teachers)]
pub struct Teacher {
    pub id: i64,
    pub school_id: i64,
    pub display_name: String,
    pub email: String,
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = schools)]
pub struct School {
    pub id: i64,
    pub name: String,
}

/// A class code resolved to its owning teacher and school.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClassInfo {
    pub code: String,
    pub teacher_id: i64,
    pub school_id: i64,
    pub program_name: String,
    pub teacher_name: String,
    pub teacher_email: String,
    pub school_name: String,
}

/// Watch progress of one video on one device.
///
/// `watched_sec` never decreases and never exceeds `duration_sec` (the longest duration seen
/// for the video). `completed` only ever flips from false to true.
#[derive(
    Queryable, Selectable, Insertable, Serialize, Deserialize, Debug, Clone, PartialEq,
)]
#[diesel(table_name = video_progress)]
pub struct VideoProgressRecord {
    pub device_id: String,
    pub video_id: String,
    pub course_id: String,
    pub student_id: Option<Uuid>,
    pub last_position_sec: f64,
    pub watched_sec: f64,
    pub duration_sec: f64,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl VideoProgressRecord {
    pub fn watch_fraction(&self) -> f64 {
        if self.duration_sec <= 0.0 {
            return 0.0;
        }
        (self.watched_sec / self.duration_sec).clamp(0.0, 1.0)
    }

    pub fn progress_percentage(&self) -> f64 {
        (self.watch_fraction() * 10_000.0).round() / 100.0
    }
}

/// Activity of one device on one local calendar day.
#[derive(
    Queryable, Selectable, Insertable, Serialize, Deserialize, Debug, Clone, PartialEq,
)]
#[diesel(table_name = daily_activity)]
pub struct DailyActivityRecord {
    pub device_id: String,
    pub activity_date: NaiveDate,
    pub student_id: Option<Uuid>,
    pub total_watched_sec: f64,
    pub videos_completed: i32,
    pub videos_started: i32,
    pub xp_earned: i32,
}

impl DailyActivityRecord {
    pub fn empty(device_id: impl Into<String>, date: NaiveDate, student_id: Option<Uuid>) -> Self {
        DailyActivityRecord {
            device_id: device_id.into(),
            activity_date: date,
            student_id,
            total_watched_sec: 0.0,
            videos_completed: 0,
            videos_started: 0,
            xp_earned: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Pending,
    Approved,
    Rejected,
}

impl CertificateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::Pending => "pending",
            CertificateStatus::Approved => "approved",
            CertificateStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertificateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(CertificateStatus::Pending),
            "approved" => Ok(CertificateStatus::Approved),
            "rejected" => Ok(CertificateStatus::Rejected),
            other => Err(format!("Unknown certificate status '{}'", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Certificate {
    pub id: Uuid,
    pub student_id: Uuid,
    pub course_id: String,
    pub title: String,
    pub completed_date: DateTime<Utc>,
    pub status: CertificateStatus,
    pub approved_by: Option<i64>,
    pub approved_date: Option<DateTime<Utc>>,
}

/// Number of rows re-tagged from a device to its student by one merge.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub progress_records: usize,
    pub activity_records: usize,
}

impl MergeCounts {
    pub fn is_empty(&self) -> bool {
        self.progress_records == 0 && self.activity_records == 0
    }
}
