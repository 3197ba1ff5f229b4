use crate::access::CodeType;
use crate::aggregate::{CertificationTier, CourseCompletionState, StudentSummary};
use crate::model::records::{Certificate, CertificateStatus, Student, VideoProgressRecord};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RosterStudent {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub total_xp: u32,
    pub current_level: u32,
    pub level_title: String,
    pub completed_courses: usize,
    pub certification_tier: CertificationTier,
    /// Code types this student may hand out at their current tier.
    pub shareable_codes: Vec<CodeType>,
    pub last_active: DateTime<Utc>,
    pub last_activity_day: Option<NaiveDate>,
    pub streak: u32,
    pub is_active: bool,
    pub needs_attention: bool,
    /// Completed share of all catalog videos, in percent.
    pub completion_rate: f64,
}

impl RosterStudent {
    pub fn derive(
        student: &Student,
        summary: &StudentSummary,
        today: NaiveDate,
        attention_after_days: u32,
    ) -> Self {
        let needs_attention = summary.last_active_day.is_none_or(|day| {
            (today - day).num_days() >= i64::from(attention_after_days)
        });
        RosterStudent {
            id: student.id,
            name: student.display_name(),
            email: student.email.clone(),
            total_xp: summary.total_xp,
            current_level: summary.level.number,
            level_title: summary.level.title.clone(),
            completed_courses: summary.completed_courses.len(),
            certification_tier: summary.certification_tier,
            shareable_codes: CodeType::shareable_types(summary.certification_tier),
            last_active: student.last_active,
            last_activity_day: summary.last_active_day,
            streak: summary.streak,
            is_active: summary.last_active_day == Some(today),
            needs_attention,
            completion_rate: round2(summary.completion_rate() * 100.0),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RosterSummary {
    pub total_students: usize,
    pub active_today: usize,
    pub avg_xp: f64,
    /// Mean of the students' completion rates, in percent.
    pub avg_completion_rate: f64,
}

impl RosterSummary {
    pub fn from_students(students: &[RosterStudent]) -> Self {
        let total_students = students.len();
        let mean = |sum: f64| {
            if total_students == 0 {
                0.0
            } else {
                round2(sum / total_students as f64)
            }
        };
        RosterSummary {
            total_students,
            active_today: students.iter().filter(|s| s.is_active).count(),
            avg_xp: mean(students.iter().map(|s| f64::from(s.total_xp)).sum()),
            avg_completion_rate: mean(students.iter().map(|s| s.completion_rate).sum()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RosterResponse {
    pub students: Vec<RosterStudent>,
    pub summary: RosterSummary,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StudentProgressResponse {
    pub student: Student,
    pub courses: Vec<CourseCompletionState>,
    pub videos: Vec<VideoProgressRecord>,
    pub summary: StudentSummary,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CertificateSummary {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

impl CertificateSummary {
    pub fn from_certificates(certificates: &[Certificate]) -> Self {
        let count = |status: CertificateStatus| {
            certificates.iter().filter(|c| c.status == status).count()
        };
        CertificateSummary {
            total: certificates.len(),
            pending: count(CertificateStatus::Pending),
            approved: count(CertificateStatus::Approved),
            rejected: count(CertificateStatus::Rejected),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CertificatesResponse {
    pub certificates: Vec<Certificate>,
    /// Counts over all of the teacher's certificates, regardless of the status filter.
    pub summary: CertificateSummary,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
