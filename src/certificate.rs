//! Certificate workflow.
//!
//! A certificate moves from "no record" to `Pending` once a student has completed enough
//! videos of a course, then to `Approved` or `Rejected` by a teacher. Both decisions are
//! final.

use crate::aggregate::{completed_video_count, merge_by_video};
use crate::course::{Course, CourseCatalog};
use crate::errors::AppError;
use crate::model::records::{Certificate, CertificateStatus, VideoProgressRecord};
use crate::payloads::teacher::CertificateAction;
use crate::store::Repository;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CERTIFICATE_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_8b3d_5c97_a0e1_4d2f_9b86_c3a5);

/// Completed videos a course requires before a certificate is requested.
pub fn threshold_for(course: &Course, default_threshold: u32) -> usize {
    let configured = course.certificate_threshold.unwrap_or(default_threshold) as usize;
    let capped = if course.video_ids.is_empty() {
        configured
    } else {
        configured.min(course.video_ids.len())
    };
    capped.max(1)
}

/// Stable id of the one certificate a student can hold for a course.
pub fn certificate_id(student_id: Uuid, course_id: &str) -> Uuid {
    Uuid::new_v5(
        &CERTIFICATE_NAMESPACE,
        format!("{}|{}", student_id, course_id).as_bytes(),
    )
}

/// Issues a pending certificate for `course_id` if the student has reached its threshold.
///
/// Returns the new certificate, or `None` when the threshold is not met, the course is
/// unknown, or a certificate already exists. Running it again is always a no-op.
pub fn check_course(
    repo: &mut dyn Repository,
    catalog: &CourseCatalog,
    default_threshold: u32,
    student_id: Uuid,
    course_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<Certificate>, AppError> {
    let Some(course) = catalog.course(course_id) else {
        warn!(
            "Certificate check skipped: course '{}' is not in the catalog",
            course_id
        );
        return Ok(None);
    };
    let progress = repo.video_progress_for_student(student_id)?;
    let videos = merge_by_video(&progress);
    issue_if_due(repo, catalog, default_threshold, student_id, course, &videos, now)
}

/// Runs [`check_course`] for every catalog course. Used after a merge pulls in history.
pub fn check_all_courses(
    repo: &mut dyn Repository,
    catalog: &CourseCatalog,
    default_threshold: u32,
    student_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<Certificate>, AppError> {
    let progress = repo.video_progress_for_student(student_id)?;
    if progress.is_empty() {
        return Ok(Vec::new());
    }
    let videos = merge_by_video(&progress);

    let mut issued = Vec::new();
    for course in catalog.courses() {
        if let Some(certificate) =
            issue_if_due(repo, catalog, default_threshold, student_id, course, &videos, now)?
        {
            issued.push(certificate);
        }
    }
    Ok(issued)
}

fn issue_if_due(
    repo: &mut dyn Repository,
    catalog: &CourseCatalog,
    default_threshold: u32,
    student_id: Uuid,
    course: &Course,
    videos: &BTreeMap<String, VideoProgressRecord>,
    now: DateTime<Utc>,
) -> Result<Option<Certificate>, AppError> {
    let completed = completed_video_count(videos, catalog, &course.id);
    let threshold = threshold_for(course, default_threshold);
    if completed < threshold {
        debug!(
            "Student {} has {}/{} videos of {} completed; no certificate yet",
            student_id, completed, threshold, course.id
        );
        return Ok(None);
    }

    if repo.find_certificate(student_id, &course.id)?.is_some() {
        debug!(
            "Certificate for student {} and course {} already exists",
            student_id, course.id
        );
        return Ok(None);
    }

    let certificate = Certificate {
        id: certificate_id(student_id, &course.id),
        student_id,
        course_id: course.id.clone(),
        title: course.title.clone(),
        completed_date: now,
        status: CertificateStatus::Pending,
        approved_by: None,
        approved_date: None,
    };

    if repo.insert_certificate(&certificate)? {
        info!(
            "Issued pending certificate {} for student {} in course {}",
            certificate.id, student_id, course.id
        );
        Ok(Some(certificate))
    } else {
        debug!(
            "Concurrent check already issued the certificate for student {} in course {}",
            student_id, course.id
        );
        Ok(None)
    }
}

/// Applies a teacher's decision to a pending certificate.
pub fn decide(
    repo: &mut dyn Repository,
    cert_id: Uuid,
    action: CertificateAction,
    teacher_id: i64,
    now: DateTime<Utc>,
) -> Result<Certificate, AppError> {
    let mut certificate = repo
        .get_certificate(cert_id)?
        .ok_or_else(|| AppError::NotFound(format!("Certificate {} not found", cert_id)))?;

    let owned = repo
        .get_student(certificate.student_id)?
        .is_some_and(|student| student.teacher_id == teacher_id);
    if !owned {
        warn!(
            "Teacher {} attempted to decide certificate {} of another teacher's student",
            teacher_id, cert_id
        );
        return Err(AppError::Forbidden(format!(
            "Certificate {} does not belong to a student of teacher {}",
            cert_id, teacher_id
        )));
    }

    if certificate.status != CertificateStatus::Pending {
        return Err(AppError::Conflict(format!(
            "Certificate {} is already {}",
            cert_id, certificate.status
        )));
    }

    certificate.status = match action {
        CertificateAction::Approve => CertificateStatus::Approved,
        CertificateAction::Reject => CertificateStatus::Rejected,
    };
    certificate.approved_by = Some(teacher_id);
    certificate.approved_date = Some(now);
    repo.put_certificate(&certificate)?;

    info!(
        "Certificate {} {} by teacher {}",
        cert_id, certificate.status, teacher_id
    );
    Ok(certificate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::records::Student;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    const TEACHER: i64 = 7;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
    }

    fn course(videos: usize, threshold: Option<u32>) -> Course {
        Course {
            id: "course-1".to_string(),
            title: "EV Fundamentals".to_string(),
            video_ids: (1..=videos).map(|n| format!("v{}", n)).collect(),
            certificate_threshold: threshold,
        }
    }

    fn student(id: Uuid) -> Student {
        Student {
            id,
            teacher_id: TEACHER,
            school_id: 1,
            first_name: "Ada".to_string(),
            last_name: "Volt".to_string(),
            email: None,
            class_code: "EVT2024".to_string(),
            joined_at: now(),
            last_active: now(),
        }
    }

    fn completed(student_id: Uuid, video_id: &str, course_id: &str) -> VideoProgressRecord {
        VideoProgressRecord {
            device_id: "dev-1".to_string(),
            video_id: video_id.to_string(),
            course_id: course_id.to_string(),
            student_id: Some(student_id),
            last_position_sec: 300.0,
            watched_sec: 300.0,
            duration_sec: 300.0,
            completed: true,
            completed_at: Some(now()),
            updated_at: now(),
        }
    }

    fn store_with(student_id: Uuid, completed_videos: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        let records: Vec<VideoProgressRecord> = completed_videos
            .iter()
            .map(|video| completed(student_id, video, "course_1"))
            .collect();
        store
            .transact(move |repo| {
                repo.insert_student(&student(student_id))?;
                for record in &records {
                    repo.put_video_progress(record)?;
                }
                Ok(())
            })
            .unwrap();
        store
    }

    #[test]
    fn threshold_is_capped_by_course_size_and_never_zero() {
        assert_eq!(threshold_for(&course(10, None), 5), 5);
        assert_eq!(threshold_for(&course(3, None), 5), 3);
        assert_eq!(threshold_for(&course(10, Some(8)), 5), 8);
        assert_eq!(threshold_for(&course(10, Some(0)), 5), 1);
    }

    #[test]
    fn certificate_ids_are_stable_per_student_and_course() {
        let student = Uuid::new_v4();
        assert_eq!(
            certificate_id(student, "course-1"),
            certificate_id(student, "course-1")
        );
        assert_ne!(
            certificate_id(student, "course-1"),
            certificate_id(student, "course-2")
        );
    }

    #[test]
    fn repeated_checks_issue_exactly_one_pending_certificate() {
        let student_id = Uuid::new_v4();
        let store = store_with(student_id, &["v1", "v2", "v3"]);
        let catalog = CourseCatalog::new(vec![course(3, None)], Vec::new());

        let (first, second) = store
            .transact(move |repo| {
                let first = check_course(repo, &catalog, 5, student_id, "1", now())?;
                let second = check_course(repo, &catalog, 5, student_id, "course-1", now())?;
                Ok((first, second))
            })
            .unwrap();

        let first = first.expect("first check issues the certificate");
        assert_eq!(first.status, CertificateStatus::Pending);
        assert_eq!(first.course_id, "course-1");
        assert!(second.is_none());

        let all = store
            .transact(|repo| repo.certificates_for_teacher(TEACHER))
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn nothing_is_issued_below_the_threshold() {
        let student_id = Uuid::new_v4();
        let store = store_with(student_id, &["v1", "v2"]);
        let catalog = CourseCatalog::new(vec![course(6, Some(3))], Vec::new());

        let issued = store
            .transact(move |repo| check_all_courses(repo, &catalog, 5, student_id, now()))
            .unwrap();
        assert!(issued.is_empty());
    }

    #[test]
    fn decisions_are_final_and_scoped_to_the_teacher() {
        let student_id = Uuid::new_v4();
        let store = store_with(student_id, &["v1", "v2", "v3"]);
        let catalog = CourseCatalog::new(vec![course(3, None)], Vec::new());

        let cert_id = store
            .transact(move |repo| {
                Ok(check_all_courses(repo, &catalog, 5, student_id, now())?[0].id)
            })
            .unwrap();

        let foreign = store.transact(move |repo| {
            decide(repo, cert_id, CertificateAction::Approve, TEACHER + 1, now())
        });
        assert!(matches!(foreign, Err(AppError::Forbidden(_))));

        let approved = store
            .transact(move |repo| decide(repo, cert_id, CertificateAction::Approve, TEACHER, now()))
            .unwrap();
        assert_eq!(approved.status, CertificateStatus::Approved);
        assert_eq!(approved.approved_by, Some(TEACHER));
        assert_eq!(approved.approved_date, Some(now()));

        let again = store
            .transact(move |repo| decide(repo, cert_id, CertificateAction::Reject, TEACHER, now()));
        assert!(matches!(again, Err(AppError::Conflict(_))));

        let missing = store.transact(move |repo| {
            decide(repo, Uuid::new_v4(), CertificateAction::Reject, TEACHER, now())
        });
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }
}
