//! Identity resolution: binding an anonymous device to a durable student.
//!
//! A join resolves the student in this order: an existing student of the class's teacher
//! with the same email, then the student the device is already bound to (if taught by the
//! same teacher), then a new student whose id is derived from the teacher, email and
//! device so that retried joins land on the same row. The device binding and the orphan
//! merge run in the caller's transaction, so they commit together or not at all.

use crate::access::CodeType;
use crate::certificate;
use crate::errors::AppError;
use crate::model::records::{Certificate, ClassInfo, Device, MergeCounts, Student};
use crate::payloads::device::JoinClassPayload;
use crate::store::Repository;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

const STUDENT_NAMESPACE: Uuid = Uuid::from_u128(0x2b9e_71d4_03a8_4f6c_9e15_c7d0_58a3_e264);

pub const UNKNOWN_PLATFORM: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub student: Student,
    pub class: ClassInfo,
    /// Whether this join created the student row.
    pub created: bool,
    pub merged: MergeCounts,
    pub certificates_issued: Vec<Certificate>,
}

/// Trimmed, lowercased email; blank input counts as no email.
pub fn normalize_email(raw: Option<&str>) -> Option<String> {
    raw.map(|email| email.trim().to_lowercase())
        .filter(|email| !email.is_empty())
}

/// Deterministic id of the student a device creates when joining without a prior match.
pub fn student_id_for(teacher_id: i64, email: Option<&str>, device_id: &str) -> Uuid {
    let name = match email {
        Some(email) => format!("{}|{}|{}", teacher_id, email, device_id),
        None => format!("{}|{}", teacher_id, device_id),
    };
    Uuid::new_v5(&STUDENT_NAMESPACE, name.as_bytes())
}

/// Resolves a class code to its class.
///
/// The stored classes are consulted first, whatever the code looks like. A miss is always
/// `ClassNotFound`; when the code has the shape of a redemption code the message says so.
pub fn resolve_class(repo: &mut dyn Repository, raw_code: &str) -> Result<ClassInfo, AppError> {
    let code = raw_code.trim().to_ascii_uppercase();
    if code.is_empty() {
        return Err(AppError::BadRequest("class_code must not be empty".to_string()));
    }
    if let Some(class) = repo.find_class(&code)? {
        return Ok(class);
    }

    let message = match CodeType::classify(&code) {
        Ok((code_type, _)) if code_type != CodeType::ClassAccess => format!(
            "Class {} does not exist ({} codes cannot be used to join a class)",
            code, code_type
        ),
        _ => format!("Class {} does not exist", code),
    };
    debug!("Join rejected: {}", message);
    Err(AppError::ClassNotFound(message))
}

/// Joins `payload.device_id` to the class named by `payload.class_code`.
pub fn join_class(
    repo: &mut dyn Repository,
    payload: &JoinClassPayload,
    default_certificate_threshold: u32,
    now: DateTime<Utc>,
) -> Result<JoinOutcome, AppError> {
    let device_id = payload.device_id.trim();
    if device_id.is_empty() {
        return Err(AppError::BadRequest("device_id must not be empty".to_string()));
    }
    let first_name = payload.first_name.trim();
    if first_name.is_empty() {
        return Err(AppError::BadRequest("first_name must not be empty".to_string()));
    }
    let last_name = payload.last_name.trim();

    let class = resolve_class(repo, &payload.class_code)?;
    let email = normalize_email(payload.email.as_deref());

    let mut device = match repo.get_device(device_id)? {
        Some(device) => device,
        None => {
            debug!("Device {} joins before registering; registering implicitly", device_id);
            Device::new(device_id, UNKNOWN_PLATFORM, UNKNOWN_PLATFORM, now)
        }
    };
    device.last_seen = now;

    let (mut student, created) = match find_existing(repo, &class, email.as_deref(), &device)? {
        Some(student) => (student, false),
        None => {
            let names = (first_name, last_name);
            create_student(repo, &class, email.as_deref(), device_id, names, now)?
        }
    };

    if !created {
        student.first_name = first_name.to_string();
        student.last_name = last_name.to_string();
        if student.email.is_none() {
            student.email = email.clone();
        }
        student.class_code = class.code.clone();
        student.last_active = student.last_active.max(now);
        repo.put_student(&student)?;
    }

    let bound = device.bind(student.id);
    if bound != student.id {
        warn!(
            "Device {} stays bound to student {}; join resolved student {}",
            device_id, bound, student.id
        );
    }
    repo.put_device(&device)?;

    let merged = repo.merge_orphans(device_id, bound)?;
    if merged.is_empty() {
        debug!("No orphaned records to merge for device {}", device_id);
    } else {
        info!(
            "Merged {} progress and {} activity records of device {} into student {}",
            merged.progress_records, merged.activity_records, device_id, bound
        );
    }

    let catalog = repo.course_catalog()?;
    let certificates_issued =
        certificate::check_all_courses(repo, &catalog, default_certificate_threshold, bound, now)?;

    Ok(JoinOutcome {
        student,
        class,
        created,
        merged,
        certificates_issued,
    })
}

fn find_existing(
    repo: &mut dyn Repository,
    class: &ClassInfo,
    email: Option<&str>,
    device: &Device,
) -> Result<Option<Student>, AppError> {
    if let Some(email) = email {
        if let Some(student) = repo.find_student_by_email(class.teacher_id, email)? {
            debug!("Join matched student {} by email", student.id);
            return Ok(Some(student));
        }
    }
    if let Some(bound_id) = device.student_id {
        match repo.get_student(bound_id)? {
            Some(student) if student.teacher_id == class.teacher_id => {
                debug!("Join matched student {} by device binding", student.id);
                return Ok(Some(student));
            }
            Some(_) => debug!(
                "Device {} is bound to a student of another teacher",
                device.device_id
            ),
            None => warn!(
                "Device {} is bound to missing student {}",
                device.device_id, bound_id
            ),
        }
    }
    Ok(None)
}

fn create_student(
    repo: &mut dyn Repository,
    class: &ClassInfo,
    email: Option<&str>,
    device_id: &str,
    (first_name, last_name): (&str, &str),
    now: DateTime<Utc>,
) -> Result<(Student, bool), AppError> {
    let student = Student {
        id: student_id_for(class.teacher_id, email, device_id),
        teacher_id: class.teacher_id,
        school_id: class.school_id,
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        email: email.map(str::to_string),
        class_code: class.code.clone(),
        joined_at: now,
        last_active: now,
    };

    if repo.insert_student(&student)? {
        info!(
            "Created student {} under teacher {}",
            student.id, class.teacher_id
        );
        return Ok((student, true));
    }

    // Lost a race against a concurrent join; fold into the row that won.
    let winner = match email {
        Some(email) => repo.find_student_by_email(class.teacher_id, email)?,
        None => repo.get_student(student.id)?,
    };
    match winner {
        Some(existing) => {
            debug!("Concurrent join created student {}; merging", existing.id);
            Ok((existing, false))
        }
        None => Err(AppError::InternalServerError(anyhow!(
            "Student insert for device {} conflicted but no matching row was found",
            device_id
        ))),
    }
}
