//! In-process store used for local development and the integration tests.
//!
//! Every transaction clones the whole state and swaps the copy in on success, so each write
//! costs time proportional to the store size. It is not meant for sustained production load;
//! run the postgres backend for that.

use super::Repository;
use crate::course::{Course, CourseCatalog};
use crate::errors::AppError;
use crate::model::records::{
    Certificate, ClassInfo, DailyActivityRecord, Device, MergeCounts, School, Student, Teacher,
    VideoProgressRecord,
};
use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Deserialize, Debug, Clone)]
pub struct SeedClass {
    pub code: String,
    pub teacher_id: i64,
    pub school_id: i64,
    pub program_name: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SeedAlias {
    pub alias: String,
    pub course_id: String,
}

/// Static catalog data loaded into a fresh memory store.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct SeedData {
    #[serde(default)]
    pub schools: Vec<School>,
    #[serde(default)]
    pub teachers: Vec<Teacher>,
    #[serde(default)]
    pub classes: Vec<SeedClass>,
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub aliases: Vec<SeedAlias>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    schools: BTreeMap<i64, School>,
    teachers: BTreeMap<i64, Teacher>,
    classes: BTreeMap<String, SeedClass>,
    courses: Vec<Course>,
    aliases: Vec<(String, String)>,
    devices: BTreeMap<String, Device>,
    students: BTreeMap<Uuid, Student>,
    video_progress: BTreeMap<(String, String), VideoProgressRecord>,
    daily_activity: BTreeMap<(String, NaiveDate), DailyActivityRecord>,
    certificates: BTreeMap<Uuid, Certificate>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: SeedData) -> Self {
        let store = Self::new();
        store.seed(seed);
        store
    }

    pub fn from_seed_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        let seed: SeedData = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse seed file {}", path.display()))?;
        info!(
            "Loaded seed data: {} schools, {} teachers, {} classes, {} courses",
            seed.schools.len(),
            seed.teachers.len(),
            seed.classes.len(),
            seed.courses.len()
        );
        Ok(Self::with_seed(seed))
    }

    /// Adds catalog data. Existing entries with the same keys are replaced.
    pub fn seed(&self, seed: SeedData) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for school in seed.schools {
            state.schools.insert(school.id, school);
        }
        for teacher in seed.teachers {
            state.teachers.insert(teacher.id, teacher);
        }
        for class in seed.classes {
            state.classes.insert(class.code.trim().to_ascii_uppercase(), class);
        }
        for course in seed.courses {
            state.courses.retain(|c| c.id != course.id);
            state.courses.push(course);
        }
        state
            .aliases
            .extend(seed.aliases.into_iter().map(|a| (a.alias, a.course_id)));
    }

    /// Runs `work` against a draft copy of the state and commits the draft only on success.
    pub fn transact<T, F>(&self, work: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut dyn Repository) -> Result<T, AppError>,
    {
        let mut state = self
            .state
            .lock()
            .map_err(|_| AppError::InternalServerError(anyhow!("Memory store lock poisoned")))?;
        let mut draft = state.clone();
        let result = work(&mut draft)?;
        *state = draft;
        Ok(result)
    }
}

impl Repository for MemoryState {
    fn course_catalog(&mut self) -> Result<CourseCatalog, AppError> {
        Ok(CourseCatalog::new(self.courses.clone(), self.aliases.clone()))
    }

    fn find_class(&mut self, code: &str) -> Result<Option<ClassInfo>, AppError> {
        let Some(class) = self.classes.get(code) else {
            return Ok(None);
        };
        let (Some(teacher), Some(school)) = (
            self.teachers.get(&class.teacher_id),
            self.schools.get(&class.school_id),
        ) else {
            warn!("Class {} references a missing teacher or school", code);
            return Ok(None);
        };
        Ok(Some(ClassInfo {
            code: code.to_string(),
            teacher_id: class.teacher_id,
            school_id: class.school_id,
            program_name: class.program_name.clone(),
            teacher_name: teacher.display_name.clone(),
            teacher_email: teacher.email.clone(),
            school_name: school.name.clone(),
        }))
    }

    fn get_teacher(&mut self, teacher_id: i64) -> Result<Option<Teacher>, AppError> {
        Ok(self.teachers.get(&teacher_id).cloned())
    }

    fn get_device(&mut self, device_id: &str) -> Result<Option<Device>, AppError> {
        Ok(self.devices.get(device_id).cloned())
    }

    fn put_device(&mut self, device: &Device) -> Result<(), AppError> {
        let mut stored = device.clone();
        if let Some(existing) = self.devices.get(&device.device_id) {
            stored.first_seen = existing.first_seen;
            stored.student_id = existing.student_id.or(device.student_id);
        }
        self.devices.insert(stored.device_id.clone(), stored);
        Ok(())
    }

    fn get_student(&mut self, student_id: Uuid) -> Result<Option<Student>, AppError> {
        Ok(self.students.get(&student_id).cloned())
    }

    fn find_student_by_email(
        &mut self,
        teacher_id: i64,
        email: &str,
    ) -> Result<Option<Student>, AppError> {
        Ok(self
            .students
            .values()
            .find(|s| s.teacher_id == teacher_id && s.email.as_deref() == Some(email))
            .cloned())
    }

    fn insert_student(&mut self, student: &Student) -> Result<bool, AppError> {
        let email_taken = student.email.as_deref().is_some_and(|email| {
            self.students
                .values()
                .any(|s| s.teacher_id == student.teacher_id && s.email.as_deref() == Some(email))
        });
        if email_taken || self.students.contains_key(&student.id) {
            return Ok(false);
        }
        self.students.insert(student.id, student.clone());
        Ok(true)
    }

    fn put_student(&mut self, student: &Student) -> Result<(), AppError> {
        self.students.insert(student.id, student.clone());
        Ok(())
    }

    fn students_for_teacher(&mut self, teacher_id: i64) -> Result<Vec<Student>, AppError> {
        let mut students: Vec<Student> = self
            .students
            .values()
            .filter(|s| s.teacher_id == teacher_id)
            .cloned()
            .collect();
        students.sort_by(|a, b| {
            (&a.last_name, &a.first_name, a.id).cmp(&(&b.last_name, &b.first_name, b.id))
        });
        Ok(students)
    }

    fn get_video_progress(
        &mut self,
        device_id: &str,
        video_id: &str,
    ) -> Result<Option<VideoProgressRecord>, AppError> {
        Ok(self
            .video_progress
            .get(&(device_id.to_string(), video_id.to_string()))
            .cloned())
    }

    fn put_video_progress(&mut self, record: &VideoProgressRecord) -> Result<(), AppError> {
        self.video_progress.insert(
            (record.device_id.clone(), record.video_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    fn video_progress_for_device(
        &mut self,
        device_id: &str,
    ) -> Result<Vec<VideoProgressRecord>, AppError> {
        Ok(self
            .video_progress
            .values()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect())
    }

    fn video_progress_for_student(
        &mut self,
        student_id: Uuid,
    ) -> Result<Vec<VideoProgressRecord>, AppError> {
        Ok(self
            .video_progress
            .values()
            .filter(|r| r.student_id == Some(student_id))
            .cloned()
            .collect())
    }

    fn add_daily_activity(&mut self, increment: &DailyActivityRecord) -> Result<(), AppError> {
        let bucket = self
            .daily_activity
            .entry((increment.device_id.clone(), increment.activity_date))
            .or_insert_with(|| {
                DailyActivityRecord::empty(
                    increment.device_id.clone(),
                    increment.activity_date,
                    increment.student_id,
                )
            });
        bucket.student_id = bucket.student_id.or(increment.student_id);
        bucket.total_watched_sec += increment.total_watched_sec;
        bucket.videos_completed += increment.videos_completed;
        bucket.videos_started += increment.videos_started;
        bucket.xp_earned += increment.xp_earned;
        Ok(())
    }

    fn daily_activity_for_device(
        &mut self,
        device_id: &str,
    ) -> Result<Vec<DailyActivityRecord>, AppError> {
        Ok(self
            .daily_activity
            .values()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect())
    }

    fn daily_activity_for_student(
        &mut self,
        student_id: Uuid,
    ) -> Result<Vec<DailyActivityRecord>, AppError> {
        Ok(self
            .daily_activity
            .values()
            .filter(|r| r.student_id == Some(student_id))
            .cloned()
            .collect())
    }

    fn merge_orphans(
        &mut self,
        device_id: &str,
        student_id: Uuid,
    ) -> Result<MergeCounts, AppError> {
        let mut counts = MergeCounts::default();
        for record in self
            .video_progress
            .values_mut()
            .filter(|r| r.device_id == device_id && r.student_id.is_none())
        {
            record.student_id = Some(student_id);
            counts.progress_records += 1;
        }
        for record in self
            .daily_activity
            .values_mut()
            .filter(|r| r.device_id == device_id && r.student_id.is_none())
        {
            record.student_id = Some(student_id);
            counts.activity_records += 1;
        }
        Ok(counts)
    }

    fn get_certificate(&mut self, cert_id: Uuid) -> Result<Option<Certificate>, AppError> {
        Ok(self.certificates.get(&cert_id).cloned())
    }

    fn find_certificate(
        &mut self,
        student_id: Uuid,
        course_id: &str,
    ) -> Result<Option<Certificate>, AppError> {
        Ok(self
            .certificates
            .values()
            .find(|c| c.student_id == student_id && c.course_id == course_id)
            .cloned())
    }

    fn insert_certificate(&mut self, certificate: &Certificate) -> Result<bool, AppError> {
        let duplicate = self.certificates.contains_key(&certificate.id)
            || self.certificates.values().any(|c| {
                c.student_id == certificate.student_id && c.course_id == certificate.course_id
            });
        if duplicate {
            return Ok(false);
        }
        self.certificates
            .insert(certificate.id, certificate.clone());
        Ok(true)
    }

    fn put_certificate(&mut self, certificate: &Certificate) -> Result<(), AppError> {
        self.certificates
            .insert(certificate.id, certificate.clone());
        Ok(())
    }

    fn certificates_for_teacher(&mut self, teacher_id: i64) -> Result<Vec<Certificate>, AppError> {
        let mut certificates: Vec<Certificate> = self
            .certificates
            .values()
            .filter(|c| {
                self.students
                    .get(&c.student_id)
                    .is_some_and(|s| s.teacher_id == teacher_id)
            })
            .cloned()
            .collect();
        certificates.sort_by_key(|c| (c.completed_date, c.id));
        Ok(certificates)
    }
}
