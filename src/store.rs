//! Persistence seam.
//!
//! The engine only ever talks to a [`Repository`] handed to it inside
//! [`Store::transact`]. Everything done through that repository commits together or not
//! at all, which is what makes device binding and orphan merging atomic.

use crate::course::CourseCatalog;
use crate::errors::AppError;
use crate::model::records::{
    Certificate, ClassInfo, DailyActivityRecord, Device, MergeCounts, Student, Teacher,
    VideoProgressRecord,
};
use deadpool_diesel::postgres::Pool;
use uuid::Uuid;

pub mod memory;
pub mod pg;

pub use memory::{MemoryStore, SeedData};

pub trait Repository {
    fn course_catalog(&mut self) -> Result<CourseCatalog, AppError>;
    fn find_class(&mut self, code: &str) -> Result<Option<ClassInfo>, AppError>;
    fn get_teacher(&mut self, teacher_id: i64) -> Result<Option<Teacher>, AppError>;

    fn get_device(&mut self, device_id: &str) -> Result<Option<Device>, AppError>;
    fn put_device(&mut self, device: &Device) -> Result<(), AppError>;

    fn get_student(&mut self, student_id: Uuid) -> Result<Option<Student>, AppError>;
    fn find_student_by_email(
        &mut self,
        teacher_id: i64,
        email: &str,
    ) -> Result<Option<Student>, AppError>;
    /// Inserts a new student; returns `false` if the id or `(teacher, email)` already exists.
    fn insert_student(&mut self, student: &Student) -> Result<bool, AppError>;
    fn put_student(&mut self, student: &Student) -> Result<(), AppError>;
    fn students_for_teacher(&mut self, teacher_id: i64) -> Result<Vec<Student>, AppError>;

    fn get_video_progress(
        &mut self,
        device_id: &str,
        video_id: &str,
    ) -> Result<Option<VideoProgressRecord>, AppError>;
    fn put_video_progress(&mut self, record: &VideoProgressRecord) -> Result<(), AppError>;
    fn video_progress_for_device(
        &mut self,
        device_id: &str,
    ) -> Result<Vec<VideoProgressRecord>, AppError>;
    fn video_progress_for_student(
        &mut self,
        student_id: Uuid,
    ) -> Result<Vec<VideoProgressRecord>, AppError>;

    /// Adds the counters of `increment` to the `(device, day)` bucket, creating it if needed.
    fn add_daily_activity(&mut self, increment: &DailyActivityRecord) -> Result<(), AppError>;
    fn daily_activity_for_device(
        &mut self,
        device_id: &str,
    ) -> Result<Vec<DailyActivityRecord>, AppError>;
    fn daily_activity_for_student(
        &mut self,
        student_id: Uuid,
    ) -> Result<Vec<DailyActivityRecord>, AppError>;

    /// Tags every record of `device_id` that has no student yet with `student_id`. Records
    /// already owned by any student are left alone.
    fn merge_orphans(&mut self, device_id: &str, student_id: Uuid)
    -> Result<MergeCounts, AppError>;

    fn get_certificate(&mut self, cert_id: Uuid) -> Result<Option<Certificate>, AppError>;
    fn find_certificate(
        &mut self,
        student_id: Uuid,
        course_id: &str,
    ) -> Result<Option<Certificate>, AppError>;
    /// Inserts a certificate; returns `false` if one already exists for the student/course.
    fn insert_certificate(&mut self, certificate: &Certificate) -> Result<bool, AppError>;
    fn put_certificate(&mut self, certificate: &Certificate) -> Result<(), AppError>;
    fn certificates_for_teacher(&mut self, teacher_id: i64) -> Result<Vec<Certificate>, AppError>;
}

#[derive(Clone)]
pub enum Store {
    Postgres(Pool),
    Memory(MemoryStore),
}

impl Store {
    /// Runs `work` as one atomic unit against the backing store.
    pub async fn transact<T, F>(&self, work: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut dyn Repository) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        match self {
            Store::Postgres(pool) => pg::transact(pool, work).await,
            Store::Memory(store) => store.transact(work),
        }
    }
}
