//! Diesel/PostgreSQL repository.

use super::Repository;
use crate::course::{Course, CourseCatalog};
use crate::errors::AppError;
use crate::model::records::{
    Certificate, CertificateStatus, ClassInfo, DailyActivityRecord, Device, MergeCounts, Student,
    Teacher, VideoProgressRecord,
};
use crate::schema::{
    classes::dsl as classes_dsl, course_aliases::dsl as aliases_dsl,
    course_videos::dsl as cv_dsl, courses::dsl as courses_dsl, daily_activity::dsl as da_dsl,
    devices::dsl as devices_dsl, schools::dsl as schools_dsl,
    student_certificates::dsl as sc_dsl, students::dsl as students_dsl,
    teachers::dsl as teachers_dsl, video_progress::dsl as vp_dsl,
};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use deadpool_diesel::postgres::Pool;
use diesel::prelude::*;
use diesel::sql_types::{Double, Nullable, Timestamptz};
use diesel::upsert::excluded;
use std::collections::BTreeMap;
use tracing::{debug, error};
use uuid::Uuid;

define_sql_function! {
    #[sql_name = "GREATEST"]
    fn greatest_f64(a: Double, b: Double) -> Double;
}

define_sql_function! {
    #[sql_name = "GREATEST"]
    fn greatest_ts(a: Timestamptz, b: Timestamptz) -> Timestamptz;
}

define_sql_function! {
    #[sql_name = "COALESCE"]
    fn coalesce_uuid(
        a: Nullable<diesel::sql_types::Uuid>,
        b: Nullable<diesel::sql_types::Uuid>,
    ) -> Nullable<diesel::sql_types::Uuid>;
}

define_sql_function! {
    #[sql_name = "COALESCE"]
    fn coalesce_ts(a: Nullable<Timestamptz>, b: Nullable<Timestamptz>) -> Nullable<Timestamptz>;
}

pub(super) async fn transact<T, F>(pool: &Pool, work: F) -> Result<T, AppError>
where
    F: FnOnce(&mut dyn Repository) -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    let conn = pool.get().await.map_err(|pool_err| {
        error!(
            "Failed to get DB connection object from pool: {:?}",
            pool_err
        );
        AppError::from(pool_err)
    })?;
    debug!("DB connection object obtained from pool for transaction");

    conn.interact(move |conn_sync| {
        conn_sync.transaction::<T, AppError, _>(|tx_conn| {
            let mut repository = PgRepository { conn: tx_conn };
            work(&mut repository)
        })
    })
    .await?
}

#[derive(Queryable, Selectable, Insertable, Debug)]
#[diesel(table_name = crate::schema::student_certificates)]
struct CertificateRow {
    id: Uuid,
    student_id: Uuid,
    course_id: String,
    title: String,
    completed_date: DateTime<Utc>,
    status: String,
    approved_by: Option<i64>,
    approved_date: Option<DateTime<Utc>>,
}

impl From<&Certificate> for CertificateRow {
    fn from(certificate: &Certificate) -> Self {
        CertificateRow {
            id: certificate.id,
            student_id: certificate.student_id,
            course_id: certificate.course_id.clone(),
            title: certificate.title.clone(),
            completed_date: certificate.completed_date,
            status: certificate.status.as_str().to_string(),
            approved_by: certificate.approved_by,
            approved_date: certificate.approved_date,
        }
    }
}

impl TryFrom<CertificateRow> for Certificate {
    type Error = AppError;

    fn try_from(row: CertificateRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<CertificateStatus>().map_err(|e| {
            error!("Certificate {} has an unreadable status: {}", row.id, e);
            AppError::InternalServerError(anyhow!(e))
        })?;
        Ok(Certificate {
            id: row.id,
            student_id: row.student_id,
            course_id: row.course_id,
            title: row.title,
            completed_date: row.completed_date,
            status,
            approved_by: row.approved_by,
            approved_date: row.approved_date,
        })
    }
}

struct PgRepository<'a> {
    conn: &'a mut PgConnection,
}

impl Repository for PgRepository<'_> {
    fn course_catalog(&mut self) -> Result<CourseCatalog, AppError> {
        let course_rows = courses_dsl::courses
            .order(courses_dsl::id.asc())
            .select((
                courses_dsl::id,
                courses_dsl::title,
                courses_dsl::certificate_threshold,
            ))
            .load::<(String, String, Option<i32>)>(self.conn)?;

        let video_rows = cv_dsl::course_videos
            .order((cv_dsl::course_id.asc(), cv_dsl::position.asc(), cv_dsl::video_id.asc()))
            .select((cv_dsl::course_id, cv_dsl::video_id))
            .load::<(String, String)>(self.conn)?;

        let aliases = aliases_dsl::course_aliases
            .select((aliases_dsl::alias, aliases_dsl::course_id))
            .load::<(String, String)>(self.conn)?;

        let mut videos_by_course: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (course_id, video_id) in video_rows {
            videos_by_course.entry(course_id).or_default().push(video_id);
        }

        let courses = course_rows
            .into_iter()
            .map(|(id, title, threshold)| Course {
                video_ids: videos_by_course.remove(&id).unwrap_or_default(),
                certificate_threshold: threshold.and_then(|t| u32::try_from(t).ok()),
                id,
                title,
            })
            .collect();

        Ok(CourseCatalog::new(courses, aliases))
    }

    fn find_class(&mut self, code: &str) -> Result<Option<ClassInfo>, AppError> {
        type ClassTuple = (String, i64, i64, String, String, String, String);

        let row = classes_dsl::classes
            .inner_join(teachers_dsl::teachers.on(classes_dsl::teacher_id.eq(teachers_dsl::id)))
            .inner_join(schools_dsl::schools.on(classes_dsl::school_id.eq(schools_dsl::id)))
            .filter(classes_dsl::code.eq(code))
            .select((
                classes_dsl::code,
                classes_dsl::teacher_id,
                classes_dsl::school_id,
                classes_dsl::program_name,
                teachers_dsl::display_name,
                teachers_dsl::email,
                schools_dsl::name,
            ))
            .first::<ClassTuple>(self.conn)
            .optional()?;

        Ok(row.map(|(code, teacher_id, school_id, program, teacher, email, school)| {
            ClassInfo {
                code,
                teacher_id,
                school_id,
                program_name: program,
                teacher_name: teacher,
                teacher_email: email,
                school_name: school,
            }
        }))
    }

    fn get_teacher(&mut self, teacher_id: i64) -> Result<Option<Teacher>, AppError> {
        Ok(teachers_dsl::teachers
            .find(teacher_id)
            .select(Teacher::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn get_device(&mut self, device_id: &str) -> Result<Option<Device>, AppError> {
        Ok(devices_dsl::devices
            .find(device_id)
            .select(Device::as_select())
            .for_update()
            .first(self.conn)
            .optional()?)
    }

    fn put_device(&mut self, device: &Device) -> Result<(), AppError> {
        diesel::insert_into(devices_dsl::devices)
            .values(device)
            .on_conflict(devices_dsl::device_id)
            .do_update()
            .set((
                devices_dsl::platform.eq(excluded(devices_dsl::platform)),
                devices_dsl::app_version.eq(excluded(devices_dsl::app_version)),
                devices_dsl::device_name.eq(excluded(devices_dsl::device_name)),
                devices_dsl::student_id.eq(coalesce_uuid(
                    devices_dsl::student_id,
                    excluded(devices_dsl::student_id),
                )),
                devices_dsl::last_seen.eq(greatest_ts(
                    devices_dsl::last_seen,
                    excluded(devices_dsl::last_seen),
                )),
            ))
            .execute(self.conn)?;
        Ok(())
    }

    fn get_student(&mut self, student_id: Uuid) -> Result<Option<Student>, AppError> {
        Ok(students_dsl::students
            .find(student_id)
            .select(Student::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn find_student_by_email(
        &mut self,
        teacher_id: i64,
        email: &str,
    ) -> Result<Option<Student>, AppError> {
        Ok(students_dsl::students
            .filter(students_dsl::teacher_id.eq(teacher_id))
            .filter(students_dsl::email.eq(email))
            .select(Student::as_select())
            .for_update()
            .first(self.conn)
            .optional()?)
    }

    fn insert_student(&mut self, student: &Student) -> Result<bool, AppError> {
        let inserted = diesel::insert_into(students_dsl::students)
            .values(student)
            .on_conflict_do_nothing()
            .execute(self.conn)?;
        Ok(inserted == 1)
    }

    fn put_student(&mut self, student: &Student) -> Result<(), AppError> {
        diesel::update(students_dsl::students.find(student.id))
            .set((
                students_dsl::first_name.eq(student.first_name.clone()),
                students_dsl::last_name.eq(student.last_name.clone()),
                students_dsl::email.eq(student.email.clone()),
                students_dsl::class_code.eq(student.class_code.clone()),
                students_dsl::last_active.eq(greatest_ts(
                    students_dsl::last_active,
                    student.last_active,
                )),
            ))
            .execute(self.conn)?;
        Ok(())
    }

    fn students_for_teacher(&mut self, teacher_id: i64) -> Result<Vec<Student>, AppError> {
        Ok(students_dsl::students
            .filter(students_dsl::teacher_id.eq(teacher_id))
            .order((
                students_dsl::last_name.asc(),
                students_dsl::first_name.asc(),
                students_dsl::id.asc(),
            ))
            .select(Student::as_select())
            .load(self.conn)?)
    }

    fn get_video_progress(
        &mut self,
        device_id: &str,
        video_id: &str,
    ) -> Result<Option<VideoProgressRecord>, AppError> {
        Ok(vp_dsl::video_progress
            .find((device_id, video_id))
            .select(VideoProgressRecord::as_select())
            .for_update()
            .first(self.conn)
            .optional()?)
    }

    fn put_video_progress(&mut self, record: &VideoProgressRecord) -> Result<(), AppError> {
        diesel::insert_into(vp_dsl::video_progress)
            .values(record)
            .on_conflict((vp_dsl::device_id, vp_dsl::video_id))
            .do_update()
            .set((
                vp_dsl::student_id.eq(coalesce_uuid(
                    vp_dsl::student_id,
                    excluded(vp_dsl::student_id),
                )),
                vp_dsl::last_position_sec.eq(excluded(vp_dsl::last_position_sec)),
                vp_dsl::watched_sec.eq(greatest_f64(
                    vp_dsl::watched_sec,
                    excluded(vp_dsl::watched_sec),
                )),
                vp_dsl::duration_sec.eq(greatest_f64(
                    vp_dsl::duration_sec,
                    excluded(vp_dsl::duration_sec),
                )),
                vp_dsl::completed.eq(vp_dsl::completed.or(excluded(vp_dsl::completed))),
                vp_dsl::completed_at.eq(coalesce_ts(
                    vp_dsl::completed_at,
                    excluded(vp_dsl::completed_at),
                )),
                vp_dsl::updated_at.eq(greatest_ts(
                    vp_dsl::updated_at,
                    excluded(vp_dsl::updated_at),
                )),
            ))
            .execute(self.conn)?;
        Ok(())
    }

    fn video_progress_for_device(
        &mut self,
        device_id: &str,
    ) -> Result<Vec<VideoProgressRecord>, AppError> {
        Ok(vp_dsl::video_progress
            .filter(vp_dsl::device_id.eq(device_id))
            .order(vp_dsl::video_id.asc())
            .select(VideoProgressRecord::as_select())
            .load(self.conn)?)
    }

    fn video_progress_for_student(
        &mut self,
        student_id: Uuid,
    ) -> Result<Vec<VideoProgressRecord>, AppError> {
        Ok(vp_dsl::video_progress
            .filter(vp_dsl::student_id.eq(student_id))
            .order((vp_dsl::video_id.asc(), vp_dsl::device_id.asc()))
            .select(VideoProgressRecord::as_select())
            .load(self.conn)?)
    }

    fn add_daily_activity(&mut self, increment: &DailyActivityRecord) -> Result<(), AppError> {
        diesel::insert_into(da_dsl::daily_activity)
            .values(increment)
            .on_conflict((da_dsl::device_id, da_dsl::activity_date))
            .do_update()
            .set((
                da_dsl::student_id.eq(coalesce_uuid(
                    da_dsl::student_id,
                    excluded(da_dsl::student_id),
                )),
                da_dsl::total_watched_sec
                    .eq(da_dsl::total_watched_sec + excluded(da_dsl::total_watched_sec)),
                da_dsl::videos_completed
                    .eq(da_dsl::videos_completed + excluded(da_dsl::videos_completed)),
                da_dsl::videos_started
                    .eq(da_dsl::videos_started + excluded(da_dsl::videos_started)),
                da_dsl::xp_earned.eq(da_dsl::xp_earned + excluded(da_dsl::xp_earned)),
            ))
            .execute(self.conn)?;
        Ok(())
    }

    fn daily_activity_for_device(
        &mut self,
        device_id: &str,
    ) -> Result<Vec<DailyActivityRecord>, AppError> {
        Ok(da_dsl::daily_activity
            .filter(da_dsl::device_id.eq(device_id))
            .order(da_dsl::activity_date.asc())
            .select(DailyActivityRecord::as_select())
            .load(self.conn)?)
    }

    fn daily_activity_for_student(
        &mut self,
        student_id: Uuid,
    ) -> Result<Vec<DailyActivityRecord>, AppError> {
        Ok(da_dsl::daily_activity
            .filter(da_dsl::student_id.eq(student_id))
            .order((da_dsl::activity_date.asc(), da_dsl::device_id.asc()))
            .select(DailyActivityRecord::as_select())
            .load(self.conn)?)
    }

    fn merge_orphans(
        &mut self,
        device_id: &str,
        student_id: Uuid,
    ) -> Result<MergeCounts, AppError> {
        let progress_records = diesel::update(
            vp_dsl::video_progress
                .filter(vp_dsl::device_id.eq(device_id))
                .filter(vp_dsl::student_id.is_null()),
        )
        .set(vp_dsl::student_id.eq(Some(student_id)))
        .execute(self.conn)?;

        let activity_records = diesel::update(
            da_dsl::daily_activity
                .filter(da_dsl::device_id.eq(device_id))
                .filter(da_dsl::student_id.is_null()),
        )
        .set(da_dsl::student_id.eq(Some(student_id)))
        .execute(self.conn)?;

        Ok(MergeCounts {
            progress_records,
            activity_records,
        })
    }

    fn get_certificate(&mut self, cert_id: Uuid) -> Result<Option<Certificate>, AppError> {
        sc_dsl::student_certificates
            .find(cert_id)
            .select(CertificateRow::as_select())
            .for_update()
            .first(self.conn)
            .optional()?
            .map(Certificate::try_from)
            .transpose()
    }

    fn find_certificate(
        &mut self,
        student_id: Uuid,
        course_id: &str,
    ) -> Result<Option<Certificate>, AppError> {
        sc_dsl::student_certificates
            .filter(sc_dsl::student_id.eq(student_id))
            .filter(sc_dsl::course_id.eq(course_id))
            .select(CertificateRow::as_select())
            .first(self.conn)
            .optional()?
            .map(Certificate::try_from)
            .transpose()
    }

    fn insert_certificate(&mut self, certificate: &Certificate) -> Result<bool, AppError> {
        let inserted = diesel::insert_into(sc_dsl::student_certificates)
            .values(&CertificateRow::from(certificate))
            .on_conflict_do_nothing()
            .execute(self.conn)?;
        Ok(inserted == 1)
    }

    fn put_certificate(&mut self, certificate: &Certificate) -> Result<(), AppError> {
        diesel::update(sc_dsl::student_certificates.find(certificate.id))
            .set((
                sc_dsl::status.eq(certificate.status.as_str()),
                sc_dsl::approved_by.eq(certificate.approved_by),
                sc_dsl::approved_date.eq(certificate.approved_date),
            ))
            .execute(self.conn)?;
        Ok(())
    }

    fn certificates_for_teacher(&mut self, teacher_id: i64) -> Result<Vec<Certificate>, AppError> {
        sc_dsl::student_certificates
            .inner_join(students_dsl::students.on(sc_dsl::student_id.eq(students_dsl::id)))
            .filter(students_dsl::teacher_id.eq(teacher_id))
            .order((sc_dsl::completed_date.asc(), sc_dsl::id.asc()))
            .select(CertificateRow::as_select())
            .load::<CertificateRow>(self.conn)?
            .into_iter()
            .map(Certificate::try_from)
            .collect()
    }
}
