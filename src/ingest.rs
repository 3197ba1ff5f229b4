//! Server-side ingestion of device progress reports.
//!
//! Each report is merged against the stored record inside its own transaction, so a
//! replayed or reordered report can never lower watched time or undo a completion, and a
//! bad item in a batch only rejects that item.

use crate::aggregate::video_xp;
use crate::certificate;
use crate::errors::AppError;
use crate::identity::UNKNOWN_PLATFORM;
use crate::model::device::{SyncItemResult, SyncProgressResponse, VideoProgressResponse};
use crate::model::records::{Certificate, DailyActivityRecord, Device, VideoProgressRecord};
use crate::payloads::device::{ProgressUpdate, SyncProgressPayload};
use crate::progress::{ReportedProgress, merge_reported};
use crate::store::{Repository, Store};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub record: VideoProgressRecord,
    pub newly_completed: bool,
    pub certificates_issued: Vec<Certificate>,
}

/// Rejects reports with missing ids or unusable numbers.
pub fn validate_update(device_id: &str, update: &ProgressUpdate) -> Result<(), AppError> {
    if device_id.trim().is_empty() {
        return Err(AppError::BadRequest("device_id must not be empty".to_string()));
    }
    if update.video_id.trim().is_empty() {
        return Err(AppError::BadRequest("video_id must not be empty".to_string()));
    }
    if update.course_id.trim().is_empty() {
        return Err(AppError::BadRequest("course_id must not be empty".to_string()));
    }
    let numbers = [
        update.last_position_sec,
        update.watched_sec,
        update.total_duration_sec,
    ];
    if numbers.iter().any(|n| !n.is_finite()) {
        return Err(AppError::UnprocessableEntity(
            "Progress values must be finite numbers".to_string(),
        ));
    }
    if update.total_duration_sec <= 0.0 {
        return Err(AppError::UnprocessableEntity(format!(
            "Invalid duration {} for video {}",
            update.total_duration_sec, update.video_id
        )));
    }
    Ok(())
}

/// Applies one progress report from `device_id`.
pub fn ingest_update(
    repo: &mut dyn Repository,
    device_id: &str,
    update: &ProgressUpdate,
    default_certificate_threshold: u32,
    now: DateTime<Utc>,
) -> Result<IngestOutcome, AppError> {
    validate_update(device_id, update)?;
    let device_id = device_id.trim();
    let video_id = update.video_id.trim();

    let catalog = repo.course_catalog()?;
    let course_id = catalog.canonicalize(&update.course_id).ok_or_else(|| {
        AppError::UnprocessableEntity(format!("Unknown course '{}'", update.course_id))
    })?;

    let mut device = repo
        .get_device(device_id)?
        .unwrap_or_else(|| Device::new(device_id, UNKNOWN_PLATFORM, UNKNOWN_PLATFORM, now));
    device.last_seen = now;
    repo.put_device(&device)?;
    // A join may have bound the device while the upsert waited on its row lock.
    let student_id = repo
        .get_device(device_id)?
        .and_then(|stored| stored.student_id)
        .or(device.student_id);

    let stored = repo.get_video_progress(device_id, video_id)?;
    let report = ReportedProgress {
        device_id: device_id.to_string(),
        video_id: video_id.to_string(),
        course_id: course_id.clone(),
        student_id,
        last_position_sec: update.last_position_sec,
        watched_sec: update.watched_sec,
        duration_sec: update.total_duration_sec,
        completed_hint: update.completed_hint,
        // A device clock running ahead must not pin the playback position.
        reported_at: update.updated_at.map_or(now, |at| at.min(now)),
    };
    let outcome = merge_reported(stored.as_ref(), &report);
    repo.put_video_progress(&outcome.record)?;

    let xp_gain = video_xp(&outcome.record).saturating_sub(stored.as_ref().map_or(0, video_xp));
    if outcome.watched_increase > 0.0 || outcome.created || outcome.newly_completed || xp_gain > 0
    {
        let day = update.local_date.unwrap_or_else(|| now.date_naive());
        let increment = DailyActivityRecord {
            total_watched_sec: outcome.watched_increase,
            videos_completed: i32::from(outcome.newly_completed),
            videos_started: i32::from(outcome.created),
            xp_earned: i32::try_from(xp_gain).unwrap_or(i32::MAX),
            ..DailyActivityRecord::empty(device_id, day, student_id)
        };
        repo.add_daily_activity(&increment)?;
    } else {
        debug!(
            "Report for {}/{} changed nothing countable",
            device_id, video_id
        );
    }

    let mut certificates_issued = Vec::new();
    if let Some(student_id) = student_id {
        if let Some(mut student) = repo.get_student(student_id)? {
            student.last_active = student.last_active.max(now);
            repo.put_student(&student)?;
        }
        if outcome.newly_completed {
            info!(
                "Video {} completed by student {} on device {}",
                video_id, student_id, device_id
            );
            let issued = certificate::check_course(
                repo,
                &catalog,
                default_certificate_threshold,
                student_id,
                &course_id,
                now,
            )?;
            certificates_issued.extend(issued);
        }
    }

    Ok(IngestOutcome {
        record: outcome.record,
        newly_completed: outcome.newly_completed,
        certificates_issued,
    })
}

/// Applies a batch item by item, each in its own transaction.
pub async fn sync_progress(
    store: &Store,
    default_certificate_threshold: u32,
    payload: SyncProgressPayload,
) -> Result<SyncProgressResponse, AppError> {
    let device_id = payload.device_id.trim().to_string();
    if device_id.is_empty() {
        return Err(AppError::BadRequest("device_id must not be empty".to_string()));
    }

    let mut results = Vec::with_capacity(payload.updates.len());
    for update in payload.updates {
        let video_id = update.video_id.clone();
        let item_device = device_id.clone();
        let applied = store
            .transact(move |repo| {
                ingest_update(
                    repo,
                    &item_device,
                    &update,
                    default_certificate_threshold,
                    Utc::now(),
                )
            })
            .await;

        results.push(match applied {
            Ok(outcome) => SyncItemResult::accepted(VideoProgressResponse::from(outcome)),
            Err(err) => {
                warn!(
                    "Rejected sync item {} from device {}: {}",
                    video_id, device_id, err
                );
                SyncItemResult::rejected(video_id, &err)
            }
        });
    }

    let response = SyncProgressResponse::new(device_id, results);
    info!(
        "Sync for device {}: {} accepted, {} rejected",
        response.device_id, response.accepted, response.rejected
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::{Course, CourseCatalog};
    use crate::model::records::{ClassInfo, MergeCounts, Student, Teacher};
    use uuid::Uuid;
    use crate::store::{MemoryStore, SeedData};
    use chrono::{Duration, NaiveDate, TimeZone};
    use float_cmp::approx_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 8, 18, 0, 0).unwrap()
    }

    fn store() -> MemoryStore {
        MemoryStore::with_seed(SeedData {
            courses: vec![Course {
                id: "course-1".to_string(),
                title: "EV Fundamentals".to_string(),
                video_ids: vec!["v1".to_string(), "v2".to_string()],
                certificate_threshold: None,
            }],
            ..SeedData::default()
        })
    }

    fn update(watched: f64, position: f64) -> ProgressUpdate {
        ProgressUpdate {
            video_id: "v1".to_string(),
            course_id: "Course_1".to_string(),
            last_position_sec: position,
            watched_sec: watched,
            total_duration_sec: 600.0,
            completed_hint: false,
            updated_at: None,
            local_date: None,
        }
    }

    fn apply(store: &MemoryStore, update: ProgressUpdate) -> Result<IngestOutcome, AppError> {
        store.transact(move |repo| ingest_update(repo, "dev-1", &update, 5, now()))
    }

    /// Serves a stale, unbound first read of the device while a join binds it underneath.
    struct JoinDuringUpsert<'a> {
        inner: &'a mut dyn Repository,
        bind_to: Uuid,
        device_reads: usize,
    }

    impl Repository for JoinDuringUpsert<'_> {
        fn course_catalog(&mut self) -> Result<CourseCatalog, AppError> {
            self.inner.course_catalog()
        }
        fn find_class(&mut self, code: &str) -> Result<Option<ClassInfo>, AppError> {
            self.inner.find_class(code)
        }
        fn get_teacher(&mut self, teacher_id: i64) -> Result<Option<Teacher>, AppError> {
            self.inner.get_teacher(teacher_id)
        }
        fn get_device(&mut self, device_id: &str) -> Result<Option<Device>, AppError> {
            self.device_reads += 1;
            if self.device_reads == 1 {
                return Ok(None);
            }
            self.inner.get_device(device_id)
        }
        fn put_device(&mut self, device: &Device) -> Result<(), AppError> {
            let mut joined = device.clone();
            joined.student_id = Some(self.bind_to);
            self.inner.put_device(&joined)?;
            self.inner.put_device(device)
        }
        fn get_student(&mut self, student_id: Uuid) -> Result<Option<Student>, AppError> {
            self.inner.get_student(student_id)
        }
        fn find_student_by_email(
            &mut self,
            teacher_id: i64,
            email: &str,
        ) -> Result<Option<Student>, AppError> {
            self.inner.find_student_by_email(teacher_id, email)
        }
        fn insert_student(&mut self, student: &Student) -> Result<bool, AppError> {
            self.inner.insert_student(student)
        }
        fn put_student(&mut self, student: &Student) -> Result<(), AppError> {
            self.inner.put_student(student)
        }
        fn students_for_teacher(&mut self, teacher_id: i64) -> Result<Vec<Student>, AppError> {
            self.inner.students_for_teacher(teacher_id)
        }
        fn get_video_progress(
            &mut self,
            device_id: &str,
            video_id: &str,
        ) -> Result<Option<VideoProgressRecord>, AppError> {
            self.inner.get_video_progress(device_id, video_id)
        }
        fn put_video_progress(&mut self, record: &VideoProgressRecord) -> Result<(), AppError> {
            self.inner.put_video_progress(record)
        }
        fn video_progress_for_device(
            &mut self,
            device_id: &str,
        ) -> Result<Vec<VideoProgressRecord>, AppError> {
            self.inner.video_progress_for_device(device_id)
        }
        fn video_progress_for_student(
            &mut self,
            student_id: Uuid,
        ) -> Result<Vec<VideoProgressRecord>, AppError> {
            self.inner.video_progress_for_student(student_id)
        }
        fn add_daily_activity(&mut self, increment: &DailyActivityRecord) -> Result<(), AppError> {
            self.inner.add_daily_activity(increment)
        }
        fn daily_activity_for_device(
            &mut self,
            device_id: &str,
        ) -> Result<Vec<DailyActivityRecord>, AppError> {
            self.inner.daily_activity_for_device(device_id)
        }
        fn daily_activity_for_student(
            &mut self,
            student_id: Uuid,
        ) -> Result<Vec<DailyActivityRecord>, AppError> {
            self.inner.daily_activity_for_student(student_id)
        }
        fn merge_orphans(
            &mut self,
            device_id: &str,
            student_id: Uuid,
        ) -> Result<MergeCounts, AppError> {
            self.inner.merge_orphans(device_id, student_id)
        }
        fn get_certificate(&mut self, cert_id: Uuid) -> Result<Option<Certificate>, AppError> {
            self.inner.get_certificate(cert_id)
        }
        fn find_certificate(
            &mut self,
            student_id: Uuid,
            course_id: &str,
        ) -> Result<Option<Certificate>, AppError> {
            self.inner.find_certificate(student_id, course_id)
        }
        fn insert_certificate(&mut self, certificate: &Certificate) -> Result<bool, AppError> {
            self.inner.insert_certificate(certificate)
        }
        fn put_certificate(&mut self, certificate: &Certificate) -> Result<(), AppError> {
            self.inner.put_certificate(certificate)
        }
        fn certificates_for_teacher(
            &mut self,
            teacher_id: i64,
        ) -> Result<Vec<Certificate>, AppError> {
            self.inner.certificates_for_teacher(teacher_id)
        }
    }

    fn activity(store: &MemoryStore) -> Vec<DailyActivityRecord> {
        store
            .transact(|repo| repo.daily_activity_for_device("dev-1"))
            .unwrap()
    }

    #[test]
    fn stored_watch_time_never_decreases() {
        let store = store();
        apply(&store, update(300.0, 300.0)).unwrap();
        let outcome = apply(&store, update(120.0, 10.0)).unwrap();
        assert!(approx_eq!(f64, outcome.record.watched_sec, 300.0));
        assert!(approx_eq!(f64, outcome.record.last_position_sec, 10.0));
        assert_eq!(outcome.record.course_id, "course-1");

        let days = activity(&store);
        assert_eq!(days.len(), 1);
        assert!(approx_eq!(f64, days[0].total_watched_sec, 300.0));
        assert_eq!(days[0].videos_started, 1);
    }

    #[test]
    fn replayed_report_counts_once() {
        let store = store();
        let first = apply(&store, update(520.0, 540.0)).unwrap();
        let replay = apply(&store, update(520.0, 540.0)).unwrap();
        assert!(first.newly_completed);
        assert!(!replay.newly_completed);

        let days = activity(&store);
        assert_eq!(days[0].videos_completed, 1);
        assert_eq!(days[0].xp_earned, 50);
    }

    #[test]
    fn local_date_picks_the_activity_bucket() {
        let store = store();
        let local = NaiveDate::from_ymd_opt(2025, 4, 9).unwrap();
        let mut report = update(90.0, 90.0);
        report.local_date = Some(local);
        apply(&store, report).unwrap();
        assert_eq!(activity(&store)[0].activity_date, local);
    }

    #[test]
    fn future_device_clock_does_not_pin_position() {
        let store = store();
        let mut ahead = update(100.0, 100.0);
        ahead.updated_at = Some(now() + Duration::days(2));
        apply(&store, ahead).unwrap();

        let later = apply(&store, update(100.0, 20.0)).unwrap();
        assert!(approx_eq!(f64, later.record.last_position_sec, 20.0));
    }

    #[test]
    fn invalid_reports_are_rejected_without_side_effects() {
        let store = store();
        let mut zero = update(10.0, 10.0);
        zero.total_duration_sec = 0.0;
        assert!(matches!(
            apply(&store, zero),
            Err(AppError::UnprocessableEntity(_))
        ));

        let mut unknown = update(10.0, 10.0);
        unknown.course_id = "Solar Basics".to_string();
        assert!(matches!(
            apply(&store, unknown),
            Err(AppError::UnprocessableEntity(_))
        ));

        let mut blank = update(10.0, 10.0);
        blank.video_id = " ".to_string();
        assert!(matches!(apply(&store, blank), Err(AppError::BadRequest(_))));

        let device = store.transact(|repo| repo.get_device("dev-1")).unwrap();
        assert!(device.is_none());
    }

    #[test]
    fn first_report_racing_a_join_is_tagged_with_the_new_binding() {
        let store = store();
        let student_id = Uuid::from_u128(0x5eed);

        store
            .transact(move |repo| {
                let mut racing = JoinDuringUpsert {
                    inner: repo,
                    bind_to: student_id,
                    device_reads: 0,
                };
                ingest_update(&mut racing, "dev-1", &update(120.0, 120.0), 5, now())
            })
            .unwrap();

        let record = store
            .transact(|repo| repo.get_video_progress("dev-1", "v1"))
            .unwrap()
            .unwrap();
        assert_eq!(record.student_id, Some(student_id));
        let buckets = activity(&store);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].student_id, Some(student_id));
    }
}
