use crate::errors::AppError;
use crate::model::records::{CertificateStatus, Teacher};
use crate::store::{Repository, Store};
use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

pub(super) async fn run_transaction<T, F>(store: &Store, work: F) -> Result<T, AppError>
where
    F: FnOnce(&mut dyn Repository) -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    debug!("Opening store transaction");
    let result = store.transact(work).await;
    match &result {
        Ok(_) => debug!("Store transaction committed"),
        Err(err) => debug!("Store transaction rolled back: {}", err),
    }
    result
}

pub(super) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub(super) fn require_teacher(
    repo: &mut dyn Repository,
    teacher_id: i64,
) -> Result<Teacher, AppError> {
    repo.get_teacher(teacher_id)?.ok_or_else(|| {
        warn!("Teacher {} not found", teacher_id);
        AppError::NotFound(format!("Teacher {} not found", teacher_id))
    })
}

pub(super) fn parse_status_filter(
    raw: Option<&str>,
) -> Result<Option<CertificateStatus>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty() && *s != "all") {
        None => Ok(None),
        Some(value) => value
            .parse::<CertificateStatus>()
            .map(Some)
            .map_err(AppError::BadRequest),
    }
}
