use super::helper;
use crate::aggregate::StudentSummary;
use crate::errors::AppError;
use crate::identity;
use crate::ingest;
use crate::model::device::{
    DeviceProgressResponse, JoinClassResponse, SyncProgressResponse, VideoProgressResponse,
};
use crate::model::records::Device;
use crate::payloads::device::{
    JoinClassPayload, RegisterDevicePayload, SyncProgressPayload, UpdateVideoProgressPayload,
};
use crate::response::ApiResponse;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::Json;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

/// Registers a device or refreshes its metadata and last-seen time.
///
/// Parameters
/// * device_id as `String`
/// * platform as `String`
/// * app_version as `String`
/// * device_name as `Option<String>`
///
/// Returns (wrapped in `ApiResponse`)
/// * `true` if succeeded (200)
/// * `None` if a required field is blank (400)
/// * `None` if failed (500)
#[instrument(skip(state, payload))]
pub async fn register_device(
    State(state): State<AppState>,
    Json(payload): Json<RegisterDevicePayload>,
) -> Result<ApiResponse<bool>, AppError> {
    info!("Registering device {}", payload.device_id);
    debug!("Register device payload: {:?}", payload);

    let device_id = payload.device_id.trim().to_string();
    if device_id.is_empty() || payload.platform.trim().is_empty() {
        warn!("Rejected device registration with blank device_id or platform");
        return Err(AppError::BadRequest(
            "device_id and platform must not be empty".to_string(),
        ));
    }

    let now = Utc::now();
    helper::run_transaction(&state.store, move |repo| {
        let device = match repo.get_device(&device_id)? {
            Some(existing) => Device {
                platform: payload.platform.trim().to_string(),
                app_version: payload.app_version.trim().to_string(),
                device_name: payload.device_name.clone().or(existing.device_name.clone()),
                last_seen: now,
                ..existing
            },
            None => {
                info!("First registration of device {}", device_id);
                Device {
                    device_name: payload.device_name.clone(),
                    ..Device::new(
                        device_id.as_str(),
                        payload.platform.trim(),
                        payload.app_version.trim(),
                        now,
                    )
                }
            }
        };
        repo.put_device(&device)
    })
    .await?;

    Ok(ApiResponse::ok(true))
}

/// Joins a device to a class, creating or reusing the student and merging the device's
/// anonymous history into it.
///
/// Parameters
/// * device_id as `String`
/// * class_code as `String`
/// * first_name as `String`
/// * last_name as `String`
/// * email as `Option<String>`
///
/// Returns (wrapped in `ApiResponse`)
/// * `JoinClassResponse` if succeeded (200)
/// * `None` if a required field is blank (400)
/// * `None` with error `ClassNotFound` if no class has this code, whatever its shape (404)
/// * `None` if storage is unavailable (503)
/// * `None` if failed (500)
#[instrument(skip(state, payload))]
pub async fn join_class(
    State(state): State<AppState>,
    Json(payload): Json<JoinClassPayload>,
) -> Result<ApiResponse<JoinClassResponse>, AppError> {
    info!(
        "Device {} joining class {}",
        payload.device_id, payload.class_code
    );
    debug!("Join class payload: {:?}", payload);

    let threshold = state.settings.default_certificate_threshold;
    let outcome = helper::run_transaction(&state.store, move |repo| {
        identity::join_class(repo, &payload, threshold, Utc::now())
    })
    .await?;

    info!(
        "Device joined as student {} (created: {})",
        outcome.student.id, outcome.created
    );
    Ok(ApiResponse::ok(JoinClassResponse::from(outcome)))
}

/// Merges one progress report into the stored record for its device and video.
///
/// Parameters
/// * device_id as `String`
/// * video_id as `String`
/// * course_id as `String` (any accepted spelling)
/// * last_position_sec, watched_sec, total_duration_sec as `f64`
/// * completed_hint as `bool`
/// * updated_at as `Option<DateTime<Utc>>`
/// * local_date as `Option<NaiveDate>`
///
/// Returns (wrapped in `ApiResponse`)
/// * `VideoProgressResponse` if succeeded (200)
/// * `None` if an id is blank (400)
/// * `None` if the duration or course is invalid (422)
/// * `None` if storage is unavailable (503)
/// * `None` if failed (500)
#[instrument(skip(state, payload))]
pub async fn update_video_progress(
    State(state): State<AppState>,
    Json(payload): Json<UpdateVideoProgressPayload>,
) -> Result<ApiResponse<VideoProgressResponse>, AppError> {
    info!(
        "Progress update from device {} for video {}",
        payload.device_id, payload.update.video_id
    );
    debug!("Update video progress payload: {:?}", payload);

    let threshold = state.settings.default_certificate_threshold;
    let outcome = helper::run_transaction(&state.store, move |repo| {
        ingest::ingest_update(
            repo,
            &payload.device_id,
            &payload.update,
            threshold,
            Utc::now(),
        )
    })
    .await?;

    debug!(
        "Stored progress for video {}: {:.1}s watched, completed: {}",
        outcome.record.video_id, outcome.record.watched_sec, outcome.record.completed
    );
    Ok(ApiResponse::ok(VideoProgressResponse::from(outcome)))
}

/// Applies a batch of queued progress reports, one transaction per item.
///
/// Parameters
/// * device_id as `String`
/// * updates as `Vec<ProgressUpdate>`
///
/// Returns (wrapped in `ApiResponse`)
/// * `SyncProgressResponse` with a result per item if succeeded (200)
/// * `None` if device_id is blank (400)
#[instrument(skip(state, payload))]
pub async fn sync_progress(
    State(state): State<AppState>,
    Json(payload): Json<SyncProgressPayload>,
) -> Result<ApiResponse<SyncProgressResponse>, AppError> {
    info!(
        "Sync of {} updates from device {}",
        payload.updates.len(),
        payload.device_id
    );

    let threshold = state.settings.default_certificate_threshold;
    let response = ingest::sync_progress(&state.store, threshold, payload).await?;
    Ok(ApiResponse::ok(response))
}

/// Lists a device's progress and the state derived from it.
///
/// Parameters
/// * device_id as `String` (path)
///
/// Returns (wrapped in `ApiResponse`)
/// * `DeviceProgressResponse` if succeeded (200)
/// * `None` if the device is unknown (404)
/// * `None` if failed (500)
#[instrument(skip(state))]
pub async fn get_device_progress(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<ApiResponse<DeviceProgressResponse>, AppError> {
    info!("Fetching progress for device {}", device_id);

    let window = state.settings.streak_window_days;
    let today = helper::today();
    let response = helper::run_transaction(&state.store, move |repo| {
        let device = repo
            .get_device(&device_id)?
            .ok_or_else(|| AppError::NotFound(format!("Device {} not found", device_id)))?;

        let (records, activity) = match device.student_id {
            Some(student_id) => (
                repo.video_progress_for_student(student_id)?,
                repo.daily_activity_for_student(student_id)?,
            ),
            None => (
                repo.video_progress_for_device(&device_id)?,
                repo.daily_activity_for_device(&device_id)?,
            ),
        };
        let catalog = repo.course_catalog()?;
        let summary = StudentSummary::derive(&records, &activity, &catalog, today, window);

        Ok(DeviceProgressResponse {
            student_id: device.student_id,
            device,
            records,
            summary,
        })
    })
    .await?;

    info!(
        "Device {} has {} progress records",
        response.device.device_id,
        response.records.len()
    );
    Ok(ApiResponse::ok(response))
}
