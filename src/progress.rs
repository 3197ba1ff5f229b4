//! Watch-time accumulation rules shared by the device ledger and server ingestion.

use crate::model::records::VideoProgressRecord;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Largest position jump between two ticks still counted as watched time.
pub const MAX_TICK_DELTA_SEC: f64 = 3.0;
/// Watched fraction that completes a video on its own.
pub const COMPLETION_FRACTION: f64 = 0.85;
/// Distance from the end within which the lower fraction applies.
pub const NEAR_END_WINDOW_SEC: f64 = 30.0;
/// Watched fraction that completes a video once the viewer is near the end.
pub const NEAR_END_FRACTION: f64 = 0.70;

/// Position advance counted as watched time for a tick, or 0 for seeks and paused ticks.
pub fn accepted_delta(prev_position: f64, current_time: f64, is_playing: bool) -> f64 {
    let delta = current_time - prev_position;
    if is_playing && (0.0..=MAX_TICK_DELTA_SEC).contains(&delta) {
        delta
    } else {
        0.0
    }
}

/// Adds `delta` to `prev_watched` bounded by `duration`; never returns less than `prev_watched`.
pub fn accumulate_watched(prev_watched: f64, delta: f64, duration: f64) -> f64 {
    (prev_watched + delta).min(duration).max(prev_watched)
}

pub fn meets_completion(watched: f64, duration: f64, current_time: f64) -> bool {
    if duration <= 0.0 {
        return false;
    }
    let fraction = watched / duration;
    fraction >= COMPLETION_FRACTION
        || (duration - current_time <= NEAR_END_WINDOW_SEC && fraction >= NEAR_END_FRACTION)
}

/// A progress report pushed by a device, with the course already canonicalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedProgress {
    pub device_id: String,
    pub video_id: String,
    pub course_id: String,
    pub student_id: Option<Uuid>,
    pub last_position_sec: f64,
    pub watched_sec: f64,
    pub duration_sec: f64,
    pub completed_hint: bool,
    pub reported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub record: VideoProgressRecord,
    /// Increase of stored watched time caused by this report.
    pub watched_increase: f64,
    pub created: bool,
    pub newly_completed: bool,
}

/// Folds a device report into the stored record for the same `(device, video)` key.
///
/// The stored record is authoritative for monotonic fields, so replays, duplicates and
/// reordered reports can never lower watched time or revert completion. The playback
/// position follows last-writer-wins on the report timestamp.
pub fn merge_reported(
    stored: Option<&VideoProgressRecord>,
    report: &ReportedProgress,
) -> MergeOutcome {
    let created = stored.is_none();
    let prev_watched = stored.map_or(0.0, |r| r.watched_sec);
    let prev_completed = stored.is_some_and(|r| r.completed);

    let duration = stored.map_or(report.duration_sec, |r| {
        r.duration_sec.max(report.duration_sec)
    });
    let reported_watched = report.watched_sec.max(0.0).min(duration);
    let watched = prev_watched.max(reported_watched);

    let position_is_newer = stored.is_none_or(|r| report.reported_at >= r.updated_at);
    let last_position = if position_is_newer {
        report.last_position_sec.clamp(0.0, duration)
    } else {
        stored.map_or(0.0, |r| r.last_position_sec)
    };

    let hint_is_plausible =
        report.completed_hint && duration > 0.0 && watched / duration >= NEAR_END_FRACTION;
    let completed = prev_completed
        || meets_completion(watched, duration, report.last_position_sec)
        || hint_is_plausible;

    let completed_at = match stored.and_then(|r| r.completed_at) {
        Some(at) => Some(at),
        None if completed => Some(report.reported_at),
        None => None,
    };

    let updated_at =
        stored.map_or(report.reported_at, |r| r.updated_at.max(report.reported_at));

    let record = VideoProgressRecord {
        device_id: report.device_id.clone(),
        video_id: report.video_id.clone(),
        course_id: stored.map_or_else(|| report.course_id.clone(), |r| r.course_id.clone()),
        student_id: stored.and_then(|r| r.student_id).or(report.student_id),
        last_position_sec: last_position,
        watched_sec: watched,
        duration_sec: duration,
        completed,
        completed_at,
        updated_at,
    };

    MergeOutcome {
        watched_increase: watched - prev_watched,
        created,
        newly_completed: completed && !prev_completed,
        record,
    }
}
