//! Device-resident progress ledger.
//!
//! The ledger accumulates watch facts on one device before (and after) the device is bound
//! to a student. It is single-writer: the player feeds it ticks sequentially, and the sync
//! loop drains [`ProgressLedger::pending_updates`] whenever the network is available.

use crate::aggregate::{StudentSummary, video_xp};
use crate::course::CourseCatalog;
use crate::model::records::{DailyActivityRecord, VideoProgressRecord};
use crate::payloads::device::{ProgressUpdate, SyncProgressPayload};
use crate::progress::{accepted_delta, accumulate_watched, meets_completion};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One playback position sample from the player.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchTick {
    pub video_id: String,
    pub course_id: String,
    pub current_time_sec: f64,
    pub duration_sec: f64,
    pub is_playing: bool,
}

#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("Invalid duration {duration}s reported for video {video_id}")]
    InvalidDuration { video_id: String, duration: f64 },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProgressLedger {
    device_id: String,
    student_id: Option<Uuid>,
    videos: BTreeMap<String, VideoProgressRecord>,
    daily: BTreeMap<NaiveDate, DailyActivityRecord>,
    /// Videos changed since the last acknowledged sync, with the local day of the change.
    #[serde(default)]
    unsynced: BTreeMap<String, NaiveDate>,
}

impl ProgressLedger {
    pub fn new(device_id: impl Into<String>) -> Self {
        ProgressLedger {
            device_id: device_id.into(),
            student_id: None,
            videos: BTreeMap::new(),
            daily: BTreeMap::new(),
            unsynced: BTreeMap::new(),
        }
    }

    /// Ledger for a fresh installation, with a newly generated device id.
    pub fn for_new_install() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn student_id(&self) -> Option<Uuid> {
        self.student_id
    }

    pub fn progress(&self, video_id: &str) -> Option<&VideoProgressRecord> {
        self.videos.get(video_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &VideoProgressRecord> {
        self.videos.values()
    }

    pub fn daily_activity(&self, date: NaiveDate) -> Option<&DailyActivityRecord> {
        self.daily.get(&date)
    }

    /// Applies one player tick. An invalid duration rejects the tick and leaves the ledger
    /// untouched.
    pub fn record_progress<Tz: TimeZone>(
        &mut self,
        tick: &WatchTick,
        now: &DateTime<Tz>,
    ) -> Result<VideoProgressRecord, LedgerError> {
        if !tick.duration_sec.is_finite() || tick.duration_sec <= 0.0 {
            warn!(
                "Rejecting tick for video {} with invalid duration {}",
                tick.video_id, tick.duration_sec
            );
            return Err(LedgerError::InvalidDuration {
                video_id: tick.video_id.clone(),
                duration: tick.duration_sec,
            });
        }

        let today = now.date_naive();
        let now = now.with_timezone(&Utc);
        let previous = self.videos.get(&tick.video_id);

        let prev_position = previous.map_or(0.0, |r| r.last_position_sec);
        let prev_watched = previous.map_or(0.0, |r| r.watched_sec);
        let prev_completed = previous.is_some_and(|r| r.completed);
        let prev_xp = previous.map_or(0, video_xp);

        let delta = accepted_delta(prev_position, tick.current_time_sec, tick.is_playing);
        let watched = accumulate_watched(prev_watched, delta, tick.duration_sec);
        let completed = prev_completed
            || meets_completion(watched, tick.duration_sec, tick.current_time_sec);

        let record = VideoProgressRecord {
            device_id: self.device_id.clone(),
            video_id: tick.video_id.clone(),
            course_id: tick.course_id.clone(),
            student_id: previous.and_then(|r| r.student_id).or(self.student_id),
            last_position_sec: tick.current_time_sec.max(0.0),
            watched_sec: watched,
            duration_sec: previous.map_or(tick.duration_sec, |r| {
                r.duration_sec.max(tick.duration_sec)
            }),
            completed,
            completed_at: previous
                .and_then(|r| r.completed_at)
                .or_else(|| completed.then_some(now)),
            updated_at: now,
        };

        let created = previous.is_none();
        let newly_completed = completed && !prev_completed;
        if delta > 0.0 || created || newly_completed {
            let xp_gain = video_xp(&record).saturating_sub(prev_xp);
            let bucket = self.daily.entry(today).or_insert_with(|| {
                DailyActivityRecord::empty(self.device_id.clone(), today, self.student_id)
            });
            bucket.total_watched_sec += delta;
            bucket.videos_started += i32::from(created);
            bucket.videos_completed += i32::from(newly_completed);
            bucket.xp_earned += xp_gain as i32;
        }

        if newly_completed {
            info!("Video {} completed on device {}", record.video_id, self.device_id);
        }
        debug!(
            "Recorded tick for video {}: delta {}s, watched {}s",
            record.video_id, delta, record.watched_sec
        );

        self.videos.insert(tick.video_id.clone(), record.clone());
        self.unsynced.insert(tick.video_id.clone(), today);
        Ok(record)
    }

    /// Binds the ledger to a student and tags every orphaned local record. The first binding
    /// wins; returns how many records were tagged.
    pub fn bind_student(&mut self, student_id: Uuid) -> usize {
        let bound = *self.student_id.get_or_insert(student_id);
        let mut tagged = 0;
        for record in self.videos.values_mut().filter(|r| r.student_id.is_none()) {
            record.student_id = Some(bound);
            tagged += 1;
        }
        for record in self.daily.values_mut().filter(|r| r.student_id.is_none()) {
            record.student_id = Some(bound);
            tagged += 1;
        }
        tagged
    }

    /// Updates not yet acknowledged by the server.
    pub fn pending_updates(&self) -> SyncProgressPayload {
        let updates = self
            .unsynced
            .iter()
            .filter_map(|(video_id, local_date)| {
                self.videos.get(video_id).map(|record| ProgressUpdate {
                    video_id: record.video_id.clone(),
                    course_id: record.course_id.clone(),
                    last_position_sec: record.last_position_sec,
                    watched_sec: record.watched_sec,
                    total_duration_sec: record.duration_sec,
                    completed_hint: record.completed,
                    updated_at: Some(record.updated_at),
                    local_date: Some(*local_date),
                })
            })
            .collect();
        SyncProgressPayload {
            device_id: self.device_id.clone(),
            updates,
        }
    }

    /// Clears acknowledged updates. A video that changed again after the acknowledged
    /// snapshot stays pending.
    pub fn mark_synced(&mut self, acknowledged: &[ProgressUpdate]) {
        for update in acknowledged {
            let still_current = self
                .videos
                .get(&update.video_id)
                .is_some_and(|record| Some(record.updated_at) <= update.updated_at);
            if still_current {
                self.unsynced.remove(&update.video_id);
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.unsynced.is_empty()
    }

    /// Folds server-side records (e.g. after a reinstall) into the ledger without lowering
    /// watched time or reverting completion.
    pub fn absorb_remote<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a VideoProgressRecord>,
    ) {
        for remote in records {
            match self.videos.get_mut(&remote.video_id) {
                Some(local) => {
                    local.duration_sec = local.duration_sec.max(remote.duration_sec);
                    local.watched_sec = local.watched_sec.max(remote.watched_sec);
                    if remote.completed && !local.completed {
                        local.completed = true;
                        local.completed_at = remote.completed_at;
                    }
                }
                None => {
                    let mut record = remote.clone();
                    record.device_id = self.device_id.clone();
                    record.student_id = record.student_id.or(self.student_id);
                    self.videos.insert(record.video_id.clone(), record);
                }
            }
        }
    }

    /// Locally derived XP, level, streak and tier.
    pub fn summary(
        &self,
        catalog: &CourseCatalog,
        today: NaiveDate,
        streak_window_days: u32,
    ) -> StudentSummary {
        let progress: Vec<VideoProgressRecord> = self.videos.values().cloned().collect();
        let activity: Vec<DailyActivityRecord> = self.daily.values().cloned().collect();
        StudentSummary::derive(&progress, &activity, catalog, today, streak_window_days)
    }

    pub fn to_snapshot(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Restores a persisted ledger. A snapshot that does not parse, or that belongs to another
    /// device, is discarded and an empty ledger is returned instead.
    pub fn restore(device_id: &str, snapshot: &str) -> Self {
        match serde_json::from_str::<ProgressLedger>(snapshot) {
            Ok(ledger) if ledger.device_id == device_id => ledger,
            Ok(ledger) => {
                warn!(
                    "Ledger snapshot belongs to device {}, expected {}. Starting empty.",
                    ledger.device_id, device_id
                );
                Self::new(device_id)
            }
            Err(err) => {
                warn!(
                    "Corrupt ledger snapshot for device {} ({}). Starting empty.",
                    device_id, err
                );
                Self::new(device_id)
            }
        }
    }
}
