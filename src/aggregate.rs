//! Derived gamification state.
//!
//! Everything here is recomputed from stored progress and activity facts on every read and
//! nothing here can fail: malformed or unknown inputs are skipped, never reported.

use crate::course::{Course, CourseCatalog};
use crate::model::records::{DailyActivityRecord, VideoProgressRecord};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const COMPLETED_VIDEO_XP: u32 = 50;
pub const PARTIAL_MIN_XP: u32 = 10;
pub const PARTIAL_MAX_XP: u32 = 40;
/// Watched seconds an unfinished video needs before it earns partial credit.
pub const PARTIAL_CREDIT_AFTER_SEC: f64 = 60.0;
pub const STREAK_DAY_XP: u32 = 10;

const LEVEL_THRESHOLDS: [u32; 9] = [0, 100, 250, 500, 800, 1200, 1700, 2300, 3000];
const XP_PER_LEVEL_BEYOND: u32 = 1000;
const LEVEL_TITLES: [&str; 10] = [
    "EV Novice",
    "Spark Starter",
    "Charge Cadet",
    "Circuit Apprentice",
    "Battery Technician",
    "Powertrain Specialist",
    "High-Voltage Pro",
    "EV Expert",
    "Master Technician",
    "Grandmaster Technician",
];

/// Collapses the records of the same video reported by different devices into one.
pub fn merge_by_video(records: &[VideoProgressRecord]) -> BTreeMap<String, VideoProgressRecord> {
    let mut merged: BTreeMap<String, VideoProgressRecord> = BTreeMap::new();
    for record in records {
        match merged.get_mut(&record.video_id) {
            None => {
                merged.insert(record.video_id.clone(), record.clone());
            }
            Some(existing) => {
                existing.duration_sec = existing.duration_sec.max(record.duration_sec);
                existing.watched_sec = existing.watched_sec.max(record.watched_sec);
                existing.completed_at = match (existing.completed_at, record.completed_at) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                existing.completed |= record.completed;
                if record.updated_at > existing.updated_at {
                    existing.updated_at = record.updated_at;
                    existing.last_position_sec = record.last_position_sec;
                    existing.device_id = record.device_id.clone();
                }
            }
        }
    }
    merged
}

/// Consecutive active days ending today, or yesterday when nothing happened today yet.
pub fn compute_streak(
    activity: &[DailyActivityRecord],
    today: NaiveDate,
    window_days: u32,
) -> u32 {
    let mut watched_by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for record in activity {
        *watched_by_day.entry(record.activity_date).or_default() += record.total_watched_sec;
    }
    let active = |day: NaiveDate| watched_by_day.get(&day).is_some_and(|&sec| sec > 0.0);

    let mut streak = 0;
    for offset in 0..window_days {
        let Some(day) = today.checked_sub_days(Days::new(offset.into())) else {
            break;
        };
        if active(day) {
            streak += 1;
        } else if offset > 0 {
            break;
        }
    }
    streak
}

pub fn video_xp(record: &VideoProgressRecord) -> u32 {
    if record.completed {
        return COMPLETED_VIDEO_XP;
    }
    if record.watched_sec <= PARTIAL_CREDIT_AFTER_SEC {
        return 0;
    }
    let span = f64::from(PARTIAL_MAX_XP - PARTIAL_MIN_XP);
    PARTIAL_MIN_XP + (span * record.watch_fraction()).round() as u32
}

/// Total XP over per-video merged records plus the streak bonus.
pub fn total_xp<'a>(
    videos: impl IntoIterator<Item = &'a VideoProgressRecord>,
    streak: u32,
) -> u32 {
    videos.into_iter().map(video_xp).sum::<u32>() + STREAK_DAY_XP * streak
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Level {
    pub number: u32,
    pub title: String,
    pub min_xp: u32,
    pub next_level_xp: u32,
}

impl Level {
    pub fn for_xp(xp: u32) -> Level {
        let mut index = LEVEL_THRESHOLDS
            .iter()
            .rposition(|&threshold| xp >= threshold)
            .unwrap_or(0);
        let last = LEVEL_THRESHOLDS.len() - 1;
        let mut min_xp = LEVEL_THRESHOLDS[index];
        if index == last {
            let beyond = (xp - min_xp) / XP_PER_LEVEL_BEYOND;
            index += beyond as usize;
            min_xp += beyond * XP_PER_LEVEL_BEYOND;
        }
        let next_level_xp = LEVEL_THRESHOLDS
            .get(index + 1)
            .copied()
            .unwrap_or(min_xp + XP_PER_LEVEL_BEYOND);
        Level {
            number: index as u32 + 1,
            title: LEVEL_TITLES[index.min(LEVEL_TITLES.len() - 1)].to_string(),
            min_xp,
            next_level_xp,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CertificationTier {
    None,
    Foundation,
    Associate,
    Professional,
    Certified,
}

impl CertificationTier {
    pub fn for_completed_courses(count: usize) -> Self {
        match count {
            0 => CertificationTier::None,
            1 => CertificationTier::Foundation,
            2 | 3 => CertificationTier::Associate,
            4 => CertificationTier::Professional,
            _ => CertificationTier::Certified,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            CertificationTier::None => "Not certified",
            CertificationTier::Foundation => "EV Foundation",
            CertificationTier::Associate => "EV Associate",
            CertificationTier::Professional => "EV Professional",
            CertificationTier::Certified => "Certified EV Technician",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CourseCompletionState {
    pub course_id: String,
    pub completed_videos: usize,
    pub total_videos_required: usize,
}

impl CourseCompletionState {
    pub fn is_complete(&self) -> bool {
        self.total_videos_required > 0 && self.completed_videos >= self.total_videos_required
    }
}

/// Video ids completed in each course, keyed by canonical course id.
fn completed_videos_by_course<'a>(
    videos: impl IntoIterator<Item = &'a VideoProgressRecord>,
    catalog: &CourseCatalog,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut by_course: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for record in videos.into_iter().filter(|r| r.completed) {
        if let Some(course_id) = catalog.canonicalize(&record.course_id) {
            by_course
                .entry(course_id)
                .or_default()
                .insert(record.video_id.clone());
        }
    }
    by_course
}

pub fn course_completion(
    videos: &BTreeMap<String, VideoProgressRecord>,
    catalog: &CourseCatalog,
    course: &Course,
) -> CourseCompletionState {
    let completed = completed_videos_by_course(videos.values(), catalog);
    completion_state(course, completed.get(&course.id))
}

fn completion_state(
    course: &Course,
    completed: Option<&BTreeSet<String>>,
) -> CourseCompletionState {
    let completed_videos = course
        .video_ids
        .iter()
        .filter(|video_id| completed.is_some_and(|set| set.contains(*video_id)))
        .count();
    CourseCompletionState {
        course_id: course.id.clone(),
        completed_videos,
        total_videos_required: course.video_ids.len(),
    }
}

/// Completed videos of one course, counted whether or not they are in its canonical set.
pub fn completed_video_count(
    videos: &BTreeMap<String, VideoProgressRecord>,
    catalog: &CourseCatalog,
    course_id: &str,
) -> usize {
    completed_videos_by_course(videos.values(), catalog)
        .get(course_id)
        .map_or(0, BTreeSet::len)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StudentSummary {
    pub total_xp: u32,
    pub level: Level,
    pub streak: u32,
    pub certification_tier: CertificationTier,
    pub completed_courses: Vec<String>,
    pub courses: Vec<CourseCompletionState>,
    pub videos_started: usize,
    pub videos_completed: usize,
    pub total_watched_sec: f64,
    pub last_active_day: Option<NaiveDate>,
}

impl StudentSummary {
    pub fn derive(
        progress: &[VideoProgressRecord],
        activity: &[DailyActivityRecord],
        catalog: &CourseCatalog,
        today: NaiveDate,
        streak_window_days: u32,
    ) -> Self {
        let videos = merge_by_video(progress);
        let streak = compute_streak(activity, today, streak_window_days);
        let total_xp = total_xp(videos.values(), streak);

        let completed = completed_videos_by_course(videos.values(), catalog);
        let courses: Vec<CourseCompletionState> = catalog
            .courses()
            .iter()
            .map(|course| completion_state(course, completed.get(&course.id)))
            .collect();
        let completed_courses: Vec<String> = courses
            .iter()
            .filter(|state| state.is_complete())
            .map(|state| state.course_id.clone())
            .collect();

        let last_active_day = activity
            .iter()
            .filter(|record| record.total_watched_sec > 0.0)
            .map(|record| record.activity_date)
            .max();

        StudentSummary {
            total_xp,
            level: Level::for_xp(total_xp),
            streak,
            certification_tier: CertificationTier::for_completed_courses(completed_courses.len()),
            completed_courses,
            courses,
            videos_started: videos.len(),
            videos_completed: videos.values().filter(|r| r.completed).count(),
            total_watched_sec: videos.values().map(|r| r.watched_sec).sum(),
            last_active_day,
        }
    }

    /// Share of catalog videos completed, in `[0, 1]`.
    pub fn completion_rate(&self) -> f64 {
        let required: usize = self.courses.iter().map(|c| c.total_videos_required).sum();
        if required == 0 {
            return 0.0;
        }
        let done: usize = self.courses.iter().map(|c| c.completed_videos).sum();
        done as f64 / required as f64
    }
}
