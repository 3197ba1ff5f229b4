//! Course catalog and canonical course keys.
//!
//! Clients and historical data refer to the same course as `course_1`, `course-1`, `1`,
//! `Course 1` or by a legacy title. Every ingestion boundary funnels those through
//! [`CourseCatalog::canonicalize`] so that storage only ever sees one key per course.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

const CANONICAL_PREFIX: &str = "course-";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Course {
    pub id: String,
    pub title: String,
    /// Canonical video set, in playback order.
    pub video_ids: Vec<String>,
    /// Completed videos required before a certificate is requested.
    #[serde(default)]
    pub certificate_threshold: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct CourseCatalog {
    courses: Vec<Course>,
    lookup: HashMap<String, usize>,
}

impl CourseCatalog {
    pub fn new(courses: Vec<Course>, aliases: Vec<(String, String)>) -> Self {
        let mut lookup = HashMap::new();
        for (index, course) in courses.iter().enumerate() {
            lookup.insert(alias_key(&course.id), index);
            lookup.insert(alias_key(&course.title), index);
        }
        for (alias, course_id) in aliases {
            match courses.iter().position(|c| c.id == course_id) {
                Some(index) => {
                    lookup.insert(alias_key(&alias), index);
                }
                None => {
                    warn!(
                        "Ignoring alias '{}' for unknown course '{}'",
                        alias,
                        course_id
                    );
                }
            }
        }
        CourseCatalog { courses, lookup }
    }

    pub fn courses(&self) -> &[Course] {
        &self.courses
    }

    pub fn course(&self, id: &str) -> Option<&Course> {
        self.canonicalize(id)
            .and_then(|key| self.courses.iter().find(|c| c.id == key))
    }

    pub fn total_videos(&self) -> usize {
        self.courses.iter().map(|c| c.video_ids.len()).sum()
    }

    /// Maps any accepted spelling of a course to its catalog id.
    pub fn canonicalize(&self, raw: &str) -> Option<String> {
        if let Some(number) = numbered_course(raw) {
            let key = format!("{}{}", CANONICAL_PREFIX, number);
            if let Some(&index) = self.lookup.get(&alias_key(&key)) {
                return Some(self.courses[index].id.clone());
            }
        }
        self.lookup
            .get(&alias_key(raw))
            .map(|&index| self.courses[index].id.clone())
    }
}

/// Extracts `N` from `course-N`, `course_N`, `courseN`, `course N` or a bare `N`.
fn numbered_course(raw: &str) -> Option<u32> {
    let lowered = raw.trim().to_ascii_lowercase();
    let rest = lowered.strip_prefix("course").unwrap_or(&lowered);
    let digits = rest.trim_start_matches(['-', '_', ' ']);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Lowercases and collapses every run of non-alphanumerics to a single space.
fn alias_key(raw: &str) -> String {
    raw.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
