#![allow(dead_code)]

use axum::Router;
use axum::http::StatusCode;
pub(crate) use axum_test::TestServer;
use ev_progress_server::course::Course;
use ev_progress_server::init_test_router;
use ev_progress_server::model::device::{JoinClassResponse, VideoProgressResponse};
use ev_progress_server::model::records::{Certificate, Device, School, Student, Teacher};
use ev_progress_server::payloads::device::{
    JoinClassPayload, ProgressUpdate, RegisterDevicePayload, UpdateVideoProgressPayload,
};
use ev_progress_server::response::ApiResponse;
use ev_progress_server::state::{AppState, EngineSettings};
use ev_progress_server::store::memory::{SeedAlias, SeedClass};
use ev_progress_server::store::{MemoryStore, SeedData, Store};
use uuid::Uuid;

pub const TEACHER_ID: i64 = 100;
pub const OTHER_TEACHER_ID: i64 = 200;
pub const CLASS_CODE: &str = "EVT2024";
pub const OTHER_CLASS_CODE: &str = "HV2025";

// fixture catalog

pub fn fixture_seed() -> SeedData {
    let course = |id: &str, title: &str, videos: &[&str], threshold: Option<u32>| Course {
        id: id.to_string(),
        title: title.to_string(),
        video_ids: videos.iter().map(|v| v.to_string()).collect(),
        certificate_threshold: threshold,
    };

    SeedData {
        schools: vec![School {
            id: 1,
            name: "Riverside Technical College".to_string(),
        }],
        teachers: vec![
            Teacher {
                id: TEACHER_ID,
                school_id: 1,
                display_name: "Grace Ohm".to_string(),
                email: "grace.ohm@riverside.edu".to_string(),
            },
            Teacher {
                id: OTHER_TEACHER_ID,
                school_id: 1,
                display_name: "Nikola Amp".to_string(),
                email: "nikola.amp@riverside.edu".to_string(),
            },
        ],
        classes: vec![
            SeedClass {
                code: CLASS_CODE.to_string(),
                teacher_id: TEACHER_ID,
                school_id: 1,
                program_name: "EV Technician Program".to_string(),
            },
            SeedClass {
                code: OTHER_CLASS_CODE.to_string(),
                teacher_id: OTHER_TEACHER_ID,
                school_id: 1,
                program_name: "High Voltage Safety".to_string(),
            },
        ],
        courses: vec![
            course(
                "course-1",
                "EV Fundamentals",
                &["c1-v1", "c1-v2", "c1-v3"],
                Some(2),
            ),
            course("course-2", "High Voltage Safety", &["c2-v1", "c2-v2"], None),
        ],
        aliases: vec![SeedAlias {
            alias: "Intro to Electric Vehicles".to_string(),
            course_id: "course-1".to_string(),
        }],
    }
}

// test infra setup

pub async fn setup_test_environment() -> (TestServer, MemoryStore) {
    let store = MemoryStore::with_seed(fixture_seed());
    let state = AppState::new(Store::Memory(store.clone()), EngineSettings::default());
    let app: Router = init_test_router(state);
    let server = TestServer::new(app).expect("Failed to create TestServer");
    (server, store)
}

// request helpers

pub async fn register_device(server: &TestServer, device_id: &str) {
    let payload = RegisterDevicePayload {
        device_id: device_id.to_string(),
        platform: "android".to_string(),
        app_version: "2.4.1".to_string(),
        device_name: Some("Pixel 8".to_string()),
    };
    let response = server.post("/device/register_device").json(&payload).await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

pub fn join_payload(device_id: &str, class_code: &str, email: Option<&str>) -> JoinClassPayload {
    JoinClassPayload {
        device_id: device_id.to_string(),
        class_code: class_code.to_string(),
        first_name: "Ada".to_string(),
        last_name: "Volt".to_string(),
        email: email.map(str::to_string),
    }
}

pub async fn join_class(
    server: &TestServer,
    device_id: &str,
    class_code: &str,
    email: Option<&str>,
) -> JoinClassResponse {
    let response = server
        .post("/device/join_class")
        .json(&join_payload(device_id, class_code, email))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<JoinClassResponse> = response.json();
    body.data.expect("join_class returned no data")
}

pub fn progress_update(
    video_id: &str,
    course_id: &str,
    watched_sec: f64,
    position_sec: f64,
    duration_sec: f64,
) -> ProgressUpdate {
    ProgressUpdate {
        video_id: video_id.to_string(),
        course_id: course_id.to_string(),
        last_position_sec: position_sec,
        watched_sec,
        total_duration_sec: duration_sec,
        completed_hint: false,
        updated_at: None,
        local_date: None,
    }
}

pub async fn report_progress(
    server: &TestServer,
    device_id: &str,
    update: ProgressUpdate,
) -> VideoProgressResponse {
    let payload = UpdateVideoProgressPayload {
        device_id: device_id.to_string(),
        update,
    };
    let response = server
        .post("/device/update_video_progress")
        .json(&payload)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<VideoProgressResponse> = response.json();
    body.data.expect("update_video_progress returned no data")
}

/// Reports a 300 s video as watched to the end.
pub async fn complete_video(
    server: &TestServer,
    device_id: &str,
    video_id: &str,
    course_id: &str,
) -> VideoProgressResponse {
    report_progress(
        server,
        device_id,
        progress_update(video_id, course_id, 300.0, 300.0, 300.0),
    )
    .await
}

// store inspection

pub fn stored_device(store: &MemoryStore, device_id: &str) -> Option<Device> {
    let device_id = device_id.to_string();
    store
        .transact(move |repo| repo.get_device(&device_id))
        .expect("Failed to read device")
}

pub fn students_of(store: &MemoryStore, teacher_id: i64) -> Vec<Student> {
    store
        .transact(move |repo| repo.students_for_teacher(teacher_id))
        .expect("Failed to read students")
}

pub fn certificates_of(store: &MemoryStore, student_id: Uuid) -> Vec<Certificate> {
    store
        .transact(move |repo| {
            let student = repo.get_student(student_id)?;
            let teacher_id = student.map_or(0, |s| s.teacher_id);
            Ok(repo
                .certificates_for_teacher(teacher_id)?
                .into_iter()
                .filter(|c| c.student_id == student_id)
                .collect())
        })
        .expect("Failed to read certificates")
}
