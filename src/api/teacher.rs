use super::helper;
use crate::aggregate::{StudentSummary, merge_by_video};
use crate::certificate;
use crate::errors::AppError;
use crate::model::records::Certificate;
use crate::model::teacher::{
    CertificateSummary, CertificatesResponse, RosterResponse, RosterStudent, RosterSummary,
    StudentProgressResponse,
};
use crate::payloads::teacher::{
    ApproveCertificatePayload, GetCertificatesParams, GetStudentProgressParams,
    GetStudentRosterParams,
};
use crate::response::ApiResponse;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::response::Json;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

/// Lists a teacher's students with their derived progress.
///
/// Parameters
/// * teacher_id as `i64`
///
/// Returns (wrapped in `ApiResponse`)
/// * `RosterResponse` if succeeded (200)
/// * `None` if the teacher is unknown (404)
/// * `None` if failed (500)
#[instrument(skip(state, params))]
pub async fn get_student_roster(
    State(state): State<AppState>,
    Query(params): Query<GetStudentRosterParams>,
) -> Result<ApiResponse<RosterResponse>, AppError> {
    info!("Fetching student roster for teacher {}", params.teacher_id);

    let settings = state.settings.clone();
    let today = helper::today();
    let teacher_id = params.teacher_id;
    let students = helper::run_transaction(&state.store, move |repo| {
        helper::require_teacher(repo, teacher_id)?;
        let catalog = repo.course_catalog()?;

        let mut roster = Vec::new();
        for student in repo.students_for_teacher(teacher_id)? {
            let progress = repo.video_progress_for_student(student.id)?;
            let activity = repo.daily_activity_for_student(student.id)?;
            let summary = StudentSummary::derive(
                &progress,
                &activity,
                &catalog,
                today,
                settings.streak_window_days,
            );
            roster.push(RosterStudent::derive(
                &student,
                &summary,
                today,
                settings.attention_after_days,
            ));
        }
        Ok(roster)
    })
    .await?;

    let summary = RosterSummary::from_students(&students);
    info!(
        "Roster for teacher {}: {} students, {} active today",
        teacher_id, summary.total_students, summary.active_today
    );
    Ok(ApiResponse::ok(RosterResponse { students, summary }))
}

/// Detailed progress of one student of the teacher.
///
/// Parameters
/// * teacher_id as `i64`
/// * student_id as `Uuid`
///
/// Returns (wrapped in `ApiResponse`)
/// * `StudentProgressResponse` if succeeded (200)
/// * `None` if the student belongs to another teacher (403)
/// * `None` if the teacher or student is unknown (404)
/// * `None` if failed (500)
#[instrument(skip(state, params))]
pub async fn get_student_progress(
    State(state): State<AppState>,
    Query(params): Query<GetStudentProgressParams>,
) -> Result<ApiResponse<StudentProgressResponse>, AppError> {
    info!(
        "Fetching progress of student {} for teacher {}",
        params.student_id, params.teacher_id
    );

    let window = state.settings.streak_window_days;
    let today = helper::today();
    let response = helper::run_transaction(&state.store, move |repo| {
        helper::require_teacher(repo, params.teacher_id)?;
        let student = repo.get_student(params.student_id)?.ok_or_else(|| {
            AppError::NotFound(format!("Student {} not found", params.student_id))
        })?;
        if student.teacher_id != params.teacher_id {
            warn!(
                "Teacher {} requested student {} of teacher {}",
                params.teacher_id, student.id, student.teacher_id
            );
            return Err(AppError::Forbidden(format!(
                "Student {} is not taught by teacher {}",
                student.id, params.teacher_id
            )));
        }

        let progress = repo.video_progress_for_student(student.id)?;
        let activity = repo.daily_activity_for_student(student.id)?;
        let catalog = repo.course_catalog()?;
        let summary = StudentSummary::derive(&progress, &activity, &catalog, today, window);

        Ok(StudentProgressResponse {
            student,
            courses: summary.courses.clone(),
            videos: merge_by_video(&progress).into_values().collect(),
            summary,
        })
    })
    .await?;

    debug!(
        "Student {} has {} videos across {} courses",
        response.student.id,
        response.videos.len(),
        response.courses.len()
    );
    Ok(ApiResponse::ok(response))
}

/// Lists the certificates of a teacher's students, optionally filtered by status.
///
/// Parameters
/// * teacher_id as `i64`
/// * status as `Option<String>` (`pending`, `approved`, `rejected` or `all`)
///
/// Returns (wrapped in `ApiResponse`)
/// * `CertificatesResponse` if succeeded (200)
/// * `None` if the status filter is unknown (400)
/// * `None` if the teacher is unknown (404)
/// * `None` if failed (500)
#[instrument(skip(state, params))]
pub async fn get_certificates(
    State(state): State<AppState>,
    Query(params): Query<GetCertificatesParams>,
) -> Result<ApiResponse<CertificatesResponse>, AppError> {
    info!(
        "Fetching certificates for teacher {} (status: {:?})",
        params.teacher_id, params.status
    );

    let status = helper::parse_status_filter(params.status.as_deref())?;
    let teacher_id = params.teacher_id;
    let all = helper::run_transaction(&state.store, move |repo| {
        helper::require_teacher(repo, teacher_id)?;
        repo.certificates_for_teacher(teacher_id)
    })
    .await?;

    let summary = CertificateSummary::from_certificates(&all);
    let certificates: Vec<Certificate> = all
        .into_iter()
        .filter(|c| status.is_none_or(|wanted| c.status == wanted))
        .collect();

    info!(
        "Returning {} of {} certificates for teacher {}",
        certificates.len(),
        summary.total,
        teacher_id
    );
    Ok(ApiResponse::ok(CertificatesResponse {
        certificates,
        summary,
    }))
}

/// Approves or rejects a pending certificate.
///
/// Parameters
/// * cert_id as `Uuid`
/// * action as `"approve"` or `"reject"`
/// * teacher_id as `i64`
///
/// Returns (wrapped in `ApiResponse`)
/// * the updated `Certificate` if succeeded (200)
/// * `None` if the certificate's student belongs to another teacher (403)
/// * `None` if the teacher or certificate is unknown (404)
/// * `None` if the certificate was already decided (409)
/// * `None` if failed (500)
#[instrument(skip(state, payload))]
pub async fn approve_certificate(
    State(state): State<AppState>,
    Json(payload): Json<ApproveCertificatePayload>,
) -> Result<ApiResponse<Certificate>, AppError> {
    info!(
        "Teacher {} deciding certificate {}: {:?}",
        payload.teacher_id, payload.cert_id, payload.action
    );

    let updated = helper::run_transaction(&state.store, move |repo| {
        helper::require_teacher(repo, payload.teacher_id)?;
        certificate::decide(
            repo,
            payload.cert_id,
            payload.action,
            payload.teacher_id,
            Utc::now(),
        )
    })
    .await?;

    Ok(ApiResponse::ok(updated))
}
