use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug)]
pub struct GetStudentRosterParams {
    pub teacher_id: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct GetStudentProgressParams {
    pub teacher_id: i64,
    pub student_id: Uuid,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct GetCertificatesParams {
    pub teacher_id: i64,
    /// `pending`, `approved` or `rejected`; all certificates when absent.
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CertificateAction {
    Approve,
    Reject,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ApproveCertificatePayload {
    pub cert_id: Uuid,
    pub action: CertificateAction,
    pub teacher_id: i64,
}
