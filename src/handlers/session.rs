use axum::{
    Json,
    extract::{Path, State},
};
use garde::Validate;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;
use crate::handlers::run_blocking;
use crate::handlers::two_factor::EnrollResponse;
use crate::models::{GateState, SessionStart};
use crate::state::AppState;

// === Session Start ===

#[derive(Debug, Deserialize, Validate)]
pub struct SessionStartRequest {
    #[garde(skip)]
    pub user_id: Uuid,
    #[garde(length(min = 1, max = 64))]
    pub display_name: String,
    /// スタッフ権限を持つか（権限判定はプロキシ側）
    #[garde(skip)]
    pub is_privileged: bool,
}

#[derive(Serialize)]
pub struct SessionStartResponse {
    pub outcome: &'static str,
    pub may_proceed: bool,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,
    /// 自動登録した場合のみ
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrollment: Option<EnrollResponse>,
}

/// POST /api/sessions
///
/// プレイヤー参加イベント。登録済みのスタッフは検証待ちになる
pub async fn session_start(
    State(state): State<AppState>,
    Json(request): Json<SessionStartRequest>,
) -> Result<Json<SessionStartResponse>, AppError> {
    request.validate()?;

    let gate = state.gate.clone();
    let outcome = run_blocking(move || {
        gate.on_session_start(
            request.user_id,
            &request.display_name,
            request.is_privileged,
        )
    })
    .await?;

    let response = match outcome {
        SessionStart::NotRequired => SessionStartResponse {
            outcome: "not_required",
            may_proceed: true,
            expires_at: None,
            enrollment: None,
        },
        SessionStart::NotEnrolled => SessionStartResponse {
            outcome: "not_enrolled",
            may_proceed: true,
            expires_at: None,
            enrollment: None,
        },
        SessionStart::AlreadyVerified { until } => SessionStartResponse {
            outcome: "already_verified",
            may_proceed: true,
            expires_at: Some(until),
            enrollment: None,
        },
        SessionStart::VerificationRequired => SessionStartResponse {
            outcome: "verification_required",
            may_proceed: false,
            expires_at: None,
            enrollment: None,
        },
        SessionStart::Enrolled(enrollment) => SessionStartResponse {
            outcome: "enrolled",
            may_proceed: false,
            expires_at: None,
            enrollment: Some(EnrollResponse::from(enrollment)),
        },
    };

    Ok(Json(response))
}

// === Admission Check ===

#[derive(Debug, Serialize)]
pub struct AdmissionResponse {
    pub allowed: bool,
    #[serde(flatten)]
    pub state: GateState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

/// GET /api/admission/{user_id}
///
/// バックエンド接続前の判定。期限切れはここで検証待ちに戻る
pub async fn admission(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Json<AdmissionResponse> {
    let gate_state = state.gate.admission(user_id);
    let allowed = gate_state.may_proceed();

    if !allowed {
        tracing::info!(user_id = %user_id, "2FA未検証のため接続を拒否");
    }

    Json(AdmissionResponse {
        allowed,
        state: gate_state,
        reason: (!allowed).then_some("二要素認証が必要です。認証アプリのコードで検証してください"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_empty_display_name() {
        let request = SessionStartRequest {
            user_id: Uuid::new_v4(),
            display_name: String::new(),
            is_privileged: true,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validate_long_display_name() {
        let request = SessionStartRequest {
            user_id: Uuid::new_v4(),
            display_name: "x".repeat(65),
            is_privileged: true,
        };
        assert!(request.validate().is_err());
    }

    #[tokio::test]
    async fn test_admission_denied_after_session_start() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::for_tests(dir.path());
        let user_id = Uuid::new_v4();
        state.gate.enroll(user_id, "alice").unwrap();

        let Json(started) = session_start(
            State(state.clone()),
            Json(SessionStartRequest {
                user_id,
                display_name: "alice".to_string(),
                is_privileged: true,
            }),
        )
        .await
        .unwrap();
        assert_eq!(started.outcome, "verification_required");
        assert!(!started.may_proceed);

        let Json(response) = admission(State(state), Path(user_id)).await;
        assert!(!response.allowed);
        assert_eq!(response.state, GateState::Pending);
        assert!(response.reason.is_some());
    }

    #[tokio::test]
    async fn test_admission_of_idle_user_matches_decision() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::for_tests(dir.path());
        let user_id = Uuid::new_v4();
        state.gate.store().get_or_create(user_id, "alice");

        let Json(response) = admission(State(state), Path(user_id)).await;
        assert!(!response.allowed);
        assert_eq!(response.state, GateState::Pending);
    }

    #[tokio::test]
    async fn test_session_start_for_demoted_staff_requires_verification() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::for_tests(dir.path());
        let user_id = Uuid::new_v4();
        state.gate.enroll(user_id, "alice").unwrap();

        let Json(started) = session_start(
            State(state.clone()),
            Json(SessionStartRequest {
                user_id,
                display_name: "alice".to_string(),
                is_privileged: false,
            }),
        )
        .await
        .unwrap();
        assert_eq!(started.outcome, "verification_required");
        assert!(!started.may_proceed);

        let Json(response) = admission(State(state), Path(user_id)).await;
        assert_eq!(response.allowed, started.may_proceed);
    }

    #[tokio::test]
    async fn test_admission_allows_unenrolled_user() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::for_tests(dir.path());

        let Json(response) = admission(State(state), Path(Uuid::new_v4())).await;
        assert!(response.allowed);
        assert_eq!(response.state, GateState::NoSecret);
        assert!(response.reason.is_none());
    }
}
