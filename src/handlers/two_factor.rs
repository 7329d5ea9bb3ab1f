use axum::{
    Json,
    extract::{Path, State},
};
use garde::Validate;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::handlers::run_blocking;
use crate::models::{Enrollment, GateState, VerifiedSession};
use crate::state::AppState;

// === 2FA Enroll ===

#[derive(Debug, Deserialize, Validate)]
pub struct EnrollRequest {
    #[garde(skip)]
    pub user_id: Uuid,
    #[garde(length(min = 1, max = 64))]
    pub display_name: String,
}

#[derive(Serialize)]
pub struct EnrollResponse {
    pub secret: String,
    pub otpauth_uri: String,
    pub qr_code: String,
}

impl From<Enrollment> for EnrollResponse {
    fn from(enrollment: Enrollment) -> Self {
        Self {
            secret: enrollment.secret.expose_secret().to_string(),
            otpauth_uri: enrollment.otpauth_uri,
            qr_code: format!("data:image/png;base64,{}", enrollment.qr_code),
        }
    }
}

/// POST /api/2fa/enroll
///
/// 2FA登録（シークレット生成、otpauth URI・QRコード返却）
///
/// # Security
/// - シークレット平文はログ出力禁止
pub async fn enroll_2fa(
    State(state): State<AppState>,
    Json(request): Json<EnrollRequest>,
) -> Result<Json<EnrollResponse>, AppError> {
    request.validate()?;

    let gate = state.gate.clone();
    let enrollment =
        run_blocking(move || gate.enroll(request.user_id, &request.display_name)).await?;

    Ok(Json(EnrollResponse::from(enrollment)))
}

// === 2FA Verify ===

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyRequest {
    #[garde(skip)]
    pub user_id: Uuid,
    /// 空の場合は CodeRequired として扱う
    #[garde(length(max = 32))]
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub verified: bool,
    #[serde(flatten)]
    pub session: VerifiedSession,
}

/// POST /api/2fa/verify
///
/// コード検証（成功でセッション開始）
///
/// # Security
/// - コードはログ出力禁止
pub async fn verify_2fa(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, AppError> {
    request.validate()?;

    let session = state.gate.verify(request.user_id, &request.code)?;

    Ok(Json(VerifyResponse {
        verified: true,
        session,
    }))
}

// === 2FA Disable ===

#[derive(Debug, Deserialize, Validate)]
pub struct DisableRequest {
    #[garde(skip)]
    pub user_id: Uuid,
    #[garde(length(max = 32))]
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DisableResponse {
    pub disabled: bool,
    pub forced: bool,
}

/// POST /api/2fa/disable
///
/// 本人による2FA無効化
///
/// # Security
/// - TOTPコード確認必須
pub async fn disable_2fa(
    State(state): State<AppState>,
    Json(request): Json<DisableRequest>,
) -> Result<Json<DisableResponse>, AppError> {
    request.validate()?;

    let gate = state.gate.clone();
    run_blocking(move || gate.disable(request.user_id, request.code.as_deref(), false, "self"))
        .await?;

    Ok(Json(DisableResponse {
        disabled: true,
        forced: false,
    }))
}

// === 2FA Reprovision ===

#[derive(Debug, Deserialize, Validate)]
pub struct ReprovisionRequest {
    #[garde(skip)]
    pub user_id: Uuid,
    #[garde(length(min = 1, max = 64))]
    pub display_name: String,
    #[garde(length(max = 32))]
    pub code: String,
}

/// POST /api/2fa/reprovision
///
/// シークレット再発行（旧シークレット・既存セッションは即座に無効）
///
/// # Security
/// - TOTPコード確認必須
pub async fn reprovision_2fa(
    State(state): State<AppState>,
    Json(request): Json<ReprovisionRequest>,
) -> Result<Json<EnrollResponse>, AppError> {
    request.validate()?;

    let gate = state.gate.clone();
    let enrollment = run_blocking(move || {
        gate.reprovision(request.user_id, &request.display_name, &request.code)
    })
    .await?;

    Ok(Json(EnrollResponse::from(enrollment)))
}

// === 2FA Status ===

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub user_id: Uuid,
    pub enrolled: bool,
    #[serde(flatten)]
    pub state: GateState,
}

/// GET /api/2fa/status/{user_id}
pub async fn status_2fa(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Json<StatusResponse> {
    let gate_state = state.gate.state(user_id);

    Json(StatusResponse {
        user_id,
        enrolled: gate_state != GateState::NoSecret,
        state: gate_state,
    })
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;
    use crate::services::TotpService;

    #[test]
    fn test_validate_empty_display_name() {
        let request = EnrollRequest {
            user_id: Uuid::new_v4(),
            display_name: String::new(),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validate_overlong_code() {
        let request = VerifyRequest {
            user_id: Uuid::new_v4(),
            code: "1".repeat(33),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validate_empty_code_is_left_to_gate() {
        let request = VerifyRequest {
            user_id: Uuid::new_v4(),
            code: String::new(),
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_enroll_response_embeds_data_uri() {
        let response = EnrollResponse::from(Enrollment {
            secret: SecretString::from("JBSWY3DPEHPK3PXP".to_string()),
            otpauth_uri: "otpauth://totp/x".to_string(),
            qr_code: "AAAA".to_string(),
        });
        assert_eq!(response.secret, "JBSWY3DPEHPK3PXP");
        assert_eq!(response.qr_code, "data:image/png;base64,AAAA");
    }

    #[tokio::test]
    async fn test_enroll_verify_status_flow() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::for_tests(dir.path());
        let user_id = Uuid::new_v4();

        let Json(enrolled) = enroll_2fa(
            State(state.clone()),
            Json(EnrollRequest {
                user_id,
                display_name: "alice".to_string(),
            }),
        )
        .await
        .unwrap();

        let Json(status) = status_2fa(State(state.clone()), Path(user_id)).await;
        assert!(status.enrolled);
        assert_eq!(status.state, GateState::Pending);

        let code = TotpService::generate_code(&enrolled.secret, TotpService::current_time_step());
        let Json(verified) = verify_2fa(
            State(state.clone()),
            Json(VerifyRequest { user_id, code }),
        )
        .await
        .unwrap();
        assert!(verified.verified);

        let Json(status) = status_2fa(State(state), Path(user_id)).await;
        assert!(matches!(status.state, GateState::Verified { .. }));
    }

    #[tokio::test]
    async fn test_disable_without_code_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::for_tests(dir.path());
        let user_id = Uuid::new_v4();
        state.gate.enroll(user_id, "alice").unwrap();

        let result = disable_2fa(
            State(state.clone()),
            Json(DisableRequest {
                user_id,
                code: None,
            }),
        )
        .await;

        assert!(matches!(result, Err(AppError::CodeRequired)));
        assert!(state.gate.store().has(user_id));
    }
}
