use axum::{Json, extract::State};
use garde::Validate;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::handlers::run_blocking;
use crate::handlers::two_factor::DisableResponse;
use crate::models::{EnrolledUser, GateStats};
use crate::state::AppState;

/// GET /api/admin/enrolled
///
/// 2FA登録済みユーザーの一覧（シークレットは含まない）
pub async fn list_enrolled(State(state): State<AppState>) -> Json<Vec<EnrolledUser>> {
    Json(state.gate.list_enrolled())
}

/// GET /api/admin/stats
pub async fn stats(State(state): State<AppState>) -> Json<GateStats> {
    Json(state.gate.stats())
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdminDisableRequest {
    #[garde(skip)]
    pub user_id: Uuid,
    /// 操作した管理者（監査ログ用）
    #[garde(length(min = 1, max = 64))]
    pub actor: String,
    /// `force = false` の場合は本人のコードが必要
    #[garde(length(max = 32))]
    pub code: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub force: bool,
}

/// POST /api/admin/disable
///
/// 管理者による2FA無効化
///
/// # Security
/// - `force = true` はコード確認なし（監査ログに warn で残る）
pub async fn admin_disable(
    State(state): State<AppState>,
    Json(request): Json<AdminDisableRequest>,
) -> Result<Json<DisableResponse>, AppError> {
    request.validate()?;

    let forced = request.force;
    let gate = state.gate.clone();
    run_blocking(move || {
        gate.disable(
            request.user_id,
            request.code.as_deref(),
            request.force,
            &request.actor,
        )
    })
    .await?;

    Ok(Json(DisableResponse {
        disabled: true,
        forced,
    }))
}
