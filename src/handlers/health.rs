use axum::{Json, extract::State};
use serde::Serialize;

use crate::state::AppState;

/// ヘルスチェックレスポンス
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// 2FA 登録済みユーザー数
    pub enrolled: usize,
}

/// ヘルスチェックハンドラー
///
/// GET /api/health
///
/// 認証不要。プロキシ側からの死活監視用。
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        enrolled: state.gate.store().count(),
    })
}
