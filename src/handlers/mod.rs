pub mod admin;
pub mod auth;
pub mod health;
pub mod session;
pub mod two_factor;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::state::AppState;

pub use admin::{admin_disable, list_enrolled, stats};
pub use auth::require_api_token;
pub use health::health_check;
pub use session::{admission, session_start};
pub use two_factor::{disable_2fa, enroll_2fa, reprovision_2fa, status_2fa, verify_2fa};

/// ファイル書き込みを伴うゲート操作をブロッキングスレッドで実行
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        tracing::error!(error = ?e, "ブロッキングタスクの実行に失敗");
        AppError::Internal(anyhow::Error::from(e))
    })?
}

/// Router の構築
///
/// `/api/health` 以外は API トークン必須
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        // プロキシイベント
        .route("/api/sessions", post(session_start))
        .route("/api/admission/{user_id}", get(admission))
        // 二要素認証
        .route("/api/2fa/enroll", post(enroll_2fa))
        .route("/api/2fa/verify", post(verify_2fa))
        .route("/api/2fa/disable", post(disable_2fa))
        .route("/api/2fa/reprovision", post(reprovision_2fa))
        .route("/api/2fa/status/{user_id}", get(status_2fa))
        // 管理者
        .route("/api/admin/enrolled", get(list_enrolled))
        .route("/api/admin/stats", get(stats))
        .route("/api/admin/disable", post(admin_disable))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_token,
        ));

    Router::new()
        .route("/api/health", get(health_check))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
