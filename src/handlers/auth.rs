use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::state::AppState;

/// API トークン検証ミドルウェア
///
/// プロキシ側アダプターからの `Authorization: Bearer <token>` を定数時間で比較する
pub async fn require_api_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let expected = state.config.api_token.expose_secret();
    let authorized = provided
        .is_some_and(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())));

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "APIトークンが無効");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}
