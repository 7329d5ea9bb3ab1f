use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    #[error("APIトークンが無効です")]
    Unauthorized,

    #[error("内部エラー")]
    Internal(#[from] anyhow::Error),

    #[error("認証コードが入力されていません")]
    CodeRequired,

    #[error("認証コードが無効です")]
    TotpInvalid,

    #[error("二要素認証は既に有効です")]
    AlreadyEnrolled,

    #[error("二要素認証が有効化されていません")]
    NotEnrolled,
}

impl From<garde::Report> for AppError {
    fn from(report: garde::Report) -> Self {
        Self::Validation(report.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "認証が必要です".to_string()),
            Self::Internal(e) => {
                tracing::error!(error = ?e, "内部エラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "内部エラーが発生しました".to_string(),
                )
            }
            Self::CodeRequired => (
                StatusCode::BAD_REQUEST,
                "認証コードを入力してください".to_string(),
            ),
            Self::TotpInvalid => (
                StatusCode::UNAUTHORIZED,
                "認証コードが正しくありません".to_string(),
            ),
            Self::AlreadyEnrolled => (
                StatusCode::CONFLICT,
                "二要素認証は既に有効です".to_string(),
            ),
            Self::NotEnrolled => (
                StatusCode::NOT_FOUND,
                "二要素認証が設定されていません。先にセットアップしてください".to_string(),
            ),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_errors_map_to_distinct_statuses() {
        assert_eq!(
            AppError::CodeRequired.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::TotpInvalid.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::AlreadyEnrolled.into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::NotEnrolled.into_response().status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_internal_error_is_masked() {
        let error = AppError::Internal(anyhow::anyhow!("disk on fire"));
        assert_eq!(
            error.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
