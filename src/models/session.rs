use secrecy::SecretString;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

/// ゲート判定上のユーザー状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateState {
    /// 未登録（2FA 対象外として通過）
    NoSecret,
    /// 登録済みだが、このプロセスではまだ接続していない
    Unverified,
    /// 接続済みで検証待ち
    Pending,
    /// 検証済み（`until` まで有効）
    Verified {
        #[serde(with = "time::serde::rfc3339")]
        until: OffsetDateTime,
    },
}

impl GateState {
    /// 通過可否
    pub fn may_proceed(&self) -> bool {
        matches!(self, Self::NoSecret | Self::Verified { .. })
    }
}

/// 新規登録の結果
///
/// シークレット平文を含むので Debug は実装しない
pub struct Enrollment {
    pub secret: SecretString,
    pub otpauth_uri: String,
    /// PNG を Base64 エンコードしたもの
    pub qr_code: String,
}

/// 接続開始イベントの処理結果
pub enum SessionStart {
    /// 特権ユーザーではなく、シークレットも無い
    NotRequired,
    /// 特権ユーザーだが未登録
    NotEnrolled,
    /// 既に検証済み
    AlreadyVerified { until: OffsetDateTime },
    /// 検証待ちに移行
    VerificationRequired,
    /// 自動登録した（検証待ちに移行）
    Enrolled(Enrollment),
}

/// 検証成功時のセッション
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VerifiedSession {
    #[serde(with = "time::serde::rfc3339")]
    pub verified_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// 管理一覧の1行
#[derive(Debug, Clone, Serialize)]
pub struct EnrolledUser {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub state: GateState,
}

/// 利用統計
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub total_enrolled: usize,
    pub currently_verified: usize,
    pub pending: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_may_proceed() {
        let until = OffsetDateTime::UNIX_EPOCH;
        assert!(GateState::NoSecret.may_proceed());
        assert!(GateState::Verified { until }.may_proceed());
        assert!(!GateState::Pending.may_proceed());
        assert!(!GateState::Unverified.may_proceed());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_value(GateState::Pending).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "pending" }));

        let json = serde_json::to_value(GateState::Verified {
            until: OffsetDateTime::UNIX_EPOCH,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "state": "verified", "until": "1970-01-01T00:00:00Z" })
        );
    }
}
