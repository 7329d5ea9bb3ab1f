use rand::{RngCore, rngs::OsRng};
use subtle::{Choice, ConstantTimeEq};
use time::OffsetDateTime;
use totp_rs::{Algorithm, TOTP};

use crate::error::AppError;
use crate::services::base32;

/// TOTP の期間（秒）
pub const PERIOD_SECS: u64 = 30;
/// コードの桁数
pub const DIGITS: usize = 6;
/// シークレット長（160ビット）
const SECRET_BYTES: usize = 20;

/// TOTP (Time-based One-Time Password) サービス
///
/// HMAC-SHA1 / 6桁 / 30秒（RFC 6238、認証アプリ互換）。
///
/// # Security
/// - シークレット平文・入力コードはログに出力しない
/// - コード比較は定数時間で行い、ウィンドウ全体を常に走査する
#[derive(Clone)]
pub struct TotpService {
    issuer: String,
    server_name: Option<String>,
    window: u8,
}

impl TotpService {
    /// 新しい TotpService を作成
    ///
    /// # Arguments
    /// * `issuer` - TOTP発行者名（アプリ名）
    /// * `server_name` - アカウント名に付与するサーバー名
    /// * `window` - 前後に許容するタイムステップ数
    pub fn new(issuer: String, server_name: Option<String>, window: u8) -> Self {
        Self {
            issuer,
            server_name,
            window,
        }
    }

    pub fn window(&self) -> u8 {
        self.window
    }

    /// 20バイトのランダムシークレットを生成し、Base32でエンコード
    pub fn generate_secret() -> String {
        let mut bytes = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut bytes);
        base32::encode(&bytes)
    }

    /// 現在のタイムステップ（Unix秒 / 30）
    pub fn current_time_step() -> u64 {
        Self::time_step_at(OffsetDateTime::now_utc())
    }

    pub fn time_step_at(now: OffsetDateTime) -> u64 {
        u64::try_from(now.unix_timestamp()).unwrap_or(0) / PERIOD_SECS
    }

    /// 指定タイムステップの6桁コードを生成
    pub fn generate_code(secret: &str, time_step: u64) -> String {
        build_totp(secret, None, String::new()).generate(time_step.saturating_mul(PERIOD_SECS))
    }

    /// TOTPコードを検証（現在時刻）
    pub fn verify_code(&self, secret: &str, code: &str) -> bool {
        self.verify_code_at(secret, code, Self::current_time_step())
    }

    /// TOTPコードを検証
    ///
    /// # Note
    /// 形式不正なコードはエラーではなく不一致として扱う
    pub fn verify_code_at(&self, secret: &str, code: &str, time_step: u64) -> bool {
        let Some(code) = normalize_code(code) else {
            return false;
        };

        let totp = build_totp(secret, None, String::new());
        let window = i64::from(self.window);

        let mut matched = Choice::from(0);
        for offset in -window..=window {
            let Some(step) = time_step.checked_add_signed(offset) else {
                continue;
            };
            let candidate = totp.generate(step.saturating_mul(PERIOD_SECS));
            matched |= candidate.as_bytes().ct_eq(code.as_bytes());
        }

        matched.into()
    }

    /// 認証アプリに表示するアカウント名
    pub fn account_label(&self, display_name: &str) -> String {
        match &self.server_name {
            Some(server) => format!("{}@{}", display_name, server),
            None => display_name.to_string(),
        }
    }

    /// otpauth URI を生成（QRコード・手動入力用）
    pub fn otpauth_uri(&self, account: &str, secret: &str) -> String {
        let issuer = urlencoding::encode(&self.issuer);
        let account = urlencoding::encode(account);
        format!(
            "otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}&algorithm=SHA1&digits={DIGITS}&period={PERIOD_SECS}"
        )
    }

    /// QRコードを生成（PNG形式、Base64エンコード）
    pub fn generate_qr_code(&self, account: &str, secret: &str) -> Result<String, AppError> {
        let totp = build_totp(secret, Some(self.issuer.clone()), account.to_string());

        totp.get_qr_base64().map_err(|e| {
            tracing::error!(error = %e, "QRコード生成エラー");
            AppError::Internal(anyhow::anyhow!("qr code generation error"))
        })
    }
}

/// 空白・ハイフンを除去し、6桁の数字であるか確認
fn normalize_code(code: &str) -> Option<String> {
    let code: String = code
        .trim()
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .collect();

    if code.len() == DIGITS && code.chars().all(|c| c.is_ascii_digit()) {
        Some(code)
    } else {
        None
    }
}

/// TOTP オブジェクトを作成
///
/// 手編集されたシークレットでも扱えるよう長さ検証は行わない
fn build_totp(secret: &str, issuer: Option<String>, account: String) -> TOTP {
    TOTP::new_unchecked(
        Algorithm::SHA1,
        DIGITS,
        0, // skew はこちらでウィンドウを回すので使わない
        PERIOD_SECS,
        base32::decode(secret),
        issuer,
        account,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RFC 6238 付録B のシークレット "12345678901234567890"
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    fn create_test_service() -> TotpService {
        TotpService::new("TestApp".to_string(), None, 1)
    }

    #[test]
    fn test_generate_secret() {
        let secret = TotpService::generate_secret();
        // Base32エンコードされた20バイト = 32文字
        assert_eq!(secret.len(), 32);
        assert!(
            secret
                .chars()
                .all(|c| "ABCDEFGHIJKLMNOPQRSTUVWXYZ234567".contains(c))
        );
        assert_eq!(base32::decode(&secret).len(), 20);
    }

    #[test]
    fn test_generate_secret_is_random() {
        assert_ne!(
            TotpService::generate_secret(),
            TotpService::generate_secret()
        );
    }

    #[test]
    fn test_generate_code_rfc6238_vectors() {
        // 8桁の期待値の下6桁
        assert_eq!(TotpService::generate_code(RFC_SECRET, 59 / 30), "287082");
        assert_eq!(
            TotpService::generate_code(RFC_SECRET, 1_111_111_109 / 30),
            "081804"
        );
        assert_eq!(
            TotpService::generate_code(RFC_SECRET, 1_111_111_111 / 30),
            "050471"
        );
        assert_eq!(
            TotpService::generate_code(RFC_SECRET, 1_234_567_890 / 30),
            "005924"
        );
        assert_eq!(
            TotpService::generate_code(RFC_SECRET, 2_000_000_000 / 30),
            "279037"
        );
    }

    #[test]
    fn test_generate_code_format_and_stability() {
        let secret = TotpService::generate_secret();
        let code = TotpService::generate_code(&secret, 42);

        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(code, TotpService::generate_code(&secret, 42));
    }

    #[test]
    fn test_lowercase_secret_yields_same_code() {
        assert_eq!(
            TotpService::generate_code(&RFC_SECRET.to_lowercase(), 1),
            "287082"
        );
    }

    #[test]
    fn test_verify_within_window() {
        let service = create_test_service();
        let now = 50_000_000;

        for step in [now - 1, now, now + 1] {
            let code = TotpService::generate_code(RFC_SECRET, step);
            assert!(service.verify_code_at(RFC_SECRET, &code, now));
        }
    }

    #[test]
    fn test_verify_rejects_outside_window() {
        let service = create_test_service();
        let now = 50_000_000;

        let late = TotpService::generate_code(RFC_SECRET, now + 2);
        assert!(!service.verify_code_at(RFC_SECRET, &late, now));
        let early = TotpService::generate_code(RFC_SECRET, now - 2);
        assert!(!service.verify_code_at(RFC_SECRET, &early, now));
    }

    #[test]
    fn test_verify_zero_window_accepts_only_current_step() {
        let service = TotpService::new("TestApp".to_string(), None, 0);
        let now = 50_000_000;

        let current = TotpService::generate_code(RFC_SECRET, now);
        assert!(service.verify_code_at(RFC_SECRET, &current, now));
        let next = TotpService::generate_code(RFC_SECRET, now + 1);
        assert!(!service.verify_code_at(RFC_SECRET, &next, now));
    }

    #[test]
    fn test_verify_at_step_zero_does_not_underflow() {
        let service = create_test_service();
        let code = TotpService::generate_code(RFC_SECRET, 0);
        assert!(service.verify_code_at(RFC_SECRET, &code, 0));
    }

    #[test]
    fn test_verify_normalizes_input() {
        let service = create_test_service();
        // ステップ1 のコードは 287082
        assert!(service.verify_code_at(RFC_SECRET, "  287082\n", 1));
        assert!(service.verify_code_at(RFC_SECRET, "287 082", 1));
        assert!(service.verify_code_at(RFC_SECRET, "287-082", 1));
    }

    #[test]
    fn test_verify_invalid_code_format() {
        let service = create_test_service();

        assert!(!service.verify_code_at(RFC_SECRET, "", 1));
        // 6桁でない
        assert!(!service.verify_code_at(RFC_SECRET, "28708", 1));
        assert!(!service.verify_code_at(RFC_SECRET, "2870822", 1));
        // 数字以外を含む
        assert!(!service.verify_code_at(RFC_SECRET, "28708a", 1));
        assert!(!service.verify_code_at(RFC_SECRET, "２８７０８２", 1));
    }

    #[test]
    fn test_verify_current_time() {
        let service = create_test_service();
        let secret = TotpService::generate_secret();
        let code = TotpService::generate_code(&secret, TotpService::current_time_step());
        assert!(service.verify_code(&secret, &code));
    }

    #[test]
    fn test_otpauth_uri_format() {
        let service = create_test_service();
        let uri = service.otpauth_uri("alice", "JBSWY3DPEHPK3PXP");
        assert_eq!(
            uri,
            "otpauth://totp/TestApp:alice?secret=JBSWY3DPEHPK3PXP&issuer=TestApp&algorithm=SHA1&digits=6&period=30"
        );
    }

    #[test]
    fn test_otpauth_uri_percent_encodes_label() {
        let service = TotpService::new("My Network".to_string(), None, 1);
        let uri = service.otpauth_uri("bob@Lobby", "JBSWY3DPEHPK3PXP");
        assert!(uri.starts_with("otpauth://totp/My%20Network:bob%40Lobby?"));
        assert!(uri.contains("&issuer=My%20Network&"));
    }

    #[test]
    fn test_account_label_with_server_name() {
        let service = TotpService::new("TestApp".to_string(), Some("Lobby".to_string()), 1);
        assert_eq!(service.account_label("alice"), "alice@Lobby");
        assert_eq!(create_test_service().account_label("alice"), "alice");
    }

    #[test]
    fn test_generate_qr_code() {
        let service = create_test_service();
        let secret = TotpService::generate_secret();

        let qr_base64 = service.generate_qr_code("alice", &secret).unwrap();
        // Base64エンコードされたPNG
        assert!(!qr_base64.is_empty());
    }
}
