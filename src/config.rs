use std::path::PathBuf;

use garde::Validate;
use secrecy::SecretBox;
use serde::Deserialize;

#[derive(Debug, Deserialize, Validate)]
pub struct Config {
    /// プロキシ側アダプターとの共有トークン（Bearer）
    #[garde(skip)]
    pub api_token: SecretBox<String>,
    #[serde(default = "default_host")]
    #[garde(length(min = 1))]
    pub host: String,
    #[serde(default = "default_port")]
    #[garde(skip)]
    pub port: u16,

    // シークレットストア設定
    #[serde(default = "default_data_dir")]
    #[garde(skip)]
    pub data_dir: PathBuf,
    #[serde(default = "default_secrets_file")]
    #[garde(length(min = 1))]
    pub secrets_file: String,

    // 2FA (TOTP) 設定
    /// TOTP発行者名（認証アプリに表示される）
    #[serde(default = "default_totp_issuer")]
    #[garde(length(min = 1))]
    pub totp_issuer: String,
    /// 認証アプリのアカウント名に付与するサーバー名（`name@server`）
    #[serde(default)]
    #[garde(skip)]
    pub server_name: Option<String>,
    /// 前後に許容するタイムステップ数
    #[serde(default = "default_code_window")]
    #[garde(range(max = MAX_CODE_WINDOW))]
    pub code_window: u8,

    // セッション設定
    /// 検証成功からセッションが有効な秒数
    #[serde(default = "default_session_ttl_secs")]
    #[garde(range(min = 1, max = MAX_SESSION_TTL_SECS))]
    pub session_ttl_secs: i64,
    /// 未登録のスタッフを接続時に自動登録する
    #[serde(default)]
    #[garde(skip)]
    pub auto_enroll_on_join: bool,
}

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_SECRETS_FILE: &str = "secrets.json";
const DEFAULT_TOTP_ISSUER: &str = "StaffGate";
const DEFAULT_CODE_WINDOW: u8 = 1;
const DEFAULT_SESSION_TTL_SECS: i64 = 12 * 60 * 60;
const MAX_CODE_WINDOW: u8 = 10;
/// 30日
const MAX_SESSION_TTL_SECS: i64 = 30 * 24 * 60 * 60;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_secrets_file() -> String {
    DEFAULT_SECRETS_FILE.to_string()
}

fn default_totp_issuer() -> String {
    DEFAULT_TOTP_ISSUER.to_string()
}

fn default_code_window() -> u8 {
    DEFAULT_CODE_WINDOW
}

fn default_session_ttl_secs() -> i64 {
    DEFAULT_SESSION_TTL_SECS
}

impl Config {
    /// 環境変数から読み込み、値の範囲を検証する
    pub fn load() -> anyhow::Result<Self> {
        let config: Self = envy::from_env()?;
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
        Ok(config)
    }

    /// シークレットファイルのフルパス
    pub fn secrets_path(&self) -> PathBuf {
        self.data_dir.join(&self.secrets_file)
    }

    pub fn session_ttl(&self) -> time::Duration {
        time::Duration::seconds(self.session_ttl_secs)
    }
}
