use std::sync::Arc;

use crate::config::Config;
use crate::repositories::SecretStore;
use crate::services::{GateController, TotpService};

/// アプリケーション共有状態
///
/// axum の State として全ハンドラーで共有される。
/// Clone は必須（axum が内部で clone するため）。
#[derive(Clone)]
pub struct AppState {
    /// アプリケーション設定（Arc で共有）
    pub config: Arc<Config>,
    /// 2FA ゲート（プロセスと同じ寿命）
    pub gate: Arc<GateController>,
}

impl AppState {
    /// 新しい AppState を作成
    ///
    /// シークレットファイルの読み込みもここで行う
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let store = Arc::new(SecretStore::open(config.secrets_path()));
        tracing::info!(
            path = %store.path().display(),
            enrolled = store.count(),
            "シークレットストア初期化完了"
        );

        let totp = TotpService::new(
            config.totp_issuer.clone(),
            config.server_name.clone(),
            config.code_window,
        );
        let gate = GateController::new(
            store,
            totp,
            config.session_ttl(),
            config.auto_enroll_on_join,
        );

        Self {
            config,
            gate: Arc::new(gate),
        }
    }
}

#[cfg(test)]
impl AppState {
    /// テスト用の状態（データは `data_dir` 配下）
    pub(crate) fn for_tests(data_dir: &std::path::Path) -> Self {
        Self::new(Config {
            api_token: secrecy::SecretBox::new(Box::new("test-token".to_string())),
            host: "127.0.0.1".to_string(),
            port: 0,
            data_dir: data_dir.to_path_buf(),
            secrets_file: "secrets.json".to_string(),
            totp_issuer: "TestApp".to_string(),
            server_name: None,
            code_window: 1,
            session_ttl_secs: 3600,
            auto_enroll_on_join: false,
        })
    }
}
