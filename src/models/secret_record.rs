use std::fmt;

use serde::{Deserialize, Serialize};

/// ユーザーの二要素認証（TOTP）シークレット
///
/// シークレットファイル上では UUID をキーとするオブジェクトの値として保存される。
/// 平文シークレットはログに出力禁止（Debug でもマスクする）
#[derive(Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    /// Base32（パディングなし）
    pub secret: String,
    /// 表示名（監査ログ・管理一覧用。検索には使わない）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRecord")
            .field("secret", &"[REDACTED]")
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// シークレットファイルの値として受け付ける形式
///
/// 旧形式（`"<uuid>": "<secret>"`）も読み込めるようにしておく
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum StoredEntry {
    Record(SecretRecord),
    Bare(String),
}

impl From<StoredEntry> for SecretRecord {
    fn from(entry: StoredEntry) -> Self {
        match entry {
            StoredEntry::Record(record) => record,
            StoredEntry::Bare(secret) => SecretRecord {
                secret,
                display_name: None,
            },
        }
    }
}
