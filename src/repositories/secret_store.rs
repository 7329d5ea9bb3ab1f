use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use parking_lot::Mutex;
use secrecy::SecretString;
use uuid::Uuid;

use crate::models::SecretRecord;
use crate::models::secret_record::StoredEntry;
use crate::services::TotpService;

/// 2FAシークレットのファイルストア
///
/// 変更のたびにファイル全体を書き直す（save-on-write）。
/// マップの更新とファイル書き込みは同じロックの中で行うので、
/// 他の呼び出し元から書き込み途中の状態は見えない。
pub struct SecretStore {
    path: PathBuf,
    records: Mutex<HashMap<Uuid, SecretRecord>>,
}

impl SecretStore {
    /// ストアを開く
    ///
    /// ファイルが無ければ空のストアとして作成する。読み込みに失敗しても
    /// 起動は止めず、空のストアで続行する。
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = load_records(&path);
        let store = Self {
            path,
            records: Mutex::new(records),
        };

        if !store.path.exists() {
            tracing::info!(path = %store.path.display(), "シークレットファイルが存在しないため新規作成");
            let records = store.records.lock();
            store.save(&records);
        }

        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// シークレットを取得、無ければ生成して保存
    ///
    /// 既存の場合は表示名だけ更新する。同一ユーザーへの同時呼び出しでも
    /// 生成されるシークレットは1つだけ。
    pub fn get_or_create(&self, user_id: Uuid, display_name: &str) -> SecretString {
        let mut records = self.records.lock();

        if let Some(record) = records.get_mut(&user_id) {
            let secret = SecretString::from(record.secret.clone());
            let renamed = record.display_name.as_deref() != Some(display_name);
            if renamed {
                record.display_name = Some(display_name.to_string());
                self.save(&records);
            }
            return secret;
        }

        let secret = TotpService::generate_secret();
        records.insert(
            user_id,
            SecretRecord {
                secret: secret.clone(),
                display_name: Some(display_name.to_string()),
            },
        );
        self.save(&records);

        tracing::info!(user_id = %user_id, display_name = %display_name, "2FAシークレットを生成");
        SecretString::from(secret)
    }

    /// シークレットを再発行（既存のものは即座に無効）
    pub fn regenerate(&self, user_id: Uuid, display_name: &str) -> SecretString {
        let mut records = self.records.lock();

        let secret = TotpService::generate_secret();
        let replaced = records
            .insert(
                user_id,
                SecretRecord {
                    secret: secret.clone(),
                    display_name: Some(display_name.to_string()),
                },
            )
            .is_some();
        self.save(&records);

        tracing::info!(user_id = %user_id, replaced, "2FAシークレットを再発行");
        SecretString::from(secret)
    }

    pub fn get(&self, user_id: Uuid) -> Option<SecretString> {
        self.records
            .lock()
            .get(&user_id)
            .map(|record| SecretString::from(record.secret.clone()))
    }

    pub fn has(&self, user_id: Uuid) -> bool {
        self.records.lock().contains_key(&user_id)
    }

    /// 表示名を更新（変更があった場合のみ保存）
    ///
    /// 未登録ユーザーなら false
    pub fn update_display_name(&self, user_id: Uuid, display_name: &str) -> bool {
        let mut records = self.records.lock();

        let Some(record) = records.get_mut(&user_id) else {
            return false;
        };
        if record.display_name.as_deref() != Some(display_name) {
            record.display_name = Some(display_name.to_string());
            self.save(&records);
        }
        true
    }

    /// シークレットを削除
    ///
    /// 実際に削除した場合のみ true
    pub fn remove(&self, user_id: Uuid) -> bool {
        let mut records = self.records.lock();

        let removed = records.remove(&user_id).is_some();
        if removed {
            self.save(&records);
            tracing::info!(user_id = %user_id, "2FAシークレットを削除");
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn all_user_ids(&self) -> HashSet<Uuid> {
        self.records.lock().keys().copied().collect()
    }

    /// 登録済みユーザーと表示名の一覧（シークレットは含まない）
    pub fn enrolled(&self) -> Vec<(Uuid, Option<String>)> {
        let mut enrolled: Vec<_> = self
            .records
            .lock()
            .iter()
            .map(|(user_id, record)| (*user_id, record.display_name.clone()))
            .collect();
        enrolled.sort_by_key(|(user_id, _)| *user_id);
        enrolled
    }

    /// ファイルへ書き出す。失敗してもメモリ上の状態で続行する
    fn save(&self, records: &HashMap<Uuid, SecretRecord>) {
        if let Err(e) = self.persist(records) {
            tracing::error!(
                error = ?e,
                path = %self.path.display(),
                "シークレットファイルの保存に失敗（メモリ上の状態で続行）"
            );
        }
    }

    fn persist(&self, records: &HashMap<Uuid, SecretRecord>) -> anyhow::Result<()> {
        let sorted: BTreeMap<String, &SecretRecord> = records
            .iter()
            .map(|(user_id, record)| (user_id.to_string(), record))
            .collect();
        let json = serde_json::to_string_pretty(&sorted).context("failed to serialize secrets")?;

        write_atomic(&self.path, json.as_bytes())?;
        tracing::debug!(count = records.len(), "シークレットファイルを保存");
        Ok(())
    }
}

/// シークレットファイルを読み込む
///
/// 壊れたレコードは警告を出して読み飛ばす
fn load_records(path: &Path) -> HashMap<Uuid, SecretRecord> {
    let mut records = HashMap::new();

    if !path.exists() {
        return records;
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::error!(error = ?e, path = %path.display(), "シークレットファイルの読み込みに失敗");
            return records;
        }
    };

    let entries: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(&content)
    {
        Ok(entries) => entries,
        Err(e) => {
            let backup = corrupt_backup_path(path);
            tracing::error!(
                error = %e,
                path = %path.display(),
                backup = %backup.display(),
                "シークレットファイルのパースに失敗（退避して空のストアで起動）"
            );
            if let Err(e) = fs::copy(path, &backup) {
                tracing::error!(error = ?e, "破損ファイルの退避に失敗");
            }
            return records;
        }
    };

    for (key, value) in entries {
        let Ok(user_id) = Uuid::parse_str(&key) else {
            tracing::warn!(key = %key, "シークレットファイル内の不正なUUIDをスキップ");
            continue;
        };
        match serde_json::from_value::<StoredEntry>(value) {
            Ok(entry) => {
                records.insert(user_id, SecretRecord::from(entry));
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "シークレットファイル内の不正なレコードをスキップ");
            }
        }
    }

    tracing::info!(count = records.len(), "シークレットファイルを読み込み");
    records
}

fn corrupt_backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".corrupt");
    PathBuf::from(name)
}

/// 一時ファイルに書いてから rename で置き換える
fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let temp_path = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    let result = write_temp(&temp_path, contents).and_then(|()| {
        fs::rename(&temp_path, path)
            .with_context(|| format!("failed to replace {}", path.display()))
    });

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_temp(temp_path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(temp_path)
        .with_context(|| format!("failed to create {}", temp_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", temp_path.display()))?;
    }

    file.write_all(contents)
        .with_context(|| format!("failed to write {}", temp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to fsync {}", temp_path.display()))?;
    Ok(())
}
