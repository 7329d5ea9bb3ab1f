use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{EnrolledUser, Enrollment, GateState, GateStats, SessionStart, VerifiedSession};
use crate::repositories::SecretStore;
use crate::services::TotpService;

/// 2FA ゲート
///
/// ユーザーごとの状態（未登録 / 検証待ち / 検証済み）を管理し、
/// バックエンドへの接続可否を判定する。
///
/// セッション情報はメモリ上のみ（再起動で空になる）。期限切れは
/// 参照時に判定し、バックグラウンドでの掃除はしない。
pub struct GateController {
    store: Arc<SecretStore>,
    totp: TotpService,
    session_ttl: Duration,
    auto_enroll: bool,
    sessions: Mutex<Sessions>,
}

/// 検証待ち集合と検証時刻。排他条件を保つため同じロックで守る
#[derive(Default)]
struct Sessions {
    pending: HashSet<Uuid>,
    verified_at: HashMap<Uuid, OffsetDateTime>,
}

impl Sessions {
    /// 有効なセッションの期限を返す。期限切れなら検証待ちに戻す
    fn live_until(
        &mut self,
        user_id: Uuid,
        now: OffsetDateTime,
        ttl: Duration,
    ) -> Option<OffsetDateTime> {
        let verified_at = *self.verified_at.get(&user_id)?;
        let until = verified_at.saturating_add(ttl);
        if now <= until {
            return Some(until);
        }

        self.verified_at.remove(&user_id);
        self.pending.insert(user_id);
        tracing::info!(user_id = %user_id, "2FAセッション期限切れ（再検証が必要）");
        None
    }

    /// 登録済みユーザーの状態
    fn state(&mut self, user_id: Uuid, now: OffsetDateTime, ttl: Duration) -> GateState {
        if let Some(until) = self.live_until(user_id, now, ttl) {
            GateState::Verified { until }
        } else if self.pending.contains(&user_id) {
            GateState::Pending
        } else {
            GateState::Unverified
        }
    }

    fn mark_verified(&mut self, user_id: Uuid, now: OffsetDateTime) {
        self.verified_at.insert(user_id, now);
        self.pending.remove(&user_id);
    }

    fn mark_pending(&mut self, user_id: Uuid) {
        self.verified_at.remove(&user_id);
        self.pending.insert(user_id);
    }

    fn clear(&mut self, user_id: Uuid) {
        self.verified_at.remove(&user_id);
        self.pending.remove(&user_id);
    }
}

impl GateController {
    /// 新しい GateController を作成
    ///
    /// # Arguments
    /// * `session_ttl` - 検証成功からセッションが有効な期間
    /// * `auto_enroll` - 未登録の特権ユーザーを接続時に登録する
    pub fn new(
        store: Arc<SecretStore>,
        totp: TotpService,
        session_ttl: Duration,
        auto_enroll: bool,
    ) -> Self {
        Self {
            store,
            totp,
            session_ttl,
            auto_enroll,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    pub fn store(&self) -> &SecretStore {
        &self.store
    }

    /// 接続開始イベント
    pub fn on_session_start(
        &self,
        user_id: Uuid,
        display_name: &str,
        is_privileged: bool,
    ) -> Result<SessionStart, AppError> {
        self.on_session_start_at(
            user_id,
            display_name,
            is_privileged,
            OffsetDateTime::now_utc(),
        )
    }

    pub fn on_session_start_at(
        &self,
        user_id: Uuid,
        display_name: &str,
        is_privileged: bool,
        now: OffsetDateTime,
    ) -> Result<SessionStart, AppError> {
        // 権限を外されたユーザーでもシークレットが残っていればゲート対象
        if !self.store.update_display_name(user_id, display_name) {
            if !is_privileged {
                return Ok(SessionStart::NotRequired);
            }
            if !self.auto_enroll {
                return Ok(SessionStart::NotEnrolled);
            }
            let enrollment = self.create_enrollment(user_id, display_name)?;
            tracing::info!(user_id = %user_id, "接続時に2FAを自動登録");
            return Ok(SessionStart::Enrolled(enrollment));
        }

        let mut sessions = self.sessions.lock();
        if let Some(until) = sessions.live_until(user_id, now, self.session_ttl) {
            return Ok(SessionStart::AlreadyVerified { until });
        }
        sessions.pending.insert(user_id);

        tracing::info!(user_id = %user_id, display_name = %display_name, "2FA検証待ち");
        Ok(SessionStart::VerificationRequired)
    }

    /// バックエンドへの接続可否
    pub fn may_proceed(&self, user_id: Uuid) -> bool {
        self.may_proceed_at(user_id, OffsetDateTime::now_utc())
    }

    pub fn may_proceed_at(&self, user_id: Uuid, now: OffsetDateTime) -> bool {
        self.admission_at(user_id, now).may_proceed()
    }

    /// 接続判定。判定に使った状態をそのまま返す
    pub fn admission(&self, user_id: Uuid) -> GateState {
        self.admission_at(user_id, OffsetDateTime::now_utc())
    }

    pub fn admission_at(&self, user_id: Uuid, now: OffsetDateTime) -> GateState {
        if !self.store.has(user_id) {
            self.sessions.lock().clear(user_id);
            return GateState::NoSecret;
        }

        let mut sessions = self.sessions.lock();
        match sessions.state(user_id, now, self.session_ttl) {
            GateState::Unverified => {
                // 接続イベントを経ずに来た場合もここで検証待ちにする
                sessions.pending.insert(user_id);
                GateState::Pending
            }
            state => state,
        }
    }

    /// ユーザーの現在の状態
    pub fn state(&self, user_id: Uuid) -> GateState {
        self.state_at(user_id, OffsetDateTime::now_utc())
    }

    pub fn state_at(&self, user_id: Uuid, now: OffsetDateTime) -> GateState {
        if !self.store.has(user_id) {
            // 削除と検証が競合した場合の残骸を消しておく
            self.sessions.lock().clear(user_id);
            return GateState::NoSecret;
        }
        self.sessions.lock().state(user_id, now, self.session_ttl)
    }

    /// 2FAを登録
    ///
    /// 登録直後は検証待ち
    pub fn enroll(&self, user_id: Uuid, display_name: &str) -> Result<Enrollment, AppError> {
        if self.store.has(user_id) {
            return Err(AppError::AlreadyEnrolled);
        }

        let enrollment = self.create_enrollment(user_id, display_name)?;
        tracing::info!(user_id = %user_id, "2FA設定開始");
        Ok(enrollment)
    }

    /// コードを検証し、成功すればセッションを開始
    pub fn verify(&self, user_id: Uuid, code: &str) -> Result<VerifiedSession, AppError> {
        self.verify_at(user_id, code, OffsetDateTime::now_utc())
    }

    pub fn verify_at(
        &self,
        user_id: Uuid,
        code: &str,
        now: OffsetDateTime,
    ) -> Result<VerifiedSession, AppError> {
        let secret = self.check_code(user_id, Some(code), now)?;
        self.commit_verification(user_id, &secret, now)
    }

    /// 検証済みとして記録する
    ///
    /// コード確認後に再発行・無効化された場合は、確認したシークレットが
    /// 現在のものと一致しないので記録しない
    fn commit_verification(
        &self,
        user_id: Uuid,
        verified_secret: &SecretString,
        now: OffsetDateTime,
    ) -> Result<VerifiedSession, AppError> {
        let mut sessions = self.sessions.lock();

        let current = self.store.get(user_id).ok_or(AppError::NotEnrolled)?;
        if current.expose_secret() != verified_secret.expose_secret() {
            tracing::warn!(user_id = %user_id, "検証中にシークレットが再発行されたため検証を破棄");
            return Err(AppError::TotpInvalid);
        }
        sessions.mark_verified(user_id, now);

        tracing::info!(user_id = %user_id, "2FA検証成功");
        Ok(VerifiedSession {
            verified_at: now,
            expires_at: now.saturating_add(self.session_ttl),
        })
    }

    /// 2FAを無効化
    ///
    /// 本人による無効化は現在のコードが必要。管理者の強制無効化はコード確認なし
    pub fn disable(
        &self,
        user_id: Uuid,
        code: Option<&str>,
        is_admin_force: bool,
        actor: &str,
    ) -> Result<(), AppError> {
        self.disable_at(user_id, code, is_admin_force, actor, OffsetDateTime::now_utc())
    }

    pub fn disable_at(
        &self,
        user_id: Uuid,
        code: Option<&str>,
        is_admin_force: bool,
        actor: &str,
        now: OffsetDateTime,
    ) -> Result<(), AppError> {
        if !self.store.has(user_id) {
            return Err(AppError::NotEnrolled);
        }
        if !is_admin_force {
            self.check_code(user_id, code, now)?;
        }

        if !self.store.remove(user_id) {
            // 確認後に別経路で削除された
            return Err(AppError::NotEnrolled);
        }
        self.sessions.lock().clear(user_id);

        if is_admin_force {
            tracing::warn!(
                user_id = %user_id,
                actor = %actor,
                "管理者が2FAを強制無効化（コード確認なし）"
            );
        } else {
            tracing::info!(user_id = %user_id, actor = %actor, "2FA無効化完了（コード確認済み）");
        }
        Ok(())
    }

    /// シークレットを再発行
    ///
    /// 現在のコードが必要。既存のセッションは即座に無効になる
    pub fn reprovision(
        &self,
        user_id: Uuid,
        display_name: &str,
        code: &str,
    ) -> Result<Enrollment, AppError> {
        self.reprovision_at(user_id, display_name, code, OffsetDateTime::now_utc())
    }

    pub fn reprovision_at(
        &self,
        user_id: Uuid,
        display_name: &str,
        code: &str,
        now: OffsetDateTime,
    ) -> Result<Enrollment, AppError> {
        self.check_code(user_id, Some(code), now)?;

        let secret = self.store.regenerate(user_id, display_name);
        self.sessions.lock().mark_pending(user_id);

        tracing::info!(user_id = %user_id, "2FAシークレット再発行（セッション無効化）");
        self.build_enrollment(display_name, secret)
    }

    /// 登録済みユーザーの一覧
    pub fn list_enrolled(&self) -> Vec<EnrolledUser> {
        self.list_enrolled_at(OffsetDateTime::now_utc())
    }

    pub fn list_enrolled_at(&self, now: OffsetDateTime) -> Vec<EnrolledUser> {
        let enrolled = self.store.enrolled();
        let mut sessions = self.sessions.lock();

        enrolled
            .into_iter()
            .map(|(user_id, display_name)| EnrolledUser {
                user_id,
                display_name,
                state: sessions.state(user_id, now, self.session_ttl),
            })
            .collect()
    }

    /// 利用統計
    pub fn stats(&self) -> GateStats {
        self.stats_at(OffsetDateTime::now_utc())
    }

    pub fn stats_at(&self, now: OffsetDateTime) -> GateStats {
        let total_enrolled = self.store.count();
        let mut sessions = self.sessions.lock();

        let verified: Vec<Uuid> = sessions.verified_at.keys().copied().collect();
        let currently_verified = verified
            .into_iter()
            .filter(|user_id| sessions.live_until(*user_id, now, self.session_ttl).is_some())
            .count();

        GateStats {
            total_enrolled,
            currently_verified,
            pending: sessions.pending.len(),
        }
    }

    /// 登録済みであること、コードが正しいことを確認
    ///
    /// 確認に使ったシークレットを返す
    fn check_code(
        &self,
        user_id: Uuid,
        code: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<SecretString, AppError> {
        let secret = self.store.get(user_id).ok_or(AppError::NotEnrolled)?;

        let code = code.map(str::trim).unwrap_or_default();
        if code.is_empty() {
            return Err(AppError::CodeRequired);
        }

        let time_step = TotpService::time_step_at(now);
        if !self.totp.verify_code_at(secret.expose_secret(), code, time_step) {
            tracing::warn!(user_id = %user_id, "2FA検証失敗");
            return Err(AppError::TotpInvalid);
        }
        Ok(secret)
    }

    fn create_enrollment(
        &self,
        user_id: Uuid,
        display_name: &str,
    ) -> Result<Enrollment, AppError> {
        let secret = self.store.get_or_create(user_id, display_name);
        self.sessions.lock().mark_pending(user_id);
        self.build_enrollment(display_name, secret)
    }

    fn build_enrollment(
        &self,
        display_name: &str,
        secret: SecretString,
    ) -> Result<Enrollment, AppError> {
        let account = self.totp.account_label(display_name);
        let otpauth_uri = self.totp.otpauth_uri(&account, secret.expose_secret());
        let qr_code = self.totp.generate_qr_code(&account, secret.expose_secret())?;

        Ok(Enrollment {
            secret,
            otpauth_uri,
            qr_code,
        })
    }
}
