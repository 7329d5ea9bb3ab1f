//! スタッフ向け TOTP 二要素認証ゲート
//!
//! プロキシから届くイベント（参加・バックエンド接続前）に対して、
//! 2FA の登録・検証・セッション判定を行う。

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod services;
pub mod state;
