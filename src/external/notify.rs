//! 알림 협력자
//!
//! 알림은 항상 최선 노력(best-effort)입니다. 실패는 로그로 남기고
//! 삼키며, 호출자의 금융 전이를 절대 되돌리지 않습니다.

use async_trait::async_trait;
use log::warn;
use sqlx::sqlite::SqlitePool;
use thiserror::Error;

use crate::db::now_ts;

/// 알림 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Info,
    Success,
    Warning,
    Error,
}

impl NotifyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyKind::Info => "info",
            NotifyKind::Success => "success",
            NotifyKind::Warning => "warning",
            NotifyKind::Error => "error",
        }
    }
}

/// 알림 에러 타입
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("저장소 오류: {0}")]
    Store(#[from] sqlx::Error),
    #[error("전송 실패: {0}")]
    Failed(String),
}

/// 알림 전송 클라이언트
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: &str,
        title: &str,
        content: &str,
        kind: NotifyKind,
    ) -> Result<(), NotifyError>;
}

/// DB 수신함 기반 기본 알림 구현
///
/// 렌더링/외부 전송은 알림 서브시스템의 몫이고, 엔진은 수신함 행만
/// 남깁니다.
pub struct DbNotifier {
    pool: SqlitePool,
}

impl DbNotifier {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Notifier for DbNotifier {
    async fn notify(
        &self,
        user_id: &str,
        title: &str,
        content: &str,
        kind: NotifyKind,
    ) -> Result<(), NotifyError> {
        sqlx::query(
            "INSERT INTO notifications (user_id, title, content, type, sender_role, created_at)
             VALUES (?, ?, ?, ?, 'system', ?)",
        )
        .bind(user_id)
        .bind(title)
        .bind(content)
        .bind(kind.as_str())
        .bind(now_ts())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// 최선 노력 알림 전송 (실패는 경고 로그 후 무시)
pub async fn notify_best_effort(
    notifier: &dyn Notifier,
    user_id: &str,
    title: &str,
    content: &str,
    kind: NotifyKind,
) {
    if let Err(e) = notifier.notify(user_id, title, content, kind).await {
        warn!("알림 전송 실패 (수신자 {}, 제목 {}): {}", user_id, title, e);
    }
}
