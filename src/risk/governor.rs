//! 빈도 제한 및 리스크 이벤트 기록
//!
//! 빈도 제한은 저장소 기반 슬라이딩 윈도우로 판정합니다. 인메모리
//! 카운터가 아니라 로그 행을 세기 때문에 프로세스 재시작 후에도
//! 윈도우가 유지됩니다.

use log::{info, warn};
use sqlx::sqlite::SqlitePool;

use crate::config::{EngineConfig, RateLimitRule};
use crate::db::models::RiskEventRecord;
use crate::db::{now_ts, with_tx_retry};
use crate::error::MarketError;
use crate::external::{notify_best_effort, Notifier, NotifyKind};

/// 하루 상한 판정용 롤링 윈도우 (초)
const DAY_SECONDS: f64 = 86_400.0;

/// 빈도 제한 판정 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// 허용 (윈도우 내 잔여 횟수 포함)
    Allowed { remaining: i64 },
    /// 거부 (재시도 가능 시점까지 남은 초)
    Denied { retry_after_secs: u64 },
}

/// 리스크 통제기
///
/// 쓰기 연산 전의 빈도 게이트와, 의심 행위의 추가 전용 감사 기록을
/// 제공합니다.
pub struct RiskGovernor {
    pool: SqlitePool,
    config: EngineConfig,
}

impl RiskGovernor {
    pub fn new(pool: SqlitePool, config: EngineConfig) -> Self {
        Self { pool, config }
    }

    /// 액션별 빈도 제한 검사
    ///
    /// 등록되지 않은 액션은 무제한 허용입니다. 허용 판정 자체가
    /// 윈도우에 1회로 계수됩니다 (로그 행 삽입). 계수 조회와 삽입은
    /// 한 트랜잭션이어야 합니다 — 분리되면 동시 호출 두 건이 같은
    /// 잔여 횟수를 보고 둘 다 통과할 수 있습니다.
    pub async fn check_rate_limit(
        &self,
        user_id: &str,
        action: &str,
    ) -> Result<RateDecision, MarketError> {
        let rule = match self.config.rate_limits.get(action) {
            Some(rule) => rule,
            None => return Ok(RateDecision::Allowed { remaining: i64::MAX }),
        };

        // 만료 행 정리 — 하루 상한 판정에 쓰일 수 있는 범위는 남김
        let sweep_before = now_ts() - rule.window_seconds.max(86_400) as f64;
        sqlx::query("DELETE FROM rate_limit_logs WHERE action = ? AND created_at < ?")
            .bind(action)
            .bind(sweep_before)
            .execute(&self.pool)
            .await?;

        with_tx_retry("rate_limit", || self.decide_once(user_id, action, rule)).await
    }

    async fn decide_once(
        &self,
        user_id: &str,
        action: &str,
        rule: &RateLimitRule,
    ) -> Result<RateDecision, MarketError> {
        let mut tx = self.pool.begin().await?;
        let now = now_ts();
        let window_start = now - rule.window_seconds as f64;

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM rate_limit_logs
             WHERE user_id = ? AND action = ? AND created_at >= ?",
        )
        .bind(user_id)
        .bind(action)
        .bind(window_start)
        .fetch_one(&mut *tx)
        .await?;

        if count >= rule.max_requests {
            // 윈도우 내 가장 오래된 행이 빠져나가는 시점까지 대기
            let oldest: Option<(f64,)> = sqlx::query_as(
                "SELECT MIN(created_at) FROM rate_limit_logs
                 WHERE user_id = ? AND action = ? AND created_at >= ?",
            )
            .bind(user_id)
            .bind(action)
            .bind(window_start)
            .fetch_optional(&mut *tx)
            .await?;

            let retry_after_secs = oldest
                .map(|(ts,)| (ts + rule.window_seconds as f64 - now).ceil().max(1.0) as u64)
                .unwrap_or(rule.window_seconds);

            warn!(
                "빈도 제한 거부: 사용자 {}, 액션 {} ({}회/{}초)",
                user_id, action, count, rule.window_seconds
            );
            return Ok(RateDecision::Denied { retry_after_secs });
        }

        if let Some(daily_max) = rule.daily_max {
            let (daily_count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM rate_limit_logs
                 WHERE user_id = ? AND action = ? AND created_at >= ?",
            )
            .bind(user_id)
            .bind(action)
            .bind(now - DAY_SECONDS)
            .fetch_one(&mut *tx)
            .await?;

            if daily_count >= daily_max {
                warn!(
                    "일일 상한 거부: 사용자 {}, 액션 {} ({}회/일)",
                    user_id, action, daily_count
                );
                return Ok(RateDecision::Denied {
                    retry_after_secs: DAY_SECONDS as u64,
                });
            }
        }

        // 허용된 호출만 윈도우에 계수 — 판정과 같은 트랜잭션에서
        sqlx::query("INSERT INTO rate_limit_logs (user_id, action, created_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(action)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(RateDecision::Allowed {
            remaining: rule.max_requests - count - 1,
        })
    }

    /// 빈도 게이트: 거부면 에러로 변환
    pub async fn enforce(&self, user_id: &str, action: &str) -> Result<(), MarketError> {
        match self.check_rate_limit(user_id, action).await? {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Denied { retry_after_secs } => {
                Err(MarketError::RateLimited { retry_after_secs })
            }
        }
    }

    /// 리스크 이벤트 기록 (추가 전용)
    pub async fn record_event(
        &self,
        user_id: &str,
        event_type: &str,
        reference_id: Option<&str>,
        details: &serde_json::Value,
        score: i64,
    ) -> Result<i64, MarketError> {
        let result = sqlx::query(
            "INSERT INTO risk_events (user_id, event_type, reference_id, details, score, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(event_type)
        .bind(reference_id)
        .bind(details.to_string())
        .bind(score)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;

        info!(
            "리스크 이벤트 기록: 사용자 {}, 유형 {}, 점수 {}",
            user_id, event_type, score
        );

        Ok(result.last_insert_rowid())
    }

    /// 사용자의 최근 리스크 이벤트 (최신순)
    pub async fn recent_events(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<RiskEventRecord>, MarketError> {
        let events = sqlx::query_as(
            "SELECT * FROM risk_events WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    /// 환불 신청 빈도 검사
    ///
    /// 윈도우 내 환불 신청이 상한에 도달하면 거부하고, 리스크 이벤트와
    /// 관리자 경보를 남깁니다. 경보 실패는 판정에 영향을 주지 않습니다.
    pub async fn check_refund_frequency(
        &self,
        buyer_id: &str,
        notifier: &dyn Notifier,
    ) -> Result<(), MarketError> {
        let rule = &self.config.refund_frequency;
        let window_start = now_ts() - rule.window_seconds as f64;

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM refund_requests WHERE buyer_id = ? AND created_at >= ?",
        )
        .bind(buyer_id)
        .bind(window_start)
        .fetch_one(&self.pool)
        .await?;

        if count < rule.max_requests {
            return Ok(());
        }

        self.record_event(
            buyer_id,
            "refund_freq_exceed",
            None,
            &serde_json::json!({
                "window_seconds": rule.window_seconds,
                "count": count,
            }),
            50,
        )
        .await?;

        notify_best_effort(
            notifier,
            &self.config.admin_inbox,
            "환불 빈도 초과 경보",
            &format!(
                "사용자 {}가 {}초 내 {}회 환불을 신청했습니다",
                buyer_id, rule.window_seconds, count
            ),
            NotifyKind::Warning,
        )
        .await;

        Err(MarketError::RateLimited {
            retry_after_secs: rule.window_seconds,
        })
    }
}
