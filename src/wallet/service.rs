//! 지갑 조회 및 출금 워크플로
//!
//! 출금 신청은 가용 잔액을 즉시 동결(차감)하고, 심사 거절 시에만
//! 복원합니다. 동결은 한 트랜잭션 안에서 신청 행 삽입과 함께
//! 일어나므로 이중 동결이 불가능합니다.

use std::sync::Arc;

use log::info;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;

use crate::config::EngineConfig;
use crate::db::models::{PayoutRequestRecord, WalletLogRecord, WalletRecord};
use crate::db::{now_ts, with_tx_retry};
use crate::error::MarketError;
use crate::external::{notify_best_effort, Notifier, NotifyKind};
use crate::risk::RiskGovernor;

/// 출금 심사 결정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutReview {
    /// 지급 완료 (동결분은 이미 차감되어 있으므로 잔액 변화 없음)
    Paid,
    /// 거절 (동결분 복원)
    Rejected,
}

impl PayoutReview {
    fn as_str(&self) -> &'static str {
        match self {
            PayoutReview::Paid => "paid",
            PayoutReview::Rejected => "rejected",
        }
    }
}

/// 지갑 조회 결과
#[derive(Debug, Serialize)]
pub struct WalletView {
    pub user_id: String,
    pub balance_cents: i64,
    pub pending_settlement_cents: i64,
    /// 정산 확정 누적 수입
    pub total_income_cents: i64,
    pub recent_logs: Vec<WalletLogRecord>,
    pub recent_payouts: Vec<PayoutRequestRecord>,
}

/// 지갑 서비스
pub struct WalletService {
    pool: SqlitePool,
    risk: Arc<RiskGovernor>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl WalletService {
    pub fn new(
        pool: SqlitePool,
        risk: Arc<RiskGovernor>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self { pool, risk, notifier, config }
    }

    /// 지갑 조회 (행이 없으면 0 잔액으로 생성)
    pub async fn get_wallet(&self, user_id: &str) -> Result<WalletView, MarketError> {
        sqlx::query(
            "INSERT OR IGNORE INTO user_wallets (user_id, balance_cents, pending_settlement_cents, updated_at)
             VALUES (?, 0, 0, ?)",
        )
        .bind(user_id)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;

        let wallet: WalletRecord =
            sqlx::query_as("SELECT * FROM user_wallets WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        let (total_income_cents,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(change_cents), 0) FROM wallet_logs
             WHERE user_id = ? AND type = 'settlement'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let recent_logs: Vec<WalletLogRecord> = sqlx::query_as(
            "SELECT * FROM wallet_logs WHERE user_id = ? ORDER BY created_at DESC LIMIT 20",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let recent_payouts: Vec<PayoutRequestRecord> = sqlx::query_as(
            "SELECT * FROM payout_requests WHERE user_id = ? ORDER BY created_at DESC LIMIT 10",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(WalletView {
            user_id: user_id.to_string(),
            balance_cents: wallet.balance_cents,
            pending_settlement_cents: wallet.pending_settlement_cents,
            total_income_cents,
            recent_logs,
            recent_payouts,
        })
    }

    /// 출금 신청
    ///
    /// 한도 검사 후 가용 잔액을 동결하고 신청 행을 만듭니다.
    /// 미처리 신청이 있으면 새 신청을 받지 않습니다.
    pub async fn create_payout_request(
        &self,
        user_id: &str,
        amount_cents: i64,
        method: &str,
        account_info: &str,
    ) -> Result<i64, MarketError> {
        self.risk.enforce(user_id, "create_payout").await?;

        let limits = &self.config.payout_limits;
        if amount_cents < limits.min_amount_cents {
            return Err(MarketError::Validation(format!(
                "최소 출금 금액은 {}센트입니다",
                limits.min_amount_cents
            )));
        }
        if amount_cents > limits.max_amount_cents {
            return Err(MarketError::Validation(format!(
                "단건 최대 출금 금액은 {}센트입니다",
                limits.max_amount_cents
            )));
        }

        let payout_id = with_tx_retry("create_payout", || {
            self.create_payout_once(user_id, amount_cents, method, account_info)
        })
        .await?;

        info!("출금 신청 생성: 사용자 {}, {}센트 (#{})", user_id, amount_cents, payout_id);

        notify_best_effort(
            self.notifier.as_ref(),
            user_id,
            "출금 신청 접수",
            &format!("{}센트 출금 신청이 접수되었습니다. 심사 후 지급됩니다.", amount_cents),
            NotifyKind::Info,
        )
        .await;

        Ok(payout_id)
    }

    async fn create_payout_once(
        &self,
        user_id: &str,
        amount_cents: i64,
        method: &str,
        account_info: &str,
    ) -> Result<i64, MarketError> {
        let mut tx = self.pool.begin().await?;
        let now = now_ts();

        // 미처리 신청 중복 금지
        let pending: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM payout_requests WHERE user_id = ? AND status = 'pending'",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((id,)) = pending {
            return Err(MarketError::InvalidState(format!(
                "심사 대기 중인 출금 신청(#{})이 있습니다",
                id
            )));
        }

        // 롤링 1일 출금 한도 (거절 건 제외)
        let (daily_total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM payout_requests
             WHERE user_id = ? AND status != 'rejected' AND created_at >= ?",
        )
        .bind(user_id)
        .bind(now - 86_400.0)
        .fetch_one(&mut *tx)
        .await?;
        if daily_total + amount_cents > self.config.payout_limits.daily_limit_cents {
            return Err(MarketError::Validation(format!(
                "1일 출금 한도({}센트)를 초과합니다",
                self.config.payout_limits.daily_limit_cents
            )));
        }

        // 동결은 가용 잔액에서만 — 대기 정산은 출금할 수 없음
        let balance: Option<(i64,)> =
            sqlx::query_as("SELECT balance_cents FROM user_wallets WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let balance = balance.map(|(b,)| b).unwrap_or(0);
        if balance < amount_cents {
            return Err(MarketError::InsufficientFunds {
                required: amount_cents,
                available: balance,
            });
        }

        let result = sqlx::query(
            "INSERT INTO payout_requests (user_id, amount_cents, status, method, account_info, created_at)
             VALUES (?, ?, 'pending', ?, ?, ?)",
        )
        .bind(user_id)
        .bind(amount_cents)
        .bind(method)
        .bind(account_info)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let payout_id = result.last_insert_rowid();

        sqlx::query(
            "UPDATE user_wallets SET balance_cents = balance_cents - ?, updated_at = ?
             WHERE user_id = ?",
        )
        .bind(amount_cents)
        .bind(now)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO wallet_logs (user_id, change_cents, balance_after, type, reference_id, remark, created_at)
             VALUES (?, ?, ?, 'payout_freeze', ?, '출금 신청 동결', ?)",
        )
        .bind(user_id)
        .bind(-amount_cents)
        .bind(balance - amount_cents)
        .bind(payout_id.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(payout_id)
    }

    /// 출금 심사
    ///
    /// 미처리(pending) 신청만 심사할 수 있습니다. 이미 처리된 신청은
    /// `AlreadyProcessed`로 구분합니다.
    pub async fn review_payout(
        &self,
        payout_id: i64,
        reviewer_id: &str,
        decision: PayoutReview,
        remark: Option<&str>,
    ) -> Result<(), MarketError> {
        let user_id = with_tx_retry("review_payout", || {
            self.review_payout_once(payout_id, reviewer_id, decision, remark)
        })
        .await?;

        info!(
            "출금 심사 완료: #{} -> {} (심사자 {})",
            payout_id,
            decision.as_str(),
            reviewer_id
        );

        let (title, body, kind) = match decision {
            PayoutReview::Paid => (
                "출금 지급 완료",
                format!("출금 신청 #{}이 지급되었습니다.", payout_id),
                NotifyKind::Success,
            ),
            PayoutReview::Rejected => (
                "출금 신청 거절",
                format!("출금 신청 #{}이 거절되어 금액이 복원되었습니다.", payout_id),
                NotifyKind::Warning,
            ),
        };
        notify_best_effort(self.notifier.as_ref(), &user_id, title, &body, kind).await;

        Ok(())
    }

    async fn review_payout_once(
        &self,
        payout_id: i64,
        reviewer_id: &str,
        decision: PayoutReview,
        remark: Option<&str>,
    ) -> Result<String, MarketError> {
        let mut tx = self.pool.begin().await?;
        let now = now_ts();

        let payout: Option<(String, i64, String)> = sqlx::query_as(
            "SELECT user_id, amount_cents, status FROM payout_requests WHERE id = ?",
        )
        .bind(payout_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (user_id, amount_cents, status) =
            payout.ok_or(MarketError::NotFound("출금 신청"))?;

        if status != "pending" {
            return Err(MarketError::AlreadyProcessed);
        }

        sqlx::query("UPDATE payout_requests SET status = ?, remark = ?, processed_at = ? WHERE id = ?")
            .bind(decision.as_str())
            .bind(remark)
            .bind(now)
            .bind(payout_id)
            .execute(&mut *tx)
            .await?;

        match decision {
            PayoutReview::Rejected => {
                // 동결 복원
                sqlx::query(
                    "UPDATE user_wallets SET balance_cents = balance_cents + ?, updated_at = ?
                     WHERE user_id = ?",
                )
                .bind(amount_cents)
                .bind(now)
                .bind(&user_id)
                .execute(&mut *tx)
                .await?;

                let (balance_after,): (i64,) =
                    sqlx::query_as("SELECT balance_cents FROM user_wallets WHERE user_id = ?")
                        .bind(&user_id)
                        .fetch_one(&mut *tx)
                        .await?;

                sqlx::query(
                    "INSERT INTO wallet_logs (user_id, change_cents, balance_after, type, reference_id, remark, created_at)
                     VALUES (?, ?, ?, 'payout_reject', ?, '출금 거절 복원', ?)",
                )
                .bind(&user_id)
                .bind(amount_cents)
                .bind(balance_after)
                .bind(payout_id.to_string())
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            PayoutReview::Paid => {
                // 동결 시점에 이미 차감됨 — 지급 확정 기록만 남김
                let (balance_after,): (i64,) =
                    sqlx::query_as("SELECT balance_cents FROM user_wallets WHERE user_id = ?")
                        .bind(&user_id)
                        .fetch_one(&mut *tx)
                        .await?;

                sqlx::query(
                    "INSERT INTO wallet_logs (user_id, change_cents, balance_after, type, reference_id, remark, created_at)
                     VALUES (?, 0, ?, 'payout_paid', ?, '출금 지급 완료', ?)",
                )
                .bind(&user_id)
                .bind(balance_after)
                .bind(payout_id.to_string())
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            "INSERT INTO payout_logs (payout_id, action, reviewer_id, remark, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(payout_id)
        .bind(decision.as_str())
        .bind(reviewer_id)
        .bind(remark)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;
    use crate::external::DbNotifier;

    async fn setup() -> (SqlitePool, WalletService) {
        let pool = init_memory_database().await.unwrap();
        let config = EngineConfig::default();
        let risk = Arc::new(RiskGovernor::new(pool.clone(), config.clone()));
        let notifier = Arc::new(DbNotifier::new(pool.clone()));
        let service = WalletService::new(pool.clone(), risk, notifier, config);
        (pool, service)
    }

    async fn fund_balance(pool: &SqlitePool, user_id: &str, amount: i64) {
        let mut tx = pool.begin().await.unwrap();
        crate::wallet::ledger::credit_balance(&mut tx, user_id, amount, "manual", "seed", None)
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_payout_freezes_balance() {
        let (pool, service) = setup().await;
        fund_balance(&pool, "seller", 10_000).await;

        let payout_id = service
            .create_payout_request("seller", 4_000, "bank", "110-222")
            .await
            .unwrap();
        assert!(payout_id > 0);

        let view = service.get_wallet("seller").await.unwrap();
        assert_eq!(view.balance_cents, 6_000);
    }

    #[tokio::test]
    async fn test_payout_rejects_below_minimum() {
        let (pool, service) = setup().await;
        fund_balance(&pool, "seller", 10_000).await;

        let err = service
            .create_payout_request("seller", 50, "bank", "110-222")
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
    }

    #[tokio::test]
    async fn test_payout_insufficient_balance() {
        let (pool, service) = setup().await;
        fund_balance(&pool, "seller", 1_000).await;

        let err = service
            .create_payout_request("seller", 2_000, "bank", "110-222")
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn test_second_pending_payout_refused() {
        let (pool, service) = setup().await;
        fund_balance(&pool, "seller", 10_000).await;

        service
            .create_payout_request("seller", 1_000, "bank", "110-222")
            .await
            .unwrap();
        let err = service
            .create_payout_request("seller", 1_000, "bank", "110-222")
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_daily_payout_limit() {
        let pool = init_memory_database().await.unwrap();
        let mut config = EngineConfig::default();
        config.payout_limits.daily_limit_cents = 5_000;
        let risk = Arc::new(RiskGovernor::new(pool.clone(), config.clone()));
        let notifier = Arc::new(DbNotifier::new(pool.clone()));
        let service = WalletService::new(pool.clone(), risk, notifier, config);

        fund_balance(&pool, "seller", 20_000).await;

        let first = service
            .create_payout_request("seller", 3_000, "bank", "110-222")
            .await
            .unwrap();
        service
            .review_payout(first, "admin", PayoutReview::Paid, None)
            .await
            .unwrap();

        // 지급 완료 건도 1일 한도에 계수된다
        let err = service
            .create_payout_request("seller", 3_000, "bank", "110-222")
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reject_restores_frozen_amount() {
        let (pool, service) = setup().await;
        fund_balance(&pool, "seller", 10_000).await;

        let payout_id = service
            .create_payout_request("seller", 4_000, "bank", "110-222")
            .await
            .unwrap();
        service
            .review_payout(payout_id, "admin", PayoutReview::Rejected, Some("정보 불일치"))
            .await
            .unwrap();

        let view = service.get_wallet("seller").await.unwrap();
        assert_eq!(view.balance_cents, 10_000);
    }

    #[tokio::test]
    async fn test_paid_leaves_balance_untouched() {
        let (pool, service) = setup().await;
        fund_balance(&pool, "seller", 10_000).await;

        let payout_id = service
            .create_payout_request("seller", 4_000, "bank", "110-222")
            .await
            .unwrap();
        service
            .review_payout(payout_id, "admin", PayoutReview::Paid, None)
            .await
            .unwrap();

        let view = service.get_wallet("seller").await.unwrap();
        assert_eq!(view.balance_cents, 6_000);

        // 재심사는 멱등 위반으로 거부
        let err = service
            .review_payout(payout_id, "admin", PayoutReview::Paid, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::AlreadyProcessed));
    }
}
