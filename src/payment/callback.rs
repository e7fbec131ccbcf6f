//! 결제 콜백 처리기
//!
//! 게이트웨이 콜백은 최소 1회 전달이 보장될 뿐 중복/지연 전달이
//! 얼마든지 일어납니다. 같은 거래의 재전달은 금융 상태를 다시 바꾸지
//! 않아야 하며, 이를 위해 금융 전이는 거래 상태 검사와 같은
//! 트랜잭션에서 일어나고 원장 적립은 멱등 키로 보호됩니다.
//!
//! 처리 순서:
//!   1단계 (트랜잭션): 결제/주문 상태 전이 + 판매자 대기 정산 적립
//!   2단계 (커밋 후): 파일 전달 → 성공 시 별도 트랜잭션으로 정산 확정
//!
//! 전달 실패/시간 초과 시 주문은 `paid`로 남고, `complete_delivery`로
//! 재시도할 수 있습니다.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use sqlx::sqlite::SqlitePool;
use tokio::time::timeout;

use crate::db::{now_ts, with_tx_retry};
use crate::error::MarketError;
use crate::external::{notify_best_effort, DeliveryClient, Notifier, NotifyKind};
use crate::risk::RiskGovernor;
use crate::wallet::ledger;

/// 콜백 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// 결제 성공 처리됨 (전달/정산까지 시도)
    Processed { order_id: i64 },
    /// 결제 실패가 기록됨 (종결 상태, 지갑 영향 없음)
    FailedRecorded { order_id: i64 },
    /// 이미 처리된 거래의 재전달 (no-op)
    AlreadyProcessed { order_id: i64 },
    /// 알 수 없는 거래 (감사 기록만 남김)
    NotFound,
}

struct CallbackTarget {
    payment_id: i64,
    order_id: i64,
    order_no: String,
    buyer_id: String,
    seller_id: String,
    expected_cents: i64,
    seller_amount_cents: i64,
    payment_status: String,
}

/// 결제 콜백 처리기
pub struct CallbackProcessor {
    pool: SqlitePool,
    delivery: Arc<dyn DeliveryClient>,
    notifier: Arc<dyn Notifier>,
    risk: Arc<RiskGovernor>,
    call_timeout: Duration,
}

impl CallbackProcessor {
    pub fn new(
        pool: SqlitePool,
        delivery: Arc<dyn DeliveryClient>,
        notifier: Arc<dyn Notifier>,
        risk: Arc<RiskGovernor>,
        call_timeout: Duration,
    ) -> Self {
        Self { pool, delivery, notifier, risk, call_timeout }
    }

    /// 게이트웨이 콜백 처리
    ///
    /// 같은 `transaction_id`로 몇 번을 호출해도 금융 상태 전이는 한
    /// 번만 일어납니다.
    pub async fn handle_callback(
        &self,
        transaction_id: &str,
        success: bool,
        amount_cents: i64,
        payload: Option<&str>,
    ) -> Result<CallbackOutcome, MarketError> {
        let outcome = with_tx_retry("handle_callback", || {
            self.apply_callback_once(transaction_id, success, amount_cents, payload)
        })
        .await?;

        if let CallbackOutcome::Processed { order_id } = outcome {
            self.notify_payment_success(order_id).await;
            self.deliver_and_settle(order_id).await;
        }

        Ok(outcome)
    }

    /// 결제 성공 알림 (전달 결과와 무관하게 발송)
    async fn notify_payment_success(&self, order_id: i64) {
        let order: Result<Option<(String, String, String)>, sqlx::Error> =
            sqlx::query_as("SELECT order_no, buyer_id, seller_id FROM orders WHERE id = ?")
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await;
        let (order_no, buyer_id, seller_id) = match order {
            Ok(Some(row)) => row,
            _ => return,
        };

        notify_best_effort(
            self.notifier.as_ref(),
            &buyer_id,
            "결제 완료",
            &format!("주문 {}의 결제가 확인되었습니다.", order_no),
            NotifyKind::Success,
        )
        .await;
        notify_best_effort(
            self.notifier.as_ref(),
            &seller_id,
            "판매 대금 대기 정산",
            &format!("주문 {}의 판매 대금이 대기 정산으로 적립되었습니다.", order_no),
            NotifyKind::Info,
        )
        .await;
    }

    /// 1단계: 상태 전이와 대기 정산 적립 (단일 트랜잭션)
    async fn apply_callback_once(
        &self,
        transaction_id: &str,
        success: bool,
        amount_cents: i64,
        payload: Option<&str>,
    ) -> Result<CallbackOutcome, MarketError> {
        let mut tx = self.pool.begin().await?;
        let now = now_ts();

        let target: Option<CallbackTarget> = sqlx::query_as::<_, (i64, i64, String, String, String, i64, i64, String)>(
            "SELECT p.id, p.order_id, o.order_no, o.buyer_id, o.seller_id,
                    p.amount_cents, o.seller_amount_cents, p.status
             FROM order_payments p JOIN orders o ON o.id = p.order_id
             WHERE p.transaction_id = ?",
        )
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|(payment_id, order_id, order_no, buyer_id, seller_id, expected_cents, seller_amount_cents, payment_status)| {
            CallbackTarget {
                payment_id,
                order_id,
                order_no,
                buyer_id,
                seller_id,
                expected_cents,
                seller_amount_cents,
                payment_status,
            }
        });

        let target = match target {
            Some(target) => target,
            None => {
                // 알 수 없는 거래도 감사 기록은 남긴다
                sqlx::query(
                    "INSERT INTO payment_callback_logs (transaction_id, status, payload, created_at)
                     VALUES (?, 'orphan', ?, ?)",
                )
                .bind(transaction_id)
                .bind(payload)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;

                warn!("알 수 없는 거래의 콜백: {}", transaction_id);
                return Ok(CallbackOutcome::NotFound);
            }
        };

        if target.payment_status != "pending" {
            sqlx::query(
                "INSERT INTO payment_callback_logs (order_id, transaction_id, status, payload, created_at)
                 VALUES (?, ?, 'duplicate', ?, ?)",
            )
            .bind(target.order_id)
            .bind(transaction_id)
            .bind(payload)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            info!("중복 콜백 무시: 거래 {} (주문 {})", transaction_id, target.order_no);
            return Ok(CallbackOutcome::AlreadyProcessed { order_id: target.order_id });
        }

        if amount_cents != target.expected_cents {
            // 상태는 바꾸지 않고 거부 — 감사 기록과 리스크 이벤트만
            sqlx::query(
                "INSERT INTO payment_callback_logs (order_id, transaction_id, status, payload, created_at)
                 VALUES (?, ?, 'mismatch', ?, ?)",
            )
            .bind(target.order_id)
            .bind(transaction_id)
            .bind(payload)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            self.risk
                .record_event(
                    &target.buyer_id,
                    "amount_mismatch",
                    Some(&target.order_id.to_string()),
                    &serde_json::json!({
                        "transaction_id": transaction_id,
                        "expected": target.expected_cents,
                        "actual": amount_cents,
                    }),
                    80,
                )
                .await?;

            return Err(MarketError::AmountMismatch {
                expected: target.expected_cents,
                actual: amount_cents,
            });
        }

        if !success {
            sqlx::query("UPDATE order_payments SET status = 'failed' WHERE id = ?")
                .bind(target.payment_id)
                .execute(&mut *tx)
                .await?;
            // 결제 실패는 종결 상태 — 지갑에는 아무 영향 없음
            sqlx::query(
                "UPDATE orders SET status = 'failed', payment_status = 'failed', updated_at = ?
                 WHERE id = ?",
            )
            .bind(now)
            .bind(target.order_id)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "INSERT INTO payment_callback_logs (order_id, transaction_id, status, payload, created_at)
                 VALUES (?, ?, 'failed', ?, ?)",
            )
            .bind(target.order_id)
            .bind(transaction_id)
            .bind(payload)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            info!("결제 실패 기록: 주문 {} (거래 {})", target.order_no, transaction_id);
            return Ok(CallbackOutcome::FailedRecorded { order_id: target.order_id });
        }

        sqlx::query("UPDATE order_payments SET status = 'success', paid_at = ? WHERE id = ?")
            .bind(now)
            .bind(target.payment_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE orders SET status = 'paid', payment_status = 'success', paid_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(target.order_id)
        .execute(&mut *tx)
        .await?;

        // 판매자 몫은 대기 정산으로 — 전달 확인 전에는 출금 불가
        ledger::credit_pending(
            &mut tx,
            &target.seller_id,
            target.seller_amount_cents,
            "sale",
            &target.order_id.to_string(),
            Some(&format!("주문 {} 판매 대금", target.order_no)),
        )
        .await?;

        sqlx::query(
            "INSERT INTO payment_callback_logs (order_id, transaction_id, status, payload, created_at)
             VALUES (?, ?, 'success', ?, ?)",
        )
        .bind(target.order_id)
        .bind(transaction_id)
        .bind(payload)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            "결제 성공 처리: 주문 {} (거래 {}, 판매자 적립 {}센트)",
            target.order_no, transaction_id, target.seller_amount_cents
        );

        Ok(CallbackOutcome::Processed { order_id: target.order_id })
    }

    /// 2단계: 파일 전달 후 정산 확정
    ///
    /// 전달 실패나 시간 초과 시 주문은 `paid`로 남습니다. 이미 커밋된
    /// 결제 전이는 되돌리지 않습니다.
    async fn deliver_and_settle(&self, order_id: i64) {
        match timeout(self.call_timeout, self.delivery.deliver(order_id)).await {
            Ok(Ok(())) => {
                if let Err(e) = self.settle_order(order_id).await {
                    warn!("정산 확정 실패: 주문 {} ({})", order_id, e);
                }
            }
            Ok(Err(e)) => {
                warn!("파일 전달 실패: 주문 {} ({}) — paid 상태로 유지", order_id, e);
            }
            Err(_) => {
                warn!("파일 전달 시간 초과: 주문 {} — paid 상태로 유지", order_id);
            }
        }
    }

    /// 전달 재시도 + 정산 확정
    ///
    /// `paid`에서 멈춘 주문을 완료 상태로 밀어 넣습니다. 멱등: 이미
    /// 완료된 주문이면 `AlreadyProcessed`입니다.
    pub async fn complete_delivery(&self, order_id: i64) -> Result<(), MarketError> {
        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM orders WHERE id = ?")
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await?;
        let (status,) = status.ok_or(MarketError::NotFound("주문"))?;
        match status.as_str() {
            "paid" => {}
            "completed" => return Err(MarketError::AlreadyProcessed),
            other => {
                return Err(MarketError::InvalidState(format!(
                    "전달할 수 없는 주문 상태입니다: {}",
                    other
                )))
            }
        }

        match timeout(self.call_timeout, self.delivery.deliver(order_id)).await {
            Ok(Ok(())) => self.settle_order(order_id).await,
            Ok(Err(e)) => Err(MarketError::Provider(e.to_string())),
            Err(_) => Err(MarketError::Provider("파일 전달 시간 초과".to_string())),
        }
    }

    async fn settle_order(&self, order_id: i64) -> Result<(), MarketError> {
        let (order_no, buyer_id, seller_id) =
            with_tx_retry("settle_order", || self.settle_order_once(order_id)).await?;

        info!("주문 완료 및 정산 확정: {}", order_no);

        notify_best_effort(
            self.notifier.as_ref(),
            &buyer_id,
            "주문 완료",
            &format!("주문 {}의 파일이 전달되었습니다.", order_no),
            NotifyKind::Success,
        )
        .await;
        notify_best_effort(
            self.notifier.as_ref(),
            &seller_id,
            "판매 대금 정산",
            &format!("주문 {}의 판매 대금이 가용 잔액으로 정산되었습니다.", order_no),
            NotifyKind::Success,
        )
        .await;

        Ok(())
    }

    async fn settle_order_once(
        &self,
        order_id: i64,
    ) -> Result<(String, String, String), MarketError> {
        let mut tx = self.pool.begin().await?;
        let now = now_ts();

        let order: Option<(String, String, String, i64, String)> = sqlx::query_as(
            "SELECT order_no, buyer_id, seller_id, seller_amount_cents, status
             FROM orders WHERE id = ?",
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (order_no, buyer_id, seller_id, seller_amount_cents, status) =
            order.ok_or(MarketError::NotFound("주문"))?;

        if status != "paid" {
            return Err(MarketError::InvalidState(format!(
                "정산할 수 없는 주문 상태입니다: {}",
                status
            )));
        }

        ledger::settle(
            &mut tx,
            &seller_id,
            seller_amount_cents,
            "settlement",
            &order_id.to_string(),
            Some(&format!("주문 {} 정산 확정", order_no)),
        )
        .await?;

        sqlx::query(
            "UPDATE orders SET status = 'completed', completed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO order_logs (order_id, action, details, created_at)
             VALUES (?, 'complete', '{}', ?)",
        )
        .bind(order_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((order_no, buyer_id, seller_id))
    }
}
