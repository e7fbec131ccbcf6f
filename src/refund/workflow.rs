//! 환불 워크플로
//!
//! 신청 -> 심사 -> 집행의 3단계입니다. 돈이 움직이는 곳은 집행뿐이며,
//! 집행은 판매자 차감 + 구매자 입금 + 구매 권한 회수를 한 트랜잭션으로
//! 묶습니다. 판매자 자금이 부족하면 아무것도 바꾸지 않고 확정 오류를
//! 반환합니다 — 음수 잔액은 어떤 경우에도 만들지 않습니다.

use std::sync::Arc;

use log::info;
use sqlx::sqlite::SqlitePool;

use crate::db::models::RefundRequestRecord;
use crate::db::{now_ts, with_tx_retry};
use crate::error::MarketError;
use crate::external::{notify_best_effort, Notifier, NotifyKind};
use crate::risk::RiskGovernor;
use crate::wallet::ledger;

/// 환불 심사 결정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundReview {
    Approved,
    Rejected,
}

impl RefundReview {
    fn as_str(&self) -> &'static str {
        match self {
            RefundReview::Approved => "approved",
            RefundReview::Rejected => "rejected",
        }
    }
}

/// 환불 워크플로
pub struct RefundWorkflow {
    pool: SqlitePool,
    risk: Arc<RiskGovernor>,
    notifier: Arc<dyn Notifier>,
}

impl RefundWorkflow {
    pub fn new(pool: SqlitePool, risk: Arc<RiskGovernor>, notifier: Arc<dyn Notifier>) -> Self {
        Self { pool, risk, notifier }
    }

    /// 환불 신청
    ///
    /// 결제 완료(paid) 또는 완료(completed) 주문만, 구매자 본인만
    /// 신청할 수 있습니다. 전액 환불만 지원합니다.
    pub async fn request_refund(
        &self,
        order_id: i64,
        buyer_id: &str,
        reason: &str,
    ) -> Result<i64, MarketError> {
        self.risk
            .check_refund_frequency(buyer_id, self.notifier.as_ref())
            .await?;

        let (refund_id, seller_id, order_no) = with_tx_retry("request_refund", || {
            self.request_refund_once(order_id, buyer_id, reason)
        })
        .await?;

        self.risk
            .record_event(
                buyer_id,
                "refund_apply",
                Some(&order_id.to_string()),
                &serde_json::json!({ "refund_id": refund_id, "reason": reason }),
                10,
            )
            .await?;

        info!("환불 신청: 주문 {} (환불 #{}, 구매자 {})", order_no, refund_id, buyer_id);

        notify_best_effort(
            self.notifier.as_ref(),
            &seller_id,
            "환불 신청 접수",
            &format!("주문 {}에 환불 신청이 접수되었습니다. 사유: {}", order_no, reason),
            NotifyKind::Warning,
        )
        .await;

        Ok(refund_id)
    }

    async fn request_refund_once(
        &self,
        order_id: i64,
        buyer_id: &str,
        reason: &str,
    ) -> Result<(i64, String, String), MarketError> {
        let mut tx = self.pool.begin().await?;
        let now = now_ts();

        let order: Option<(String, String, String, i64, Option<String>, String)> = sqlx::query_as(
            "SELECT buyer_id, seller_id, status, total_amount_cents, refund_status, order_no
             FROM orders WHERE id = ?",
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (owner, seller_id, status, total_amount_cents, refund_status, order_no) =
            order.ok_or(MarketError::NotFound("주문"))?;

        if owner != buyer_id {
            return Err(MarketError::NotFound("주문"));
        }
        if status != "paid" && status != "completed" {
            return Err(MarketError::InvalidState(format!(
                "환불할 수 없는 주문 상태입니다: {}",
                status
            )));
        }
        // 거절된 신청 후의 재신청만 허용
        if matches!(refund_status.as_deref(), Some("pending") | Some("approved") | Some("processed")) {
            return Err(MarketError::InvalidState(
                "이미 진행 중이거나 완료된 환불이 있습니다".to_string(),
            ));
        }

        let result = sqlx::query(
            "INSERT INTO refund_requests (order_id, buyer_id, seller_id, amount_cents, reason, status, created_at)
             VALUES (?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(order_id)
        .bind(buyer_id)
        .bind(&seller_id)
        .bind(total_amount_cents)
        .bind(reason)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let refund_id = result.last_insert_rowid();

        sqlx::query(
            "UPDATE orders SET refund_status = 'pending', refund_reason = ?, refund_requested_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(reason)
        .bind(now)
        .bind(now)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO order_logs (order_id, action, details, user_id, created_at)
             VALUES (?, 'refund_request', ?, ?, ?)",
        )
        .bind(order_id)
        .bind(serde_json::json!({ "refund_id": refund_id, "reason": reason }).to_string())
        .bind(buyer_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((refund_id, seller_id, order_no))
    }

    /// 환불 신청 조회
    pub async fn get_refund(&self, refund_id: i64) -> Result<RefundRequestRecord, MarketError> {
        let refund: Option<RefundRequestRecord> =
            sqlx::query_as("SELECT * FROM refund_requests WHERE id = ?")
                .bind(refund_id)
                .fetch_optional(&self.pool)
                .await?;
        refund.ok_or(MarketError::NotFound("환불 신청"))
    }

    /// 심사 대기 중인 환불 목록 (오래된 순)
    pub async fn list_pending_refunds(
        &self,
        limit: i64,
    ) -> Result<Vec<RefundRequestRecord>, MarketError> {
        let refunds = sqlx::query_as(
            "SELECT * FROM refund_requests WHERE status = 'pending' ORDER BY created_at ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(refunds)
    }

    /// 환불 심사
    ///
    /// 미처리(pending) 신청만 심사할 수 있습니다. 승인해도 돈은 아직
    /// 움직이지 않습니다 — 집행은 `process_refund`에서 합니다.
    pub async fn review_refund(
        &self,
        refund_id: i64,
        reviewer_id: &str,
        decision: RefundReview,
        remark: Option<&str>,
    ) -> Result<(), MarketError> {
        let (order_id, buyer_id, seller_id) = with_tx_retry("review_refund", || {
            self.review_refund_once(refund_id, reviewer_id, decision, remark)
        })
        .await?;

        info!(
            "환불 심사: #{} -> {} (심사자 {})",
            refund_id,
            decision.as_str(),
            reviewer_id
        );

        let (title, body, kind) = match decision {
            RefundReview::Approved => (
                "환불 승인",
                format!("주문 #{}의 환불 신청이 승인되어 곧 집행됩니다.", order_id),
                NotifyKind::Info,
            ),
            RefundReview::Rejected => (
                "환불 거절",
                format!("주문 #{}의 환불 신청이 거절되었습니다.", order_id),
                NotifyKind::Warning,
            ),
        };
        notify_best_effort(self.notifier.as_ref(), &buyer_id, title, &body, kind).await;
        notify_best_effort(
            self.notifier.as_ref(),
            &seller_id,
            title,
            &format!("주문 #{}의 환불 신청이 {} 처리되었습니다.", order_id, decision.as_str()),
            NotifyKind::Info,
        )
        .await;

        Ok(())
    }

    async fn review_refund_once(
        &self,
        refund_id: i64,
        reviewer_id: &str,
        decision: RefundReview,
        remark: Option<&str>,
    ) -> Result<(i64, String, String), MarketError> {
        let mut tx = self.pool.begin().await?;
        let now = now_ts();

        let refund: Option<(i64, String, String, String)> = sqlx::query_as(
            "SELECT order_id, buyer_id, seller_id, status FROM refund_requests WHERE id = ?",
        )
        .bind(refund_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (order_id, buyer_id, seller_id, status) =
            refund.ok_or(MarketError::NotFound("환불 신청"))?;

        if status != "pending" {
            return Err(MarketError::AlreadyProcessed);
        }

        sqlx::query("UPDATE refund_requests SET status = ?, reviewer_id = ?, remark = ? WHERE id = ?")
            .bind(decision.as_str())
            .bind(reviewer_id)
            .bind(remark)
            .bind(refund_id)
            .execute(&mut *tx)
            .await?;

        // 거절이면 처리 종료 시각까지 기록
        if decision == RefundReview::Rejected {
            sqlx::query("UPDATE refund_requests SET processed_at = ? WHERE id = ?")
                .bind(now)
                .bind(refund_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE orders SET refund_status = ?, updated_at = ? WHERE id = ?")
            .bind(decision.as_str())
            .bind(now)
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO order_logs (order_id, action, details, user_id, created_at)
             VALUES (?, 'refund_review', ?, ?, ?)",
        )
        .bind(order_id)
        .bind(serde_json::json!({ "refund_id": refund_id, "decision": decision.as_str() }).to_string())
        .bind(reviewer_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((order_id, buyer_id, seller_id))
    }

    /// 환불 집행
    ///
    /// 승인된 신청만 집행합니다. 판매자 차감, 구매자 입금, 구매 권한
    /// 회수, 상태 전이가 한 트랜잭션입니다. 판매자 자금 부족은 확정
    /// 오류이며 재시도 대상이 아닙니다. 집행자는 신청 행과 주문 로그에
    /// 기록됩니다.
    pub async fn process_refund(
        &self,
        refund_id: i64,
        operator_id: &str,
        remark: Option<&str>,
    ) -> Result<(), MarketError> {
        let (order_id, buyer_id, seller_id, amount_cents) = with_tx_retry("process_refund", || {
            self.process_refund_once(refund_id, operator_id, remark)
        })
        .await?;

        info!(
            "환불 집행 완료: #{} (주문 {}, {}센트, {} -> {}, 집행자 {})",
            refund_id, order_id, amount_cents, seller_id, buyer_id, operator_id
        );

        notify_best_effort(
            self.notifier.as_ref(),
            &buyer_id,
            "환불 완료",
            &format!("주문 #{}의 환불 {}센트가 지갑으로 입금되었습니다.", order_id, amount_cents),
            NotifyKind::Success,
        )
        .await;
        notify_best_effort(
            self.notifier.as_ref(),
            &seller_id,
            "환불 차감 안내",
            &format!("주문 #{}의 환불 {}센트가 지갑에서 차감되었습니다.", order_id, amount_cents),
            NotifyKind::Warning,
        )
        .await;

        Ok(())
    }

    async fn process_refund_once(
        &self,
        refund_id: i64,
        operator_id: &str,
        remark: Option<&str>,
    ) -> Result<(i64, String, String, i64), MarketError> {
        let mut tx = self.pool.begin().await?;
        let now = now_ts();

        let refund: Option<(i64, String, String, i64, String)> = sqlx::query_as(
            "SELECT order_id, buyer_id, seller_id, amount_cents, status
             FROM refund_requests WHERE id = ?",
        )
        .bind(refund_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (order_id, buyer_id, seller_id, amount_cents, status) =
            refund.ok_or(MarketError::NotFound("환불 신청"))?;

        match status.as_str() {
            "approved" => {}
            "processed" => return Err(MarketError::AlreadyProcessed),
            other => {
                return Err(MarketError::InvalidState(format!(
                    "집행할 수 없는 환불 상태입니다: {}",
                    other
                )))
            }
        }

        ledger::debit(
            &mut tx,
            &seller_id,
            amount_cents,
            "refund_out",
            &refund_id.to_string(),
            Some(&format!("주문 #{} 환불 차감", order_id)),
        )
        .await?;

        ledger::credit_balance(
            &mut tx,
            &buyer_id,
            amount_cents,
            "refund_in",
            &refund_id.to_string(),
            Some(&format!("주문 #{} 환불 입금", order_id)),
        )
        .await?;

        // 구매 권한 회수 — 환불과 같은 트랜잭션이어야 함
        sqlx::query("DELETE FROM user_purchases WHERE order_id = ?")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        // 집행자를 기록 — 심사자와 다를 수 있다
        sqlx::query(
            "UPDATE refund_requests
             SET status = 'processed', processed_at = ?, reviewer_id = ?, remark = COALESCE(?, remark)
             WHERE id = ?",
        )
        .bind(now)
        .bind(operator_id)
        .bind(remark)
        .bind(refund_id)
        .execute(&mut *tx)
        .await?;

        // 주문 상태 자체는 유지 — 환불 이력은 refund_status로만 구분
        sqlx::query(
            "UPDATE orders SET refund_status = 'processed', refund_processed_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO order_logs (order_id, action, details, user_id, created_at)
             VALUES (?, 'refund_processed', ?, ?, ?)",
        )
        .bind(order_id)
        .bind(serde_json::json!({ "refund_id": refund_id, "amount_cents": amount_cents }).to_string())
        .bind(operator_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((order_id, buyer_id, seller_id, amount_cents))
    }
}
