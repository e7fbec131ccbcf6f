//! 주문 생성 및 결제 개시
//!
//! 가격과 수수료 분배율은 주문 생성 시점에 상품에서 스냅샷되어 주문
//! 행에 고정됩니다. 이후 상품 가격이 바뀌어도 주문 금액은 변하지
//! 않습니다.

use std::sync::Arc;

use log::{info, warn};
use rand::Rng;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use tokio::time::timeout;

use crate::config::EngineConfig;
use crate::db::models::{ListingRecord, OrderPaymentRecord, OrderRecord};
use crate::db::{now_ts, with_tx_retry};
use crate::error::MarketError;
use crate::external::PaymentProvider;
use crate::risk::RiskGovernor;

/// 주문 조회 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderRole {
    Buyer,
    Seller,
}

/// 주문 라인 (상품 + 수량)
#[derive(Debug, Clone, Copy)]
pub struct OrderLine {
    pub listing_id: i64,
    pub quantity: i64,
}

impl OrderLine {
    /// 수량 1의 주문 라인
    pub fn one(listing_id: i64) -> Self {
        Self { listing_id, quantity: 1 }
    }
}

/// 주문 항목 조회 뷰 (상품 제목 포함)
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrderItemView {
    pub id: i64,
    pub order_id: i64,
    pub listing_id: i64,
    pub title: String,
    pub price_cents: i64,
    pub quantity: i64,
    pub delivered_at: Option<f64>,
}

/// 주문 상세 조회 결과
#[derive(Debug, Serialize)]
pub struct OrderDetail {
    pub order: OrderRecord,
    pub items: Vec<OrderItemView>,
    pub payments: Vec<OrderPaymentRecord>,
}

/// 결제 개시 결과
#[derive(Debug, Serialize)]
pub struct PaymentIntent {
    pub payment_id: i64,
    pub transaction_id: String,
    pub pay_url: String,
}

/// 주문 서비스
pub struct OrderService {
    pool: SqlitePool,
    risk: Arc<RiskGovernor>,
    provider: Arc<dyn PaymentProvider>,
    config: EngineConfig,
}

impl OrderService {
    pub fn new(
        pool: SqlitePool,
        risk: Arc<RiskGovernor>,
        provider: Arc<dyn PaymentProvider>,
        config: EngineConfig,
    ) -> Self {
        Self { pool, risk, provider, config }
    }

    /// 주문 생성
    ///
    /// 게시 중인 상품만, 단일 판매자의 상품만 한 주문에 담을 수
    /// 있습니다. 이미 구매한 상품이 섞여 있으면 `DuplicatePurchase`로
    /// 경고하며, `allow_repurchase`로 무시하고 진행할 수 있습니다.
    pub async fn create_order(
        &self,
        buyer_id: &str,
        lines: &[OrderLine],
        allow_repurchase: bool,
    ) -> Result<OrderRecord, MarketError> {
        if lines.is_empty() {
            return Err(MarketError::Validation("주문 항목이 비어 있습니다".to_string()));
        }
        if lines.iter().any(|line| line.quantity < 1) {
            return Err(MarketError::Validation("수량은 1 이상이어야 합니다".to_string()));
        }

        self.risk.enforce(buyer_id, "create_order").await?;

        if !allow_repurchase {
            let mut owned_titles = Vec::new();
            for line in lines {
                let row: Option<(String,)> = sqlx::query_as(
                    "SELECT l.title FROM user_purchases p
                     JOIN listings l ON l.id = p.listing_id
                     WHERE p.buyer_id = ? AND p.listing_id = ?",
                )
                .bind(buyer_id)
                .bind(line.listing_id)
                .fetch_optional(&self.pool)
                .await?;
                if let Some((title,)) = row {
                    owned_titles.push(title);
                }
            }
            if !owned_titles.is_empty() {
                return Err(MarketError::DuplicatePurchase(owned_titles));
            }
        }

        let order = with_tx_retry("create_order", || {
            self.create_order_once(buyer_id, lines)
        })
        .await?;

        info!(
            "주문 생성: {} (구매자 {}, 총 {}센트, {}개 항목)",
            order.order_no,
            buyer_id,
            order.total_amount_cents,
            lines.len()
        );

        Ok(order)
    }

    async fn create_order_once(
        &self,
        buyer_id: &str,
        lines: &[OrderLine],
    ) -> Result<OrderRecord, MarketError> {
        let mut tx = self.pool.begin().await?;
        let now = now_ts();

        // 상품 스냅샷 — 이후 가격이 바뀌어도 이 값으로 고정
        let mut snapshots: Vec<(ListingRecord, i64)> = Vec::with_capacity(lines.len());
        for line in lines {
            let listing: Option<ListingRecord> =
                sqlx::query_as("SELECT * FROM listings WHERE id = ?")
                    .bind(line.listing_id)
                    .fetch_optional(&mut *tx)
                    .await?;

            let listing = listing.ok_or(MarketError::NotFound("상품"))?;
            if listing.status != "live" {
                return Err(MarketError::Validation(format!(
                    "판매 중이 아닌 상품입니다: {}",
                    listing.id
                )));
            }
            if listing.seller_id == buyer_id {
                return Err(MarketError::Validation("본인 상품은 구매할 수 없습니다".to_string()));
            }
            snapshots.push((listing, line.quantity));
        }

        let seller_id = snapshots[0].0.seller_id.clone();
        if snapshots.iter().any(|(l, _)| l.seller_id != seller_id) {
            return Err(MarketError::Validation(
                "한 주문에는 단일 판매자의 상품만 담을 수 있습니다".to_string(),
            ));
        }

        // 라인별 수수료는 내림(절사) — 합계 불변식: total == fee + seller
        let mut total = 0i64;
        let mut fee_total = 0i64;
        for (listing, quantity) in &snapshots {
            let line_total = listing.price_cents * quantity;
            total += line_total;
            fee_total += (line_total as f64 * listing.platform_split) as i64;
        }
        let seller_total = total - fee_total;

        let order_no = format!(
            "ORD{}{:03}",
            chrono::Utc::now().timestamp(),
            rand::thread_rng().gen_range(0..1000)
        );

        let result = sqlx::query(
            "INSERT INTO orders
             (order_no, buyer_id, seller_id, total_amount_cents, platform_fee_cents,
              seller_amount_cents, status, payment_status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', 'pending', ?, ?)",
        )
        .bind(&order_no)
        .bind(buyer_id)
        .bind(&seller_id)
        .bind(total)
        .bind(fee_total)
        .bind(seller_total)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let order_id = result.last_insert_rowid();

        for (listing, quantity) in &snapshots {
            // price_cents에는 라인 합계를 기록
            sqlx::query(
                "INSERT INTO order_items (order_id, listing_id, price_cents, quantity, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(order_id)
            .bind(listing.id)
            .bind(listing.price_cents * quantity)
            .bind(quantity)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO order_logs (order_id, action, details, user_id, created_at)
             VALUES (?, 'create', ?, ?, ?)",
        )
        .bind(order_id)
        .bind(
            serde_json::json!({
                "listing_ids": lines.iter().map(|l| l.listing_id).collect::<Vec<_>>(),
                "total_amount_cents": total,
            })
            .to_string(),
        )
        .bind(buyer_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let order: OrderRecord = sqlx::query_as("SELECT * FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(order)
    }

    /// 결제 개시
    ///
    /// 결제 기록 행을 먼저 만든 뒤 게이트웨이를 호출합니다. 게이트웨이
    /// 오류나 타임아웃은 결제 행을 pending으로 남기며 (결과 불명),
    /// 주문 상태를 바꾸지 않습니다.
    pub async fn pay(&self, order_id: i64, buyer_id: &str) -> Result<PaymentIntent, MarketError> {
        let order: Option<(String, String, String, i64)> = sqlx::query_as(
            "SELECT buyer_id, status, order_no, total_amount_cents FROM orders WHERE id = ?",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        let (owner, status, order_no, total_amount_cents) =
            order.ok_or(MarketError::NotFound("주문"))?;

        if owner != buyer_id {
            return Err(MarketError::NotFound("주문"));
        }
        if status != "pending" {
            return Err(MarketError::InvalidState(format!(
                "결제할 수 없는 주문 상태입니다: {}",
                status
            )));
        }

        let transaction_id = uuid::Uuid::new_v4().to_string();

        let result = sqlx::query(
            "INSERT INTO order_payments (order_id, provider, transaction_id, amount_cents, status, created_at)
             VALUES (?, ?, ?, ?, 'pending', ?)",
        )
        .bind(order_id)
        .bind(self.provider.name())
        .bind(&transaction_id)
        .bind(total_amount_cents)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        let payment_id = result.last_insert_rowid();

        let pay_url = match timeout(
            self.config.external_call_timeout,
            self.provider.initiate_payment(&order_no, total_amount_cents),
        )
        .await
        {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => {
                warn!("결제 개시 실패: 주문 {} ({})", order_no, e);
                return Err(MarketError::Provider(e.to_string()));
            }
            Err(_) => {
                warn!("결제 개시 시간 초과: 주문 {}", order_no);
                return Err(MarketError::Provider("게이트웨이 호출 시간 초과".to_string()));
            }
        };

        info!("결제 개시: 주문 {} (거래 {})", order_no, transaction_id);

        Ok(PaymentIntent { payment_id, transaction_id, pay_url })
    }

    /// 주문 상세 조회 (구매자/판매자 본인만)
    pub async fn get_order_detail(
        &self,
        order_id: i64,
        requester_id: &str,
    ) -> Result<OrderDetail, MarketError> {
        let order: Option<OrderRecord> = sqlx::query_as("SELECT * FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        let order = order.ok_or(MarketError::NotFound("주문"))?;

        // 타인의 주문은 존재 여부도 노출하지 않음
        if order.buyer_id != requester_id && order.seller_id != requester_id {
            return Err(MarketError::NotFound("주문"));
        }

        let items: Vec<OrderItemView> = sqlx::query_as(
            "SELECT i.id, i.order_id, i.listing_id, l.title, i.price_cents, i.quantity, i.delivered_at
             FROM order_items i JOIN listings l ON l.id = i.listing_id
             WHERE i.order_id = ?",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        let payments: Vec<OrderPaymentRecord> = sqlx::query_as(
            "SELECT * FROM order_payments WHERE order_id = ? ORDER BY created_at DESC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(OrderDetail { order, items, payments })
    }

    /// 사용자 주문 목록 (역할/상태 필터, 최신순)
    pub async fn list_user_orders(
        &self,
        user_id: &str,
        role: OrderRole,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<OrderRecord>, MarketError> {
        let column = match role {
            OrderRole::Buyer => "buyer_id",
            OrderRole::Seller => "seller_id",
        };

        let orders = match status {
            Some(status) => {
                sqlx::query_as(&format!(
                    "SELECT * FROM orders WHERE {} = ? AND status = ?
                     ORDER BY created_at DESC LIMIT ? OFFSET ?",
                    column
                ))
                .bind(user_id)
                .bind(status)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT * FROM orders WHERE {} = ?
                     ORDER BY created_at DESC LIMIT ? OFFSET ?",
                    column
                ))
                .bind(user_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(orders)
    }
}
