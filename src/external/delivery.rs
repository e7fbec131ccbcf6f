//! 파일 전달 협력자
//!
//! 결제 성공 트랜잭션이 커밋된 뒤에만 호출됩니다. 전달 실패는 이미
//! 커밋된 금융 전이를 되돌리지 않고, 주문을 `paid` 상태로 남겨
//! 재시도할 수 있게 합니다.

use async_trait::async_trait;
use log::debug;
use sqlx::sqlite::SqlitePool;
use thiserror::Error;

use crate::db::now_ts;

/// 전달 에러 타입
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("주문 {0} 없음")]
    OrderNotFound(i64),
    #[error("저장소 오류: {0}")]
    Store(#[from] sqlx::Error),
    #[error("전달 실패: {0}")]
    Failed(String),
}

/// 파일 전달 클라이언트
///
/// 같은 주문에 대한 재호출은 안전해야 합니다 (멱등).
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// 구매자에게 주문의 파일 접근 권한을 부여
    async fn deliver(&self, order_id: i64) -> Result<(), DeliveryError>;
}

/// DB 기반 기본 전달 구현
///
/// 주문 항목에 전달 시각을 기록하고 구매 이력 행을 생성합니다.
/// 원격 저장소 연동은 엔진 범위 밖이므로 여기서는 권한 행만 만듭니다.
pub struct DbDelivery {
    pool: SqlitePool,
}

impl DbDelivery {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryClient for DbDelivery {
    async fn deliver(&self, order_id: i64) -> Result<(), DeliveryError> {
        let mut tx = self.pool.begin().await?;

        let order: Option<(String,)> =
            sqlx::query_as("SELECT buyer_id FROM orders WHERE id = ?")
                .bind(order_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (buyer_id,) = order.ok_or(DeliveryError::OrderNotFound(order_id))?;

        let items: Vec<(i64,)> =
            sqlx::query_as("SELECT listing_id FROM order_items WHERE order_id = ?")
                .bind(order_id)
                .fetch_all(&mut *tx)
                .await?;

        let now = now_ts();

        // 전달 시각 기록 (미전달 항목만)
        sqlx::query(
            "UPDATE order_items SET delivered_at = ? WHERE order_id = ? AND delivered_at IS NULL",
        )
        .bind(now)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

        // 구매 이력 생성 — 유일 제약으로 재호출은 no-op
        for (listing_id,) in &items {
            sqlx::query(
                "INSERT OR IGNORE INTO user_purchases (order_id, listing_id, buyer_id, created_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(order_id)
            .bind(listing_id)
            .bind(&buyer_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE orders SET delivered_at = COALESCE(delivered_at, ?) WHERE id = ?")
            .bind(now)
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!("주문 {} 전달 완료 ({}개 항목)", order_id, items.len());

        Ok(())
    }
}
