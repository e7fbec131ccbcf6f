use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 상품 DB 모델 (읽기 전용 스냅샷 소스)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ListingRecord {
    pub id: i64,
    pub seller_id: String,
    pub title: String,
    pub price_cents: i64,
    pub platform_split: f64,
    pub seller_split: f64,
    pub status: String,
}

/// 주문 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderRecord {
    pub id: i64,
    pub order_no: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub total_amount_cents: i64,
    pub platform_fee_cents: i64,
    pub seller_amount_cents: i64,
    pub status: String,
    pub payment_status: String,
    pub refund_status: Option<String>,
    pub created_at: f64,
    pub paid_at: Option<f64>,
    pub delivered_at: Option<f64>,
    pub completed_at: Option<f64>,
    pub refund_requested_at: Option<f64>,
    pub refund_processed_at: Option<f64>,
}

/// 결제 기록 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderPaymentRecord {
    pub id: i64,
    pub order_id: i64,
    pub provider: String,
    pub transaction_id: String,
    pub amount_cents: i64,
    pub status: String,
    pub paid_at: Option<f64>,
}

/// 지갑 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletRecord {
    pub user_id: String,
    pub balance_cents: i64,
    pub pending_settlement_cents: i64,
    pub updated_at: f64,
}

/// 지갑 거래 내역 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletLogRecord {
    pub id: i64,
    pub user_id: String,
    pub change_cents: i64,
    pub balance_after: i64,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub log_type: String,
    pub reference_id: Option<String>,
    pub remark: Option<String>,
    pub created_at: f64,
}

/// 환불 신청 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RefundRequestRecord {
    pub id: i64,
    pub order_id: i64,
    pub buyer_id: String,
    pub seller_id: String,
    pub amount_cents: i64,
    pub reason: Option<String>,
    pub status: String,
    pub created_at: f64,
    pub processed_at: Option<f64>,
    pub reviewer_id: Option<String>,
    pub remark: Option<String>,
}

/// 출금 신청 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PayoutRequestRecord {
    pub id: i64,
    pub user_id: String,
    pub amount_cents: i64,
    pub status: String,
    pub method: Option<String>,
    pub account_info: Option<String>,
    pub remark: Option<String>,
    pub created_at: f64,
    pub processed_at: Option<f64>,
}

/// 리스크 이벤트 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RiskEventRecord {
    pub id: i64,
    pub user_id: String,
    pub event_type: String,
    pub reference_id: Option<String>,
    pub details: Option<String>,
    pub score: i64,
    pub created_at: f64,
}
