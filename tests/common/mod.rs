//! 통합 테스트 공용 헬퍼

use std::sync::Arc;

use sqlx::sqlite::SqlitePool;

use xmarket::config::EngineConfig;
use xmarket::db;
use xmarket::external::{
    DbDelivery, DbNotifier, DeliveryClient, DeliveryError, SandboxProvider,
};
use xmarket::order::{OrderLine, OrderService};
use xmarket::payment::{CallbackOutcome, CallbackProcessor};
use xmarket::refund::RefundWorkflow;
use xmarket::risk::RiskGovernor;
use xmarket::wallet::WalletService;

/// 항상 실패하는 전달 구현 (전달 실패 경로 테스트용)
pub struct FailingDelivery;

#[async_trait::async_trait]
impl DeliveryClient for FailingDelivery {
    async fn deliver(&self, _order_id: i64) -> Result<(), DeliveryError> {
        Err(DeliveryError::Failed("스토리지 연결 끊김".to_string()))
    }
}

/// 응답이 없는 전달 구현 (타임아웃 경로 테스트용)
pub struct HangingDelivery;

#[async_trait::async_trait]
impl DeliveryClient for HangingDelivery {
    async fn deliver(&self, _order_id: i64) -> Result<(), DeliveryError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(())
    }
}

pub struct TestEngine {
    pub pool: SqlitePool,
    pub orders: OrderService,
    pub wallet: WalletService,
    pub callbacks: CallbackProcessor,
    pub refunds: RefundWorkflow,
}

/// 테스트용 설정: 빈도 제한이 테스트를 방해하지 않도록 상향
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    if let Some(rule) = config.rate_limits.get_mut("create_order") {
        rule.max_requests = 1000;
    }
    if let Some(rule) = config.rate_limits.get_mut("create_payout") {
        rule.max_requests = 1000;
        rule.daily_max = None;
    }
    config.refund_frequency.max_requests = 1000;
    config.external_call_timeout = std::time::Duration::from_millis(200);
    config
}

pub async fn engine() -> TestEngine {
    let pool = db::init_memory_database().await.unwrap();
    let delivery = Arc::new(DbDelivery::new(pool.clone()));
    engine_on(pool, delivery, test_config()).await
}

pub async fn engine_with_delivery(delivery: Arc<dyn DeliveryClient>) -> TestEngine {
    let pool = db::init_memory_database().await.unwrap();
    engine_on(pool, delivery, test_config()).await
}

pub async fn engine_on(
    pool: SqlitePool,
    delivery: Arc<dyn DeliveryClient>,
    config: EngineConfig,
) -> TestEngine {
    let risk = Arc::new(RiskGovernor::new(pool.clone(), config.clone()));
    let notifier = Arc::new(DbNotifier::new(pool.clone()));

    let orders = OrderService::new(
        pool.clone(),
        risk.clone(),
        Arc::new(SandboxProvider),
        config.clone(),
    );
    let wallet = WalletService::new(pool.clone(), risk.clone(), notifier.clone(), config.clone());
    let callbacks = CallbackProcessor::new(
        pool.clone(),
        delivery,
        notifier.clone(),
        risk.clone(),
        config.external_call_timeout,
    );
    let refunds = RefundWorkflow::new(pool.clone(), risk, notifier);

    TestEngine { pool, orders, wallet, callbacks, refunds }
}

pub async fn seed_listing(pool: &SqlitePool, seller: &str, price_cents: i64, split: f64) -> i64 {
    sqlx::query(
        "INSERT INTO listings (seller_id, title, price_cents, platform_split, seller_split, status)
         VALUES (?, '테스트 상품', ?, ?, ?, 'live')",
    )
    .bind(seller)
    .bind(price_cents)
    .bind(split)
    .bind(1.0 - split)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

/// 주문 생성 -> 결제 개시 -> 성공 콜백까지 한 번에
pub async fn paid_order(engine: &TestEngine, buyer: &str, listing_id: i64, amount: i64) -> i64 {
    let order = engine
        .orders
        .create_order(buyer, &[OrderLine::one(listing_id)], true)
        .await
        .unwrap();
    let intent = engine.orders.pay(order.id, buyer).await.unwrap();
    let outcome = engine
        .callbacks
        .handle_callback(&intent.transaction_id, true, amount, None)
        .await
        .unwrap();
    assert!(matches!(outcome, CallbackOutcome::Processed { .. }));
    order.id
}

pub async fn wallet_state(pool: &SqlitePool, user_id: &str) -> (i64, i64) {
    sqlx::query_as(
        "SELECT balance_cents, pending_settlement_cents FROM user_wallets WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as(sql).fetch_one(pool).await.unwrap();
    n
}
