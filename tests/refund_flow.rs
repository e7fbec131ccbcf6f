//! 환불 워크플로 통합 테스트

mod common;

use common::{engine, engine_on, paid_order, seed_listing, test_config, wallet_state};
use std::sync::Arc;
use xmarket::error::MarketError;
use xmarket::external::DbDelivery;
use xmarket::order::OrderLine;
use xmarket::refund::RefundReview;

#[tokio::test]
async fn test_refund_full_cycle() {
    let engine = engine().await;
    let listing = seed_listing(&engine.pool, "seller", 1000, 0.4).await;

    // 판매 2건으로 판매자 잔액 1200센트 확보
    let order1 = paid_order(&engine, "buyer_a", listing, 1000).await;
    paid_order(&engine, "buyer_b", listing, 1000).await;
    assert_eq!(wallet_state(&engine.pool, "seller").await, (1200, 0));

    let refund_id = engine
        .refunds
        .request_refund(order1, "buyer_a", "기대와 다름")
        .await
        .unwrap();
    engine
        .refunds
        .review_refund(refund_id, "admin", RefundReview::Approved, None)
        .await
        .unwrap();
    engine
        .refunds
        .process_refund(refund_id, "ops_choi", Some("고객 과실 없음"))
        .await
        .unwrap();

    // 전액(1000)은 판매자 지갑에서, 구매자 가용 잔액으로
    assert_eq!(wallet_state(&engine.pool, "seller").await, (200, 0));
    assert_eq!(wallet_state(&engine.pool, "buyer_a").await, (1000, 0));

    // 집행자와 비고가 신청 행과 주문 로그에 남는다
    let refund = engine.refunds.get_refund(refund_id).await.unwrap();
    assert_eq!(refund.status, "processed");
    assert_eq!(refund.reviewer_id.as_deref(), Some("ops_choi"));
    assert_eq!(refund.remark.as_deref(), Some("고객 과실 없음"));
    assert!(refund.processed_at.is_some());
    let (log_user,): (Option<String>,) = sqlx::query_as(
        "SELECT user_id FROM order_logs WHERE order_id = ? AND action = 'refund_processed'",
    )
    .bind(order1)
    .fetch_one(&engine.pool)
    .await
    .unwrap();
    assert_eq!(log_user.as_deref(), Some("ops_choi"));

    let (status, refund_status): (String, Option<String>) =
        sqlx::query_as("SELECT status, refund_status FROM orders WHERE id = ?")
            .bind(order1)
            .fetch_one(&engine.pool)
            .await
            .unwrap();
    // 주문 상태 자체는 유지되고 환불 이력은 refund_status로 남는다
    assert_eq!(status, "completed");
    assert_eq!(refund_status.as_deref(), Some("processed"));

    // 구매 권한 회수
    let purchases = common::count(
        &engine.pool,
        "SELECT COUNT(*) FROM user_purchases WHERE buyer_id = 'buyer_a'",
    )
    .await;
    assert_eq!(purchases, 0);
    // 다른 구매자의 권한은 유지
    let purchases = common::count(
        &engine.pool,
        "SELECT COUNT(*) FROM user_purchases WHERE buyer_id = 'buyer_b'",
    )
    .await;
    assert_eq!(purchases, 1);
}

#[tokio::test]
async fn test_refund_blocked_when_seller_funds_insufficient() {
    let engine = engine().await;
    let listing = seed_listing(&engine.pool, "seller", 1000, 0.4).await;

    // 판매 1건 -> 판매자 600센트, 환불 필요액은 1000센트
    let order = paid_order(&engine, "buyer", listing, 1000).await;

    let refund_id = engine
        .refunds
        .request_refund(order, "buyer", "단순 변심")
        .await
        .unwrap();
    engine
        .refunds
        .review_refund(refund_id, "admin", RefundReview::Approved, None)
        .await
        .unwrap();

    let err = engine
        .refunds
        .process_refund(refund_id, "admin", None)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::InsufficientFunds { required: 1000, available: 600 }));

    // 아무 지갑도 변하지 않음, 신청은 approved로 남아 재시도 가능
    assert_eq!(wallet_state(&engine.pool, "seller").await, (600, 0));
    let (status,): (String,) =
        sqlx::query_as("SELECT status FROM refund_requests WHERE id = ?")
            .bind(refund_id)
            .fetch_one(&engine.pool)
            .await
            .unwrap();
    assert_eq!(status, "approved");

    // 판매자에게 자금이 생기면 같은 신청을 그대로 집행할 수 있다
    paid_order(&engine, "buyer_b", listing, 1000).await;
    engine.refunds.process_refund(refund_id, "admin", None).await.unwrap();
    assert_eq!(wallet_state(&engine.pool, "buyer").await, (1000, 0));
}

#[tokio::test]
async fn test_refund_state_machine() {
    let engine = engine().await;
    let listing = seed_listing(&engine.pool, "seller", 1000, 0.4).await;

    // 미결제 주문은 환불 불가
    let order = engine.orders.create_order("buyer", &[OrderLine::one(listing)], false).await.unwrap();
    let err = engine
        .refunds
        .request_refund(order.id, "buyer", "사유")
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidState(_)));

    let order_id = paid_order(&engine, "buyer", listing, 1000).await;
    let refund_id = engine
        .refunds
        .request_refund(order_id, "buyer", "사유")
        .await
        .unwrap();

    // 진행 중인 환불이 있으면 재신청 불가
    let err = engine
        .refunds
        .request_refund(order_id, "buyer", "사유")
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidState(_)));

    // 심사 전 집행 불가
    let err = engine
        .refunds
        .process_refund(refund_id, "admin", None)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidState(_)));

    // 거절 후에는 재신청 가능
    engine
        .refunds
        .review_refund(refund_id, "admin", RefundReview::Rejected, Some("증빙 부족"))
        .await
        .unwrap();
    let second = engine
        .refunds
        .request_refund(order_id, "buyer", "증빙 추가")
        .await
        .unwrap();
    assert!(second > refund_id);

    let first = engine.refunds.get_refund(refund_id).await.unwrap();
    assert_eq!(first.status, "rejected");
    let pending = engine.refunds.list_pending_refunds(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, second);

    // 재심사는 멱등 위반
    let err = engine
        .refunds
        .review_refund(refund_id, "admin", RefundReview::Approved, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::AlreadyProcessed));
}

#[tokio::test]
async fn test_process_refund_idempotent() {
    let engine = engine().await;
    let listing = seed_listing(&engine.pool, "seller", 500, 0.4).await;

    paid_order(&engine, "buyer_b", listing, 500).await;
    let order = paid_order(&engine, "buyer", listing, 500).await;

    let refund_id = engine.refunds.request_refund(order, "buyer", "사유").await.unwrap();
    engine
        .refunds
        .review_refund(refund_id, "admin", RefundReview::Approved, None)
        .await
        .unwrap();
    engine.refunds.process_refund(refund_id, "admin", None).await.unwrap();

    let buyer_after = wallet_state(&engine.pool, "buyer").await;

    let err = engine
        .refunds
        .process_refund(refund_id, "admin", None)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::AlreadyProcessed));
    assert_eq!(wallet_state(&engine.pool, "buyer").await, buyer_after);

    // 환불 원장 항목은 구매자/판매자 각 1건
    let logs = common::count(
        &engine.pool,
        "SELECT COUNT(*) FROM wallet_logs WHERE type IN ('refund_in', 'refund_out')",
    )
    .await;
    assert_eq!(logs, 2);
}

#[tokio::test]
async fn test_refund_by_non_buyer_hidden() {
    let engine = engine().await;
    let listing = seed_listing(&engine.pool, "seller", 1000, 0.4).await;
    let order = paid_order(&engine, "buyer", listing, 1000).await;

    let err = engine
        .refunds
        .request_refund(order, "mallory", "사유")
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));
}

#[tokio::test]
async fn test_refund_frequency_gate_alerts_admin() {
    let pool = xmarket::db::init_memory_database().await.unwrap();
    let mut config = test_config();
    config.refund_frequency.max_requests = 2;
    let delivery = Arc::new(DbDelivery::new(pool.clone()));
    let engine = engine_on(pool, delivery, config).await;

    let listing = seed_listing(&engine.pool, "seller", 100, 0.4).await;
    let o1 = paid_order(&engine, "buyer", listing, 100).await;
    let o2 = paid_order(&engine, "buyer", listing, 100).await;
    let o3 = paid_order(&engine, "buyer", listing, 100).await;

    engine.refunds.request_refund(o1, "buyer", "사유").await.unwrap();
    engine.refunds.request_refund(o2, "buyer", "사유").await.unwrap();

    let err = engine.refunds.request_refund(o3, "buyer", "사유").await.unwrap_err();
    assert!(matches!(err, MarketError::RateLimited { .. }));

    // 리스크 이벤트와 관리자 경보가 남는다
    let events = common::count(
        &engine.pool,
        "SELECT COUNT(*) FROM risk_events WHERE event_type = 'refund_freq_exceed'",
    )
    .await;
    assert_eq!(events, 1);
    let alerts = common::count(
        &engine.pool,
        "SELECT COUNT(*) FROM notifications WHERE user_id = 'admin' AND type = 'warning'",
    )
    .await;
    assert_eq!(alerts, 1);
}
