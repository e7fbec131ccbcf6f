use std::sync::Arc;

use xmarket::config::EngineConfig;
use xmarket::db;
use xmarket::external::{DbDelivery, DbNotifier, SandboxProvider};
use xmarket::order::{OrderLine, OrderRole, OrderService};
use xmarket::payment::CallbackProcessor;
use xmarket::refund::{RefundReview, RefundWorkflow};
use xmarket::risk::RiskGovernor;
use xmarket::wallet::{PayoutReview, WalletService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    println!("마켓 엔진 시작 (통합 테스트 모드)");

    let config = EngineConfig::from_env();
    let pool = db::init_database(&config.database_url).await?;

    let risk = Arc::new(RiskGovernor::new(pool.clone(), config.clone()));
    let notifier = Arc::new(DbNotifier::new(pool.clone()));
    let delivery = Arc::new(DbDelivery::new(pool.clone()));
    let provider = Arc::new(SandboxProvider);

    let orders = OrderService::new(pool.clone(), risk.clone(), provider, config.clone());
    let wallet = WalletService::new(pool.clone(), risk.clone(), notifier.clone(), config.clone());
    let callbacks = CallbackProcessor::new(
        pool.clone(),
        delivery,
        notifier.clone(),
        risk.clone(),
        config.external_call_timeout,
    );
    let refunds = RefundWorkflow::new(pool.clone(), risk.clone(), notifier.clone());

    println!("\n===== 시나리오 1: 주문 -> 결제 -> 정산 =====\n");

    // 테스트용 상품 시드
    let listing_id = sqlx::query(
        "INSERT INTO listings (seller_id, title, price_cents, platform_split, seller_split, status)
         VALUES ('seller_kim', '사진 보정 프리셋', 1000, 0.4, 0.6, 'live')",
    )
    .execute(&pool)
    .await?
    .last_insert_rowid();

    let order = orders.create_order("buyer_lee", &[OrderLine::one(listing_id)], false).await?;
    println!(
        "주문 생성: {} (총 {}센트 = 수수료 {} + 판매자 {})",
        order.order_no, order.total_amount_cents, order.platform_fee_cents, order.seller_amount_cents
    );

    let intent = orders.pay(order.id, "buyer_lee").await?;
    println!("결제 개시: {} -> {}", intent.transaction_id, intent.pay_url);

    let outcome = callbacks
        .handle_callback(&intent.transaction_id, true, 1000, None)
        .await?;
    println!("콜백 처리 결과: {:?}", outcome);

    // 같은 콜백 재전달 — 멱등 확인
    let outcome = callbacks
        .handle_callback(&intent.transaction_id, true, 1000, None)
        .await?;
    println!("중복 콜백 결과: {:?}", outcome);

    // 두 번째 판매로 판매자 잔액을 더 쌓는다
    let order2 = orders.create_order("buyer_park", &[OrderLine::one(listing_id)], false).await?;
    let intent2 = orders.pay(order2.id, "buyer_park").await?;
    callbacks
        .handle_callback(&intent2.transaction_id, true, 1000, None)
        .await?;

    let view = wallet.get_wallet("seller_kim").await?;
    println!(
        "판매자 지갑: 가용 {}센트 / 대기 {}센트 (누적 수입 {}센트)",
        view.balance_cents, view.pending_settlement_cents, view.total_income_cents
    );

    println!("\n===== 시나리오 2: 환불 =====\n");

    let refund_id = refunds.request_refund(order.id, "buyer_lee", "기대와 다름").await?;
    println!("환불 신청: #{}", refund_id);

    refunds
        .review_refund(refund_id, "admin", RefundReview::Approved, None)
        .await?;
    refunds.process_refund(refund_id, "admin", None).await?;

    let seller = wallet.get_wallet("seller_kim").await?;
    let buyer = wallet.get_wallet("buyer_lee").await?;
    println!(
        "환불 후: 판매자 가용 {}센트, 구매자 가용 {}센트",
        seller.balance_cents, buyer.balance_cents
    );

    println!("\n===== 시나리오 3: 출금 =====\n");

    let payout_id = wallet
        .create_payout_request("seller_kim", 150, "bank", "110-2345-6789")
        .await?;
    println!("출금 신청: #{}", payout_id);

    wallet
        .review_payout(payout_id, "admin", PayoutReview::Paid, None)
        .await?;

    let seller = wallet.get_wallet("seller_kim").await?;
    println!(
        "출금 후 판매자 지갑: 가용 {}센트 / 대기 {}센트",
        seller.balance_cents, seller.pending_settlement_cents
    );

    let my_orders = orders
        .list_user_orders("buyer_lee", OrderRole::Buyer, None, 10, 0)
        .await?;
    println!("\n구매자 주문 수: {}", my_orders.len());

    println!("\n모든 시나리오 완료, 프로그램 종료.");

    Ok(())
}
