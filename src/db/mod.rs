pub mod models;
pub mod tx;

use log::info;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Error as SqlxError;

pub use tx::with_tx_retry;

/// 현재 시각 (유닉스 초, REAL 컬럼용)
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// SQLite 데이터베이스 초기화 및 연결
pub async fn init_database(database_url: &str) -> Result<SqlitePool, SqlxError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    // 잠금 경합 완화
    sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await.ok();
    sqlx::query("PRAGMA busy_timeout=5000").execute(&pool).await.ok();

    create_tables(&pool).await?;

    info!("데이터베이스 초기화 완료: {}", database_url);

    Ok(pool)
}

/// 테스트용 인메모리 데이터베이스
///
/// 인메모리 SQLite는 커넥션마다 별도 DB가 되므로 커넥션을 1개로 고정합니다.
pub async fn init_memory_database() -> Result<SqlitePool, SqlxError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    create_tables(&pool).await?;

    Ok(pool)
}

/// 필요한 테이블 생성
async fn create_tables(pool: &SqlitePool) -> Result<(), SqlxError> {
    // 상품 테이블 (가격/분배율 읽기 전용 — 소유권은 상품 서브시스템에 있음)
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS listings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            seller_id TEXT NOT NULL,
            title TEXT NOT NULL,
            price_cents INTEGER NOT NULL,
            platform_split REAL DEFAULT 0.4,
            seller_split REAL DEFAULT 0.6,
            status TEXT DEFAULT 'draft',
            created_at REAL DEFAULT (strftime('%s','now'))
        )",
    )
    .execute(pool)
    .await?;

    // 주문 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_no TEXT NOT NULL UNIQUE,
            buyer_id TEXT NOT NULL,
            seller_id TEXT NOT NULL,
            total_amount_cents INTEGER NOT NULL,
            platform_fee_cents INTEGER NOT NULL,
            seller_amount_cents INTEGER NOT NULL,
            status TEXT DEFAULT 'pending',
            payment_status TEXT DEFAULT 'pending',
            refund_status TEXT,
            refund_reason TEXT,
            created_at REAL DEFAULT (strftime('%s','now')),
            updated_at REAL DEFAULT (strftime('%s','now')),
            paid_at REAL,
            delivered_at REAL,
            completed_at REAL,
            refund_requested_at REAL,
            refund_processed_at REAL
        )",
    )
    .execute(pool)
    .await?;

    // 주문 항목 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS order_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id INTEGER NOT NULL,
            listing_id INTEGER NOT NULL,
            price_cents INTEGER NOT NULL,
            quantity INTEGER DEFAULT 1,
            delivered_at REAL,
            created_at REAL DEFAULT (strftime('%s','now')),
            FOREIGN KEY (order_id) REFERENCES orders(id),
            FOREIGN KEY (listing_id) REFERENCES listings(id)
        )",
    )
    .execute(pool)
    .await?;

    // 결제 기록 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS order_payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id INTEGER NOT NULL,
            provider TEXT NOT NULL,
            transaction_id TEXT,
            amount_cents INTEGER NOT NULL,
            status TEXT DEFAULT 'pending',
            payload TEXT,
            paid_at REAL,
            created_at REAL DEFAULT (strftime('%s','now')),
            FOREIGN KEY (order_id) REFERENCES orders(id)
        )",
    )
    .execute(pool)
    .await?;

    // 사용자 지갑 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS user_wallets (
            user_id TEXT PRIMARY KEY,
            balance_cents INTEGER DEFAULT 0,
            pending_settlement_cents INTEGER DEFAULT 0,
            updated_at REAL DEFAULT (strftime('%s','now'))
        )",
    )
    .execute(pool)
    .await?;

    // 지갑 거래 내역 테이블 (추가 전용)
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS wallet_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            change_cents INTEGER NOT NULL,
            balance_after INTEGER NOT NULL,
            type TEXT NOT NULL,
            reference_id TEXT,
            remark TEXT,
            created_at REAL DEFAULT (strftime('%s','now'))
        )",
    )
    .execute(pool)
    .await?;

    // 환불 신청 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS refund_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id INTEGER NOT NULL,
            buyer_id TEXT NOT NULL,
            seller_id TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            reason TEXT,
            status TEXT DEFAULT 'pending',
            created_at REAL DEFAULT (strftime('%s','now')),
            processed_at REAL,
            reviewer_id TEXT,
            remark TEXT,
            FOREIGN KEY (order_id) REFERENCES orders(id)
        )",
    )
    .execute(pool)
    .await?;

    // 출금 신청 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS payout_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            status TEXT DEFAULT 'pending',
            method TEXT,
            account_info TEXT,
            remark TEXT,
            created_at REAL DEFAULT (strftime('%s','now')),
            processed_at REAL
        )",
    )
    .execute(pool)
    .await?;

    // 출금 심사 로그 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS payout_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            payout_id INTEGER NOT NULL,
            action TEXT NOT NULL,
            reviewer_id TEXT,
            remark TEXT,
            created_at REAL DEFAULT (strftime('%s','now')),
            FOREIGN KEY (payout_id) REFERENCES payout_requests(id)
        )",
    )
    .execute(pool)
    .await?;

    // 구매 이력 테이블 (전달된 파일 접근 권한)
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS user_purchases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id INTEGER NOT NULL,
            listing_id INTEGER NOT NULL,
            buyer_id TEXT NOT NULL,
            created_at REAL DEFAULT (strftime('%s','now')),
            FOREIGN KEY (order_id) REFERENCES orders(id),
            FOREIGN KEY (listing_id) REFERENCES listings(id)
        )",
    )
    .execute(pool)
    .await?;

    // 빈도 제한 로그 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS rate_limit_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            action TEXT NOT NULL,
            created_at REAL DEFAULT (strftime('%s','now'))
        )",
    )
    .execute(pool)
    .await?;

    // 리스크 이벤트 테이블 (추가 전용 감사 추적)
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS risk_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            reference_id TEXT,
            details TEXT,
            score INTEGER DEFAULT 0,
            created_at REAL DEFAULT (strftime('%s','now'))
        )",
    )
    .execute(pool)
    .await?;

    // 주문 조작 로그 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS order_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id INTEGER NOT NULL,
            action TEXT NOT NULL,
            details TEXT,
            user_id TEXT,
            created_at REAL DEFAULT (strftime('%s','now')),
            FOREIGN KEY (order_id) REFERENCES orders(id)
        )",
    )
    .execute(pool)
    .await?;

    // 결제 콜백 로그 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS payment_callback_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id INTEGER,
            provider TEXT,
            transaction_id TEXT,
            status TEXT NOT NULL,
            payload TEXT,
            created_at REAL DEFAULT (strftime('%s','now'))
        )",
    )
    .execute(pool)
    .await?;

    // 알림 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT,
            type TEXT DEFAULT 'info',
            status TEXT DEFAULT 'unread',
            sender_role TEXT,
            created_at REAL DEFAULT (strftime('%s','now')),
            read_at REAL
        )",
    )
    .execute(pool)
    .await?;

    // 인덱스 생성
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_buyer ON orders(buyer_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_seller ON orders(seller_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_refund_status ON orders(refund_status)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_refund_requests_buyer_created
         ON refund_requests(buyer_id, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_rate_limit_logs_user_action
         ON rate_limit_logs(user_id, action, created_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_risk_events_user_created
         ON risk_events(user_id, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_wallet_logs_user
         ON wallet_logs(user_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    // 멱등성 유일 제약: 동일 콜백/적립의 재전달을 no-op으로 만드는 최종 방어선
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_order_payments_txnid
         ON order_payments(transaction_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_wallet_logs_dedupe
         ON wallet_logs(user_id, type, reference_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_user_purchases_order_listing
         ON user_purchases(order_id, listing_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
