//! 원장 프리미티브
//!
//! 모든 잔액 변경은 호출자가 연 트랜잭션 안에서 이 함수들을 통해서만
//! 일어납니다. 각 변경은 (user_id, type, reference_id) 키로 멱등합니다:
//! 같은 키의 재적용은 `Applied::AlreadyApplied`로 no-op 처리되고,
//! 유일 인덱스 `ux_wallet_logs_dedupe`가 최종 방어선이 됩니다.
//!
//! `balance_after`에는 해당 항목이 움직인 카운터(가용 잔액 또는 대기
//! 정산)의 변경 후 값을 기록합니다.

use sqlx::{Sqlite, Transaction};

use crate::db::now_ts;
use crate::error::MarketError;

/// 원장 적용 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// 새로 적용됨
    Applied { balance_after: i64 },
    /// 동일 키로 이미 적용됨 (no-op)
    AlreadyApplied,
}

/// 지갑 행 보장 후 (가용 잔액, 대기 정산) 조회
async fn load_wallet(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
) -> Result<(i64, i64), MarketError> {
    sqlx::query(
        "INSERT OR IGNORE INTO user_wallets (user_id, balance_cents, pending_settlement_cents, updated_at)
         VALUES (?, 0, 0, ?)",
    )
    .bind(user_id)
    .bind(now_ts())
    .execute(&mut **tx)
    .await?;

    let row: (i64, i64) = sqlx::query_as(
        "SELECT balance_cents, pending_settlement_cents FROM user_wallets WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row)
}

/// 동일 키의 원장 항목이 이미 있는지 검사
async fn already_applied(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
    log_type: &str,
    reference_id: &str,
) -> Result<bool, MarketError> {
    let existing: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM wallet_logs WHERE user_id = ? AND type = ? AND reference_id = ?",
    )
    .bind(user_id)
    .bind(log_type)
    .bind(reference_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(existing.is_some())
}

async fn append_log(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
    change_cents: i64,
    balance_after: i64,
    log_type: &str,
    reference_id: &str,
    remark: Option<&str>,
) -> Result<(), MarketError> {
    sqlx::query(
        "INSERT INTO wallet_logs (user_id, change_cents, balance_after, type, reference_id, remark, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(change_cents)
    .bind(balance_after)
    .bind(log_type)
    .bind(reference_id)
    .bind(remark)
    .bind(now_ts())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn require_positive(amount_cents: i64) -> Result<(), MarketError> {
    if amount_cents <= 0 {
        return Err(MarketError::Validation(format!(
            "금액은 양수여야 합니다: {}",
            amount_cents
        )));
    }
    Ok(())
}

/// 대기 정산 적립
///
/// 결제 성공 시 판매자 몫을 대기 정산에 넣습니다.
pub async fn credit_pending(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
    amount_cents: i64,
    log_type: &str,
    reference_id: &str,
    remark: Option<&str>,
) -> Result<Applied, MarketError> {
    require_positive(amount_cents)?;

    if already_applied(tx, user_id, log_type, reference_id).await? {
        return Ok(Applied::AlreadyApplied);
    }

    let (_, pending) = load_wallet(tx, user_id).await?;
    let pending_after = pending + amount_cents;

    sqlx::query(
        "UPDATE user_wallets SET pending_settlement_cents = ?, updated_at = ? WHERE user_id = ?",
    )
    .bind(pending_after)
    .bind(now_ts())
    .bind(user_id)
    .execute(&mut **tx)
    .await?;

    append_log(tx, user_id, amount_cents, pending_after, log_type, reference_id, remark).await?;

    Ok(Applied::Applied { balance_after: pending_after })
}

/// 정산 확정: 대기 정산에서 가용 잔액으로 이동
pub async fn settle(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
    amount_cents: i64,
    log_type: &str,
    reference_id: &str,
    remark: Option<&str>,
) -> Result<Applied, MarketError> {
    require_positive(amount_cents)?;

    if already_applied(tx, user_id, log_type, reference_id).await? {
        return Ok(Applied::AlreadyApplied);
    }

    let (balance, pending) = load_wallet(tx, user_id).await?;
    if pending < amount_cents {
        return Err(MarketError::InsufficientPending {
            required: amount_cents,
            available: pending,
        });
    }

    let balance_after = balance + amount_cents;
    sqlx::query(
        "UPDATE user_wallets SET balance_cents = ?, pending_settlement_cents = ?, updated_at = ?
         WHERE user_id = ?",
    )
    .bind(balance_after)
    .bind(pending - amount_cents)
    .bind(now_ts())
    .bind(user_id)
    .execute(&mut **tx)
    .await?;

    append_log(tx, user_id, amount_cents, balance_after, log_type, reference_id, remark).await?;

    Ok(Applied::Applied { balance_after })
}

/// 차감: 가용 잔액 우선, 부족분은 대기 정산에서
///
/// 합계가 부족하면 아무것도 바꾸지 않고 확정 오류를 반환합니다.
pub async fn debit(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
    amount_cents: i64,
    log_type: &str,
    reference_id: &str,
    remark: Option<&str>,
) -> Result<Applied, MarketError> {
    require_positive(amount_cents)?;

    if already_applied(tx, user_id, log_type, reference_id).await? {
        return Ok(Applied::AlreadyApplied);
    }

    let (balance, pending) = load_wallet(tx, user_id).await?;
    if balance + pending < amount_cents {
        return Err(MarketError::InsufficientFunds {
            required: amount_cents,
            available: balance + pending,
        });
    }

    let from_balance = balance.min(amount_cents);
    let from_pending = amount_cents - from_balance;
    let balance_after = balance - from_balance;

    sqlx::query(
        "UPDATE user_wallets SET balance_cents = ?, pending_settlement_cents = ?, updated_at = ?
         WHERE user_id = ?",
    )
    .bind(balance_after)
    .bind(pending - from_pending)
    .bind(now_ts())
    .bind(user_id)
    .execute(&mut **tx)
    .await?;

    append_log(tx, user_id, -amount_cents, balance_after, log_type, reference_id, remark).await?;

    Ok(Applied::Applied { balance_after })
}

/// 가용 잔액 적립 (환불 입금 등)
pub async fn credit_balance(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
    amount_cents: i64,
    log_type: &str,
    reference_id: &str,
    remark: Option<&str>,
) -> Result<Applied, MarketError> {
    require_positive(amount_cents)?;

    if already_applied(tx, user_id, log_type, reference_id).await? {
        return Ok(Applied::AlreadyApplied);
    }

    let (balance, _) = load_wallet(tx, user_id).await?;
    let balance_after = balance + amount_cents;

    sqlx::query("UPDATE user_wallets SET balance_cents = ?, updated_at = ? WHERE user_id = ?")
        .bind(balance_after)
        .bind(now_ts())
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

    append_log(tx, user_id, amount_cents, balance_after, log_type, reference_id, remark).await?;

    Ok(Applied::Applied { balance_after })
}
