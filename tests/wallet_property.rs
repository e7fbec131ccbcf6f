//! 원장 불변식 무작위 검증
//!
//! 임의의 연산 순서에서도 지갑 카운터가 음수가 되지 않고, 카운터
//! 합계가 성공한 연산의 합과 항상 일치해야 합니다.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use xmarket::db::init_memory_database;
use xmarket::error::MarketError;
use xmarket::wallet::ledger;

#[derive(Debug, Clone, Copy)]
enum Op {
    CreditPending(i64),
    Settle(i64),
    Debit(i64),
    CreditBalance(i64),
}

#[tokio::test]
async fn test_random_op_sequences_never_go_negative() {
    // 고정 시드로 재현 가능하게
    let mut rng = StdRng::seed_from_u64(0x5eed_2026);

    for round in 0..20 {
        let pool = init_memory_database().await.unwrap();
        let user = "u";

        // 모델 상태
        let mut balance = 0i64;
        let mut pending = 0i64;
        let mut applied = 0usize;

        for step in 0..60 {
            let amount = rng.gen_range(1..=500);
            let op = match rng.gen_range(0..4) {
                0 => Op::CreditPending(amount),
                1 => Op::Settle(amount),
                2 => Op::Debit(amount),
                _ => Op::CreditBalance(amount),
            };
            let reference = format!("{}-{}", round, step);

            let mut tx = pool.begin().await.unwrap();
            let result = match op {
                Op::CreditPending(a) => {
                    ledger::credit_pending(&mut tx, user, a, "sale", &reference, None).await
                }
                Op::Settle(a) => {
                    ledger::settle(&mut tx, user, a, "settlement", &reference, None).await
                }
                Op::Debit(a) => ledger::debit(&mut tx, user, a, "refund_out", &reference, None).await,
                Op::CreditBalance(a) => {
                    ledger::credit_balance(&mut tx, user, a, "manual", &reference, None).await
                }
            };

            match (op, result) {
                (Op::CreditPending(a), Ok(_)) => {
                    pending += a;
                    applied += 1;
                    tx.commit().await.unwrap();
                }
                (Op::Settle(a), Ok(_)) => {
                    assert!(pending >= a, "모델상 불가능한 정산이 성공함");
                    pending -= a;
                    balance += a;
                    applied += 1;
                    tx.commit().await.unwrap();
                }
                (Op::Settle(a), Err(MarketError::InsufficientPending { .. })) => {
                    assert!(pending < a);
                    drop(tx);
                }
                (Op::Debit(a), Ok(_)) => {
                    assert!(balance + pending >= a, "모델상 불가능한 차감이 성공함");
                    let from_balance = balance.min(a);
                    balance -= from_balance;
                    pending -= a - from_balance;
                    applied += 1;
                    tx.commit().await.unwrap();
                }
                (Op::Debit(a), Err(MarketError::InsufficientFunds { .. })) => {
                    assert!(balance + pending < a);
                    drop(tx);
                }
                (Op::CreditBalance(a), Ok(_)) => {
                    balance += a;
                    applied += 1;
                    tx.commit().await.unwrap();
                }
                (op, Err(e)) => panic!("예상 밖의 실패: {:?} -> {}", op, e),
            }

            assert!(balance >= 0 && pending >= 0);
        }

        // DB 상태와 모델 상태가 일치해야 한다
        let (db_balance, db_pending): (i64, i64) = sqlx::query_as(
            "SELECT balance_cents, pending_settlement_cents FROM user_wallets WHERE user_id = ?",
        )
        .bind(user)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!((db_balance, db_pending), (balance, pending));
        assert!(db_balance >= 0 && db_pending >= 0);

        // 성공한 연산 수와 원장 항목 수가 일치
        let (logs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM wallet_logs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(logs as usize, applied);
    }
}

#[tokio::test]
async fn test_ledger_sum_matches_wallet_counters() {
    let pool = init_memory_database().await.unwrap();
    let mut rng = StdRng::seed_from_u64(42);

    for i in 0..30 {
        let amount = rng.gen_range(1..=1000);
        let mut tx = pool.begin().await.unwrap();
        let _ = ledger::credit_pending(&mut tx, "s", amount, "sale", &i.to_string(), None).await;
        tx.commit().await.unwrap();

        if rng.gen_bool(0.5) {
            let mut tx = pool.begin().await.unwrap();
            let result =
                ledger::settle(&mut tx, "s", amount, "settlement", &i.to_string(), None).await;
            if result.is_ok() {
                tx.commit().await.unwrap();
            }
        }
    }

    // 원장 변경 합 == 카운터 합 (정산은 이동일 뿐 합계를 바꾸지 않음)
    let (credited,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(change_cents), 0) FROM wallet_logs WHERE type = 'sale'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    let (balance, pending): (i64, i64) = sqlx::query_as(
        "SELECT balance_cents, pending_settlement_cents FROM user_wallets WHERE user_id = 's'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(credited, balance + pending);
}
