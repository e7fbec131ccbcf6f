//! 엔진 공통 에러 타입
//!
//! 모든 금융 연산은 명시적 Result 변형으로 실패를 구분합니다.
//! "이미 처리됨" / "찾을 수 없음"은 예외 흐름이 아니라 호출자가
//! 반드시 처리해야 하는 변형으로 모델링합니다.

use thiserror::Error;

/// 마켓 엔진 에러 타입
#[derive(Debug, Error)]
pub enum MarketError {
    /// 입력 검증 실패 (쓰기 전에 동기적으로 거부됨)
    #[error("잘못된 요청: {0}")]
    Validation(String),

    /// 빈도 제한 초과 (부수 효과 없음)
    #[error("요청이 너무 잦습니다. {retry_after_secs}초 후 다시 시도하세요")]
    RateLimited { retry_after_secs: u64 },

    /// 대상 엔티티 없음
    #[error("{0} 없음")]
    NotFound(&'static str),

    /// 이미 처리된 요청 (멱등 재전달)
    #[error("이미 처리된 요청")]
    AlreadyProcessed,

    /// 중복 구매 경고 (호출자가 무시하고 재시도 가능)
    #[error("이미 구매한 상품이 포함되어 있습니다: {0:?}")]
    DuplicatePurchase(Vec<String>),

    /// 결제 금액 불일치 (사기/버그 신호, 상태 변경 없이 거부)
    #[error("금액 불일치: 기대 {expected}센트, 실제 {actual}센트")]
    AmountMismatch { expected: i64, actual: i64 },

    /// 잔액 부족 (재시도해도 성공할 수 없는 확정 오류)
    #[error("잔액 부족: 필요 {required}센트, 보유 {available}센트")]
    InsufficientFunds { required: i64, available: i64 },

    /// 대기 정산 금액 부족
    #[error("대기 정산 부족: 필요 {required}센트, 보유 {available}센트")]
    InsufficientPending { required: i64, available: i64 },

    /// 현재 상태에서 허용되지 않는 전이
    #[error("허용되지 않는 상태 전이: {0}")]
    InvalidState(String),

    /// 외부 결제 연동 오류 (주문 상태는 변경하지 않음)
    #[error("결제 연동 오류: {0}")]
    Provider(String),

    /// 데이터베이스 오류
    #[error("데이터베이스 오류: {0}")]
    Db(#[from] sqlx::Error),
}

impl MarketError {
    /// 일시적 잠금 경합 오류 여부 (재시도 대상)
    ///
    /// SQLite의 SQLITE_BUSY/SQLITE_LOCKED 계열만 재시도하며,
    /// 그 외의 DB 오류는 즉시 상위로 전파됩니다.
    pub fn is_transient(&self) -> bool {
        match self {
            MarketError::Db(e) => is_busy_error(e),
            _ => false,
        }
    }
}

/// sqlx 오류가 SQLite 잠금 경합인지 판별
pub fn is_busy_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message();
            msg.contains("database is locked") || msg.contains("database table is locked")
        }
        _ => false,
    }
}
