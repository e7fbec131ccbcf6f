//! 결제 게이트웨이 연동 심 (seam)
//!
//! 실제 PG사 연동은 엔진 범위 밖입니다. 엔진은 결제 참조 획득과
//! 상태 조회만 요구하며, 호출은 항상 타임아웃과 함께 이루어지고
//! 타임아웃은 "결과 불명"으로 취급합니다 (실패 전이 금지).

use async_trait::async_trait;
use thiserror::Error;

/// 결제 연동 에러 타입
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("게이트웨이 응답 오류: {0}")]
    Gateway(String),
    #[error("호출 시간 초과")]
    Timeout,
}

/// 외부 결제 게이트웨이
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// 결제 기록에 남길 게이트웨이 식별자
    fn name(&self) -> &'static str;

    /// 결제 개시: 결제창 참조(URL 등)를 반환
    async fn initiate_payment(
        &self,
        order_no: &str,
        amount_cents: i64,
    ) -> Result<String, ProviderError>;

    /// 거래 상태 조회: 결제 완료 여부
    async fn query_payment_status(&self, transaction_id: &str) -> Result<bool, ProviderError>;
}

/// 개발/테스트용 샌드박스 게이트웨이
///
/// 항상 즉시 가짜 결제창 참조를 반환합니다.
pub struct SandboxProvider;

#[async_trait]
impl PaymentProvider for SandboxProvider {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    async fn initiate_payment(
        &self,
        order_no: &str,
        amount_cents: i64,
    ) -> Result<String, ProviderError> {
        Ok(format!(
            "sandbox://pay?order_no={}&amount={}",
            order_no, amount_cents
        ))
    }

    async fn query_payment_status(&self, _transaction_id: &str) -> Result<bool, ProviderError> {
        // 샌드박스는 콜백으로만 상태가 바뀌므로 조회는 항상 미결제
        Ok(false)
    }
}
