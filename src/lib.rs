//! 디지털 상품 마켓플레이스의 주문/결제/정산 엔진
//!
//! 주문 생성, 결제 콜백 처리, 판매자 지갑 원장, 환불/출금 워크플로를
//! 담당합니다. 모든 금액은 정수 센트이며, 잔액 변경은 추가 전용
//! 원장(`wallet_logs`)과 항상 함께 일어납니다.

pub mod config;
pub mod db;
pub mod error;
pub mod external;
pub mod order;
pub mod payment;
pub mod refund;
pub mod risk;
pub mod wallet;

pub use config::EngineConfig;
pub use error::MarketError;
