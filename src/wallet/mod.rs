//! 지갑 모듈
//!
//! `ledger`는 트랜잭션 스코프의 원장 프리미티브(적립/정산/차감),
//! `service`는 지갑 조회와 출금 워크플로를 제공합니다.

pub mod ledger;
pub mod service;

pub use ledger::Applied;
pub use service::{PayoutReview, WalletService, WalletView};
