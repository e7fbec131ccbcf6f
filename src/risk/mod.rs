//! 리스크 통제 모듈
//!
//! 빈도 제한과 리스크 이벤트 감사 추적을 담당합니다. 거부 판정은
//! 감사 기록 외의 어떤 부수 효과도 남기지 않습니다.

pub mod governor;

pub use governor::{RateDecision, RiskGovernor};
