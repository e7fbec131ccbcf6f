//! 환불 모듈

pub mod workflow;

pub use workflow::{RefundReview, RefundWorkflow};
