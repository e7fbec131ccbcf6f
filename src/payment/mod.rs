//! 결제 처리 모듈

pub mod callback;

pub use callback::{CallbackOutcome, CallbackProcessor};
