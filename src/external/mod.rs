//! 외부 협력 시스템 연동 모듈
//!
//! 배송(파일 전달), 알림, 결제 게이트웨이는 엔진 바깥의 협력자입니다.
//! 전부 트레이트 뒤에 두어 금융 트랜잭션과 분리하며, 호출은 항상
//! 커밋 이후에, 타임아웃과 함께 이루어집니다.

pub mod delivery;
pub mod notify;
pub mod provider;

pub use delivery::{DbDelivery, DeliveryClient, DeliveryError};
pub use notify::{notify_best_effort, DbNotifier, Notifier, NotifyError, NotifyKind};
pub use provider::{PaymentProvider, ProviderError, SandboxProvider};
