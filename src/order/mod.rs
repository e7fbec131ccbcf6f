//! 주문 모듈

pub mod service;

pub use service::{OrderDetail, OrderItemView, OrderLine, OrderRole, OrderService, PaymentIntent};
