//! 엔진 설정
//!
//! 환경 변수(.env)에서 읽어 들이며, 빈도 제한 테이블과 출금 한도는
//! 코드 기본값을 환경 변수로 덮어쓸 수 있습니다.

use std::collections::HashMap;
use std::time::Duration;

/// 액션별 빈도 제한 규칙 (슬라이딩 윈도우)
#[derive(Debug, Clone)]
pub struct RateLimitRule {
    /// 윈도우 내 최대 허용 횟수
    pub max_requests: i64,
    /// 윈도우 길이 (초)
    pub window_seconds: u64,
    /// 롤링 1일 상한 (선택)
    pub daily_max: Option<i64>,
}

/// 출금 한도 설정
#[derive(Debug, Clone)]
pub struct PayoutLimits {
    /// 최소 출금 금액 (센트)
    pub min_amount_cents: i64,
    /// 단건 최대 출금 금액 (센트)
    pub max_amount_cents: i64,
    /// 1일 출금 한도 (센트)
    pub daily_limit_cents: i64,
}

/// 환불 빈도 제한 설정
#[derive(Debug, Clone)]
pub struct RefundFrequencyRule {
    /// 윈도우 길이 (초)
    pub window_seconds: u64,
    /// 윈도우 내 최대 환불 신청 횟수
    pub max_requests: i64,
}

/// 엔진 전역 설정
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite 데이터베이스 URL
    pub database_url: String,
    /// 외부 호출(결제/배송) 타임아웃
    pub external_call_timeout: Duration,
    /// 액션별 빈도 제한 테이블
    pub rate_limits: HashMap<String, RateLimitRule>,
    /// 출금 한도
    pub payout_limits: PayoutLimits,
    /// 환불 빈도 규칙
    pub refund_frequency: RefundFrequencyRule,
    /// 리스크 경보 수신 관리자 계정
    pub admin_inbox: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut rate_limits = HashMap::new();
        // 1분 내 최대 10회 주문 생성
        rate_limits.insert(
            "create_order".to_string(),
            RateLimitRule { max_requests: 10, window_seconds: 60, daily_max: None },
        );
        // 1분 내 최대 3회 출금 신청, 하루 최대 20회
        rate_limits.insert(
            "create_payout".to_string(),
            RateLimitRule { max_requests: 3, window_seconds: 60, daily_max: Some(20) },
        );
        // 5분 내 최대 5회 설정 변경
        rate_limits.insert(
            "payment_config".to_string(),
            RateLimitRule { max_requests: 5, window_seconds: 300, daily_max: None },
        );

        Self {
            database_url: "sqlite://market_data.db?mode=rwc".to_string(),
            external_call_timeout: Duration::from_secs(10),
            rate_limits,
            payout_limits: PayoutLimits {
                min_amount_cents: 100,
                max_amount_cents: 1_000_000,
                daily_limit_cents: 5_000_000,
            },
            refund_frequency: RefundFrequencyRule {
                window_seconds: 3600,
                max_requests: 3,
            },
            admin_inbox: "admin".to_string(),
        }
    }
}

impl EngineConfig {
    /// 환경 변수에서 설정 로드 (없으면 기본값)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(secs) = env_u64("EXTERNAL_CALL_TIMEOUT_SECS") {
            config.external_call_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = env_i64("PAYOUT_MIN_AMOUNT_CENTS") {
            config.payout_limits.min_amount_cents = v;
        }
        if let Some(v) = env_i64("PAYOUT_MAX_AMOUNT_CENTS") {
            config.payout_limits.max_amount_cents = v;
        }
        if let Some(v) = env_i64("PAYOUT_DAILY_LIMIT_CENTS") {
            config.payout_limits.daily_limit_cents = v;
        }
        if let Some(v) = env_u64("REFUND_WINDOW_SECS") {
            config.refund_frequency.window_seconds = v;
        }
        if let Some(v) = env_i64("REFUND_MAX_REQUESTS") {
            config.refund_frequency.max_requests = v;
        }
        if let Ok(v) = std::env::var("RISK_ADMIN_INBOX") {
            config.admin_inbox = v;
        }

        config
    }
}

fn env_i64(key: &str) -> Option<i64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
