use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// provider 调用失败，编排器会吸收并切换到下一个 provider
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider timed out after {0:?}")]
    Timeout(Duration),
}

/// 失败原因分类，仅用于日志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Quota,
    Auth,
    Timeout,
    Unknown,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Quota => write!(f, "quota"),
            FailureReason::Auth => write!(f, "auth"),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Unknown => write!(f, "unknown"),
        }
    }
}

impl ProviderError {
    pub fn classify(&self) -> FailureReason {
        match self {
            ProviderError::Timeout(_) => FailureReason::Timeout,
            ProviderError::Unavailable(msg) => classify_message(msg),
        }
    }

    /// 配额和认证错误重试也没用
    pub fn is_retryable(&self) -> bool {
        matches!(self.classify(), FailureReason::Timeout | FailureReason::Unknown)
    }
}

pub fn classify_message(message: &str) -> FailureReason {
    let lower = message.to_lowercase();

    if lower.contains("429")
        || lower.contains("quota")
        || lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("insufficient credits")
    {
        FailureReason::Quota
    } else if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
        || lower.contains("api key")
        || lower.contains("authentication")
    {
        FailureReason::Auth
    } else if lower.contains("timed out") || lower.contains("timeout") || lower.contains("deadline") {
        FailureReason::Timeout
    } else {
        FailureReason::Unknown
    }
}

/// 单词扩展唯一会暴露给调用方的错误
#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error("vocabulary item {item_id} not found for user {user_id}")]
    NotFound { item_id: i64, user_id: i64 },

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_provider_failures() {
        assert_eq!(classify_message("HTTP 429 Too Many Requests"), FailureReason::Quota);
        assert_eq!(classify_message("You exceeded your current quota"), FailureReason::Quota);
        assert_eq!(classify_message("401 Unauthorized"), FailureReason::Auth);
        assert_eq!(classify_message("Invalid API key provided"), FailureReason::Auth);
        assert_eq!(classify_message("operation timed out"), FailureReason::Timeout);
        assert_eq!(classify_message("connection refused"), FailureReason::Unknown);
    }

    #[test]
    fn timeout_variant_is_always_timeout() {
        let err = ProviderError::Timeout(Duration::from_secs(3));
        assert_eq!(err.classify(), FailureReason::Timeout);
        assert!(err.is_retryable());
    }

    #[test]
    fn quota_and_auth_are_not_retried() {
        assert!(!ProviderError::Unavailable("429 rate limit".into()).is_retryable());
        assert!(!ProviderError::Unavailable("403 forbidden".into()).is_retryable());
        assert!(ProviderError::Unavailable("502 bad gateway".into()).is_retryable());
    }
}
