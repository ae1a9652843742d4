//! Error type conversions

use super::EngineError;

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            operation: "io_operation".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config {
            message: format!("Failed to parse config file: {err}"),
            field: None,
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for EngineError {
    fn from(err: url::ParseError) -> Self {
        Self::Config {
            message: format!("Invalid URL: {err}"),
            field: None,
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        Self::Adapter {
            message: format!("redis operation failed: {err}"),
        }
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::PoolError> for EngineError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Adapter {
            message: format!("redis pool error: {err}"),
        }
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::CreatePoolError> for EngineError {
    fn from(err: deadpool_redis::CreatePoolError) -> Self {
        Self::Config {
            message: format!("Failed to create Redis pool: {err}"),
            field: Some("storage.redis_url".to_string()),
        }
    }
}
