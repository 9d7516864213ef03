use anyhow::Result;
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::sandbox::SandboxLimits;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
    pub sessions: SessionConfig,
    pub fetch: FetchConfig,
    pub log_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    pub timeout_ms: u64,
    pub max_steps: u64,
    pub max_log_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    pub notion_api_base: String,
    pub notion_version: String,
    pub http_timeout_secs: u64,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl SandboxConfig {
    pub fn limits(&self) -> SandboxLimits {
        SandboxLimits {
            timeout: Duration::from_millis(self.timeout_ms),
            max_steps: self.max_steps,
            max_log_bytes: self.max_log_bytes,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            server: ServerConfig {
                port: var_or("PORT", "3000").parse()?,
                host: var_or("HOST", "0.0.0.0"),
                cors_allowed_origins: var_or("ALLOWED_ORIGINS", "http://localhost:3000,http://localhost:5173")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                max_upload_bytes: var_or("MAX_UPLOAD_BYTES", "52428800").parse()?,
                rate_limit_per_minute: var_or("RATE_LIMIT_PER_MINUTE", "120").parse()?,
            },
            sandbox: SandboxConfig {
                timeout_ms: var_or("SANDBOX_TIMEOUT_MS", "5000").parse()?,
                max_steps: var_or("SANDBOX_MAX_STEPS", "5000000").parse()?,
                max_log_bytes: var_or("SANDBOX_MAX_LOG_BYTES", "1048576").parse()?,
            },
            sessions: SessionConfig {
                max_sessions: var_or("MAX_SESSIONS", "100").parse()?,
                idle_timeout_secs: var_or("SESSION_IDLE_TIMEOUT_SECS", "3600").parse()?,
            },
            fetch: FetchConfig {
                notion_api_base: var_or("NOTION_API_BASE", "https://api.notion.com"),
                notion_version: var_or("NOTION_VERSION", "2022-06-28"),
                http_timeout_secs: var_or("HTTP_TIMEOUT_SECS", "30").parse()?,
            },
            log_dir: env::var("LOG_DIR").ok().filter(|s| !s.is_empty()),
        })
    }

    /// Defaults without touching the environment; used by tests.
    pub fn for_tests() -> Self {
        Self {
            server: ServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
                cors_allowed_origins: vec!["http://localhost:5173".to_string()],
                max_upload_bytes: 1024 * 1024,
                rate_limit_per_minute: 1000,
            },
            sandbox: SandboxConfig {
                timeout_ms: 5000,
                max_steps: 5_000_000,
                max_log_bytes: 64 * 1024,
            },
            sessions: SessionConfig {
                max_sessions: 4,
                idle_timeout_secs: 3600,
            },
            fetch: FetchConfig {
                notion_api_base: "https://api.notion.com".to_string(),
                notion_version: "2022-06-28".to_string(),
                http_timeout_secs: 5,
            },
            log_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_limits_conversion() {
        let config = Config::for_tests();
        let limits = config.sandbox.limits();
        assert_eq!(limits.timeout, Duration::from_millis(5000));
        assert_eq!(limits.max_log_bytes, 64 * 1024);
    }
}
