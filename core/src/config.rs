/// Configuration management
use std::time::Duration;

/// Chat core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Max reconnect attempts after a transport loss
    pub max_connect_attempts: u32,

    /// Initial delay before the first reconnect attempt (doubles per attempt)
    pub retry_base_delay: Duration,

    /// Cap on the reconnect delay
    pub retry_max_delay: Duration,

    /// Upper bound on random jitter added to each reconnect delay
    pub retry_jitter: Duration,

    /// Page size requested from the history endpoint
    pub history_page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_connect_attempts: 5,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            retry_jitter: Duration::from_millis(250),
            history_page_size: 50,
        }
    }
}

impl Config {
    /// Build config from defaults plus environment overrides (nice for scripts)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = std::env::var("CONCIERGE_MAX_CONNECT_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            config.max_connect_attempts = n;
        }
        if let Some(ms) = std::env::var("CONCIERGE_RETRY_BASE_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = std::env::var("CONCIERGE_RETRY_MAX_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.retry_max_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = std::env::var("CONCIERGE_RETRY_JITTER_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.retry_jitter = Duration::from_millis(ms);
        }
        if let Some(n) = std::env::var("CONCIERGE_HISTORY_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            config.history_page_size = n;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_every_retry_knob() {
        std::env::set_var("CONCIERGE_MAX_CONNECT_ATTEMPTS", "9");
        std::env::set_var("CONCIERGE_RETRY_BASE_MS", "100");
        std::env::set_var("CONCIERGE_RETRY_MAX_MS", "4000");
        std::env::set_var("CONCIERGE_RETRY_JITTER_MS", "0");
        std::env::set_var("CONCIERGE_HISTORY_PAGE_SIZE", "25");

        let config = Config::from_env();
        assert_eq!(config.max_connect_attempts, 9);
        assert_eq!(config.retry_base_delay, Duration::from_millis(100));
        assert_eq!(config.retry_max_delay, Duration::from_millis(4000));
        assert_eq!(config.retry_jitter, Duration::ZERO);
        assert_eq!(config.history_page_size, 25);

        std::env::remove_var("CONCIERGE_MAX_CONNECT_ATTEMPTS");
        std::env::remove_var("CONCIERGE_RETRY_BASE_MS");
        std::env::remove_var("CONCIERGE_RETRY_MAX_MS");
        std::env::remove_var("CONCIERGE_RETRY_JITTER_MS");
        std::env::remove_var("CONCIERGE_HISTORY_PAGE_SIZE");
    }
}
