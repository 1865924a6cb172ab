// Client defaults plus environment and YAML overrides.
use anyhow::{Context, Result};
use marquee_cache::{CacheConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_STALE_TIME, MutationOrdering};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000/api";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub(crate) const NOTIFICATION_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
    pub stale_time: Duration,
    pub mutation_ordering: MutationOrdering,
    pub page_size: u32,
    pub event_capacity: usize,
    pub notification_queue_depth: usize,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct ClientConfigOverride {
    base_url: Option<String>,
    auth_token: Option<String>,
    request_timeout_ms: Option<u64>,
    stale_time_ms: Option<u64>,
    mutation_ordering: Option<String>,
    page_size: Option<u32>,
    event_capacity: Option<usize>,
    notification_queue_depth: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            auth_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stale_time: DEFAULT_STALE_TIME,
            mutation_ordering: MutationOrdering::default(),
            page_size: DEFAULT_PAGE_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            notification_queue_depth: NOTIFICATION_QUEUE_DEPTH,
        }
    }
}

impl ClientConfig {
    /// Defaults, then `MARQUEE_*` environment variables, then the YAML file at
    /// `config_path` (or `MARQUEE_CLIENT_CONFIG`) when one is given.
    pub fn from_env_or_yaml(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::from_env();
        let override_path = config_path
            .map(|value| value.to_string())
            .or_else(|| std::env::var("MARQUEE_CLIENT_CONFIG").ok());
        if let Some(path) = override_path.as_deref() {
            let contents =
                fs::read_to_string(path).with_context(|| format!("read client config: {path}"))?;
            let override_cfg: ClientConfigOverride =
                serde_yaml::from_str(&contents).context("parse client config yaml")?;
            override_cfg.apply(&mut config);
        }
        Ok(config)
    }

    fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = read_string_env("MARQUEE_API_URL") {
            config.base_url = value;
        }
        if let Some(value) = read_string_env("MARQUEE_API_TOKEN") {
            config.auth_token = Some(value);
        }
        if let Some(value) = read_u64_env("MARQUEE_REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(value);
        }
        if let Some(value) = read_u64_env("MARQUEE_STALE_TIME_MS") {
            config.stale_time = Duration::from_millis(value);
        }
        if let Some(value) = read_string_env("MARQUEE_MUTATION_ORDERING")
            .and_then(|value| value.parse::<MutationOrdering>().ok())
        {
            config.mutation_ordering = value;
        }
        if let Some(value) = read_u64_env("MARQUEE_PAGE_SIZE") {
            config.page_size = u32::try_from(value).unwrap_or(u32::MAX);
        }
        if let Some(value) = read_usize_env("MARQUEE_CACHE_EVENT_CAPACITY") {
            config.event_capacity = value;
        }
        if let Some(value) = read_usize_env("MARQUEE_NOTIFICATION_QUEUE_DEPTH") {
            config.notification_queue_depth = value;
        }
        config
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            stale_time: self.stale_time,
            mutation_ordering: self.mutation_ordering,
            event_capacity: self.event_capacity,
        }
    }
}

impl ClientConfigOverride {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(value) = &self.base_url
            && !value.trim().is_empty()
        {
            config.base_url = value.clone();
        }
        if let Some(value) = &self.auth_token
            && !value.trim().is_empty()
        {
            config.auth_token = Some(value.clone());
        }
        if let Some(value) = self.request_timeout_ms
            && value > 0
        {
            config.request_timeout = Duration::from_millis(value);
        }
        if let Some(value) = self.stale_time_ms
            && value > 0
        {
            config.stale_time = Duration::from_millis(value);
        }
        if let Some(value) = &self.mutation_ordering
            && let Ok(parsed) = value.parse::<MutationOrdering>()
        {
            config.mutation_ordering = parsed;
        }
        if let Some(value) = self.page_size
            && value > 0
        {
            config.page_size = value;
        }
        if let Some(value) = self.event_capacity
            && value > 0
        {
            config.event_capacity = value;
        }
        if let Some(value) = self.notification_queue_depth
            && value > 0
        {
            config.notification_queue_depth = value;
        }
    }
}

fn read_string_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_u64_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn read_usize_env(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const VARS: &[&str] = &[
        "MARQUEE_API_URL",
        "MARQUEE_API_TOKEN",
        "MARQUEE_REQUEST_TIMEOUT_MS",
        "MARQUEE_STALE_TIME_MS",
        "MARQUEE_MUTATION_ORDERING",
        "MARQUEE_PAGE_SIZE",
        "MARQUEE_CACHE_EVENT_CAPACITY",
        "MARQUEE_NOTIFICATION_QUEUE_DEPTH",
        "MARQUEE_CLIENT_CONFIG",
    ];

    fn clear_env() {
        for key in VARS {
            unsafe {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_without_env() {
        clear_env();
        let config = ClientConfig::from_env_or_yaml(None).expect("config");
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.cache_config().stale_time, DEFAULT_STALE_TIME);
    }

    #[test]
    #[serial]
    fn env_overrides_defaults_and_ignores_invalid_values() {
        clear_env();
        unsafe {
            std::env::set_var("MARQUEE_API_URL", "https://admin.example.com/api");
            std::env::set_var("MARQUEE_API_TOKEN", "secret");
            std::env::set_var("MARQUEE_STALE_TIME_MS", "500");
            std::env::set_var("MARQUEE_MUTATION_ORDERING", "concurrent");
            std::env::set_var("MARQUEE_PAGE_SIZE", "0");
            std::env::set_var("MARQUEE_REQUEST_TIMEOUT_MS", "soon");
        }
        let config = ClientConfig::from_env_or_yaml(None).expect("config");
        clear_env();

        assert_eq!(config.base_url, "https://admin.example.com/api");
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.stale_time, Duration::from_millis(500));
        assert_eq!(config.mutation_ordering, MutationOrdering::Concurrent);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    #[serial]
    fn yaml_overrides_env() {
        clear_env();
        unsafe {
            std::env::set_var("MARQUEE_PAGE_SIZE", "20");
        }
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "base_url: http://localhost:8080/api\npage_size: 50\nevent_capacity: 0\nmutation_ordering: concurrent"
        )
        .expect("write");
        let path = file.path().to_str().expect("utf8 path").to_string();

        let config = ClientConfig::from_env_or_yaml(Some(&path)).expect("config");
        clear_env();

        assert_eq!(config.base_url, "http://localhost:8080/api");
        assert_eq!(config.page_size, 50);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert_eq!(config.mutation_ordering, MutationOrdering::Concurrent);
    }

    #[test]
    #[serial]
    fn config_path_from_env() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "stale_time_ms: 1000").expect("write");
        unsafe {
            std::env::set_var("MARQUEE_CLIENT_CONFIG", file.path());
        }
        let config = ClientConfig::from_env_or_yaml(None).expect("config");
        clear_env();
        assert_eq!(config.stale_time, Duration::from_secs(1));
    }

    #[test]
    #[serial]
    fn missing_or_malformed_file_is_an_error() {
        clear_env();
        let err = ClientConfig::from_env_or_yaml(Some("/nonexistent/marquee.yaml"))
            .expect_err("missing");
        assert!(err.to_string().contains("read client config"));

        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "page_size: [1, 2").expect("write");
        let path = file.path().to_str().expect("utf8 path").to_string();
        let err = ClientConfig::from_env_or_yaml(Some(&path)).expect_err("malformed");
        assert!(err.to_string().contains("parse client config yaml"));
    }
}
