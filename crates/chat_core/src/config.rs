use std::{fs, time::Duration};

use serde::Deserialize;
use tracing::warn;

/// Transport connector settings. Endpoints are an injected candidate list;
/// the connector walks it in order as retry budgets are exhausted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectorSettings {
    pub endpoints: Vec<String>,
    pub connect_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    /// Demo fallback: flip locally-sent messages to `sent` after this delay
    /// when no live acknowledgement channel confirmed the emit. Off by
    /// default; real deployments drive the transition from acknowledgements.
    pub simulated_ack_delay_ms: Option<u64>,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            endpoints: vec!["ws://127.0.0.1:9090/ws".to_string()],
            connect_timeout_secs: 10,
            max_attempts: 3,
            backoff_base_ms: 500,
            simulated_ack_delay_ms: None,
        }
    }
}

impl ConnectorSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn simulated_ack_delay(&self) -> Option<Duration> {
        self.simulated_ack_delay_ms.map(Duration::from_millis)
    }
}

pub fn load_settings() -> ConnectorSettings {
    let mut settings = ConnectorSettings::default();

    if let Ok(raw) = fs::read_to_string("client.toml") {
        match toml::from_str::<ConnectorSettings>(&raw) {
            Ok(file_cfg) => settings = file_cfg,
            Err(err) => warn!("ignoring malformed client.toml: {err}"),
        }
    }

    if let Ok(v) = std::env::var("CHAT_ENDPOINTS") {
        let endpoints: Vec<String> = v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !endpoints.is_empty() {
            settings.endpoints = endpoints;
        }
    }
    if let Ok(v) = std::env::var("CHAT_CONNECT_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.connect_timeout_secs = parsed;
        }
    }
    if let Ok(v) = std::env::var("CHAT_MAX_ATTEMPTS") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.max_attempts = parsed;
        }
    }
    if let Ok(v) = std::env::var("CHAT_BACKOFF_BASE_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.backoff_base_ms = parsed;
        }
    }
    if let Ok(v) = std::env::var("CHAT_SIMULATED_ACK_DELAY_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.simulated_ack_delay_ms = Some(parsed);
        }
    }

    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let settings = ConnectorSettings::default();
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.connect_timeout(), Duration::from_secs(10));
        assert!(settings.simulated_ack_delay().is_none());
        assert!(!settings.endpoints.is_empty());
    }

    #[test]
    fn env_overrides_endpoint_list_and_budgets() {
        std::env::set_var("CHAT_ENDPOINTS", "ws://a.example/ws, ws://b.example/ws");
        std::env::set_var("CHAT_MAX_ATTEMPTS", "5");
        std::env::set_var("CHAT_BACKOFF_BASE_MS", "250");

        let settings = load_settings();
        assert_eq!(
            settings.endpoints,
            vec![
                "ws://a.example/ws".to_string(),
                "ws://b.example/ws".to_string()
            ]
        );
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.backoff_base(), Duration::from_millis(250));

        std::env::remove_var("CHAT_ENDPOINTS");
        std::env::remove_var("CHAT_MAX_ATTEMPTS");
        std::env::remove_var("CHAT_BACKOFF_BASE_MS");
    }

    #[test]
    fn toml_settings_parse() {
        let settings: ConnectorSettings = toml::from_str(
            r#"
            endpoints = ["ws://primary.example/ws", "ws://fallback.example/ws"]
            max_attempts = 4
            simulated_ack_delay_ms = 750
            "#,
        )
        .expect("parse");
        assert_eq!(settings.endpoints.len(), 2);
        assert_eq!(settings.max_attempts, 4);
        assert_eq!(settings.simulated_ack_delay(), Some(Duration::from_millis(750)));
    }
}
