//! Configuration types for the voice booking gateway.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the gateway process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bridge-facing HTTP/WebSocket server.
    pub server: ServerConfig,
    /// Audio codec/resampling settings.
    pub audio: AudioConfig,
    /// Protection window deadlines (greeting, echo, summary, barge-in).
    pub protection: ProtectionConfig,
    /// Upstream Realtime API connection settings.
    pub upstream: UpstreamConfig,
    /// Dispatch backend (webhook + fallback quote) settings.
    pub dispatch: DispatchConfig,
    /// Persistence store settings.
    pub persistence: PersistenceConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// any field the file omits.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse as
    /// valid TOML matching this shape.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| GatewayError::Config(format!("{path:?}: {e}")))
    }

    /// Persist configuration to a TOML file, creating parent directories
    /// as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)
            .map_err(|e| GatewayError::Config(format!("serialize: {e}")))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Default config file location: `$XDG_CONFIG_HOME/ada-voice-gateway/config.toml`
    /// or `~/.config/ada-voice-gateway/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs_config_dir().join("ada-voice-gateway").join("config.toml")
    }

    /// Apply environment variable overrides for values that should not be
    /// committed to a config file (secrets, deployment-specific URLs).
    ///
    /// Recognized variables: `GATEWAY_DISPATCH_WEBHOOK_URL`,
    /// `GATEWAY_PERSISTENCE_BASE_URL`, `GATEWAY_UPSTREAM_URL`,
    /// `GATEWAY_UPSTREAM_API_KEY`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GATEWAY_DISPATCH_WEBHOOK_URL") {
            self.dispatch.webhook_url = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_PERSISTENCE_BASE_URL") {
            self.persistence.base_url = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_UPSTREAM_URL") {
            self.upstream.ws_url = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_UPSTREAM_API_KEY") {
            self.upstream.api_key = Some(v);
        }
    }
}

fn dirs_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Bridge-facing HTTP/WebSocket server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
        }
    }
}

/// Audio codec/resampling settings (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Narrow-band µ-law sample rate in Hz.
    pub narrowband_rate: u32,
    /// Wide-band PCM16 input rate some bridges send directly, in Hz.
    pub wideband_rate: u32,
    /// Rate the upstream Realtime API expects, in Hz.
    pub upstream_rate: u32,
    /// RMS floor below which auto-gain kicks in.
    pub auto_gain_floor: f32,
    /// Auto-gain target RMS.
    pub auto_gain_target: f32,
    /// Maximum auto-gain multiplier.
    pub auto_gain_max: f32,
    /// Whether pre-emphasis filtering is applied before upstream send.
    pub pre_emphasis_enabled: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            narrowband_rate: 8_000,
            wideband_rate: 16_000,
            upstream_rate: 24_000,
            auto_gain_floor: 120.0,
            auto_gain_target: 250.0,
            auto_gain_max: 15.0,
            pre_emphasis_enabled: false,
        }
    }
}

/// Protection window deadlines, all in milliseconds (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    pub greeting_ms: u64,
    pub echo_ms: u64,
    pub summary_ms: u64,
    pub confirm_ms: u64,
    pub goodbye_ms: u64,
    pub lead_in_ms: u64,
    pub barge_in_cooldown_ms: u64,
    pub barge_in_rms_min: f32,
    pub barge_in_rms_max: f32,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            greeting_ms: 12_000,
            echo_ms: 250,
            summary_ms: 8_000,
            confirm_ms: 12_000,
            goodbye_ms: 16_000,
            lead_in_ms: 700,
            barge_in_cooldown_ms: 2_000,
            barge_in_rms_min: 5.0,
            barge_in_rms_max: 20_000.0,
        }
    }
}

/// Upstream Realtime API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// WebSocket URL of the Realtime API.
    pub ws_url: String,
    /// Bearer API key, if required. Overridable via `GATEWAY_UPSTREAM_API_KEY`.
    pub api_key: Option<String>,
    /// Voice identifier passed in session config.
    pub voice: String,
    /// Server-VAD activation threshold.
    pub vad_threshold: f32,
    /// Server-VAD speech prefix padding, ms.
    pub vad_prefix_ms: u32,
    /// Server-VAD trailing silence before turn end, ms.
    pub vad_silence_ms: u32,
    /// Sampling temperature for the realtime model.
    pub temperature: f32,
    /// Fallback delay (ms) before resending session-config/greeting if
    /// `session.updated` is not observed.
    pub greeting_fallback_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://realtime.example.invalid/v1/realtime".to_owned(),
            api_key: None,
            voice: "alloy".to_owned(),
            vad_threshold: 0.5,
            vad_prefix_ms: 300,
            vad_silence_ms: 900,
            temperature: 0.6,
            greeting_fallback_ms: 2_000,
        }
    }
}

/// Dispatch backend settings (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Webhook URL the coordinator POSTs to. Overridable via
    /// `GATEWAY_DISPATCH_WEBHOOK_URL`.
    pub webhook_url: String,
    /// Number of retry attempts after the first send.
    pub retries: u32,
    /// Delay between retry attempts, ms.
    pub retry_delay_ms: u64,
    /// Per-attempt HTTP timeout, ms.
    pub attempt_timeout_ms: u64,
    /// Fallback quote timer, ms.
    pub fallback_timer_ms: u64,
    /// Fallback fare string used when no real quote arrives in time.
    pub fallback_fare: String,
    /// Fallback ETA string used when no real quote arrives in time.
    pub fallback_eta: String,
    /// De-dupe window for repeated `request_quote` tool calls, ms.
    pub request_quote_dedupe_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            webhook_url: "https://dispatch.example.invalid/webhook".to_owned(),
            retries: 2,
            retry_delay_ms: 1_000,
            attempt_timeout_ms: 30_000,
            fallback_timer_ms: 4_000,
            fallback_fare: "£12.50".to_owned(),
            fallback_eta: "6 minutes".to_owned(),
            request_quote_dedupe_ms: 15_000,
        }
    }
}

/// Persistence store settings (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Base URL of the backing store. Overridable via
    /// `GATEWAY_PERSISTENCE_BASE_URL`.
    pub base_url: String,
    /// Debounce window for coalesced flushes, ms.
    pub debounce_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://store.example.invalid".to_owned(),
            debounce_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_toml() {
        let cfg = GatewayConfig::default();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        cfg.save_to_file(&path).expect("save");
        let loaded = GatewayConfig::from_file(&path).expect("load");
        assert_eq!(loaded.server.port, cfg.server.port);
        assert_eq!(loaded.dispatch.fallback_fare, cfg.dispatch.fallback_fare);
    }

    #[test]
    fn env_overrides_apply() {
        // SAFETY: test-only env mutation, single-threaded within this test.
        unsafe {
            std::env::set_var("GATEWAY_DISPATCH_WEBHOOK_URL", "https://override.invalid/hook");
        }
        let mut cfg = GatewayConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.dispatch.webhook_url, "https://override.invalid/hook");
        // SAFETY: test-only env mutation cleanup.
        unsafe {
            std::env::remove_var("GATEWAY_DISPATCH_WEBHOOK_URL");
        }
    }
}
