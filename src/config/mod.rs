//! Engine configuration.
//!
//! Defaults are baked in; an optional TOML file (path in `VATRADE_CONFIG`)
//! supplies base values, and environment variables override both.

use anyhow::{Context, Result};
use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Governor
    pub max_loss_cooldown: u32,
    pub cooldown_duration_seconds: u64,
    pub max_open_positions_per_va: usize,
    pub kill_switch_enabled: bool,

    // Filter chain
    pub max_spread_bps: f64,
    pub max_slippage_bps: f64,
    pub max_latency_ms: f64,
    pub trading_window_start: Option<NaiveTime>,
    pub trading_window_end: Option<NaiveTime>,
    pub trading_window_utc_offset_minutes: i32,

    // Order manager
    pub stop_loss_percentage: f64,
    pub reconcile_interval_seconds: u64,
    pub stale_order_threshold_seconds: u64,
    pub stop_loss_failure_kill_threshold: u32,
    pub reconcile_failure_limit: u32,
    pub exchange_timeout_ms: u64,

    // Execution loop
    pub signal_queue_capacity: usize,
    pub dashboard_interval_seconds: u64,

    // Persistence and bootstrap
    pub database_url: String,
    pub va_count: usize,
    pub va_initial_balance: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_loss_cooldown: 3,
            cooldown_duration_seconds: 300,
            max_open_positions_per_va: 5,
            kill_switch_enabled: false,
            max_spread_bps: 10.0,
            max_slippage_bps: 5.0,
            max_latency_ms: 500.0,
            trading_window_start: NaiveTime::from_hms_opt(9, 30, 0),
            trading_window_end: NaiveTime::from_hms_opt(16, 0, 0),
            trading_window_utc_offset_minutes: 0,
            stop_loss_percentage: 2.0,
            reconcile_interval_seconds: 5,
            stale_order_threshold_seconds: 30,
            stop_loss_failure_kill_threshold: 3,
            reconcile_failure_limit: 3,
            exchange_timeout_ms: 2000,
            signal_queue_capacity: 256,
            dashboard_interval_seconds: 10,
            database_url: "sqlite://data/vatrade.db".to_string(),
            va_count: 3,
            va_initial_balance: Decimal::from(10_000),
        }
    }
}

/// Shape of the optional TOML file. Every key optional; unset keys keep
/// their defaults.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    max_loss_cooldown: Option<u32>,
    cooldown_duration_seconds: Option<u64>,
    max_open_positions_per_va: Option<usize>,
    kill_switch_enabled: Option<bool>,
    max_spread_bps: Option<f64>,
    max_slippage_bps: Option<f64>,
    max_latency_ms: Option<f64>,
    trading_window_start: Option<String>,
    trading_window_end: Option<String>,
    trading_window_utc_offset_minutes: Option<i32>,
    stop_loss_percentage: Option<f64>,
    reconcile_interval_seconds: Option<u64>,
    stale_order_threshold_seconds: Option<u64>,
    stop_loss_failure_kill_threshold: Option<u32>,
    reconcile_failure_limit: Option<u32>,
    exchange_timeout_ms: Option<u64>,
    signal_queue_capacity: Option<usize>,
    dashboard_interval_seconds: Option<u64>,
    database_url: Option<String>,
    va_count: Option<usize>,
    va_initial_balance: Option<f64>,
}

impl EngineConfig {
    /// Defaults, then `VATRADE_CONFIG` file if present, then environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(path) = env::var("VATRADE_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults overridden by environment only.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file: FileConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        macro_rules! take {
            ($field:ident) => {
                if let Some(v) = file.$field {
                    self.$field = v;
                }
            };
        }
        take!(max_loss_cooldown);
        take!(cooldown_duration_seconds);
        take!(max_open_positions_per_va);
        take!(kill_switch_enabled);
        take!(max_spread_bps);
        take!(max_slippage_bps);
        take!(max_latency_ms);
        take!(trading_window_utc_offset_minutes);
        take!(stop_loss_percentage);
        take!(reconcile_interval_seconds);
        take!(stale_order_threshold_seconds);
        take!(stop_loss_failure_kill_threshold);
        take!(reconcile_failure_limit);
        take!(exchange_timeout_ms);
        take!(signal_queue_capacity);
        take!(dashboard_interval_seconds);
        take!(database_url);
        take!(va_count);

        if let Some(s) = file.trading_window_start.as_deref() {
            self.trading_window_start = Self::parse_window_time("trading_window_start", s)?;
        }
        if let Some(s) = file.trading_window_end.as_deref() {
            self.trading_window_end = Self::parse_window_time("trading_window_end", s)?;
        }
        if let Some(v) = file.va_initial_balance {
            self.va_initial_balance = Decimal::try_from(v)
                .context("va_initial_balance is not representable as a decimal")?;
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        Self::override_u32("MAX_LOSS_COOLDOWN", &mut self.max_loss_cooldown)?;
        Self::override_u64("COOLDOWN_DURATION_SECONDS", &mut self.cooldown_duration_seconds)?;
        Self::override_usize("MAX_OPEN_POSITIONS_PER_VA", &mut self.max_open_positions_per_va)?;
        Self::override_bool("KILL_SWITCH_ENABLED", &mut self.kill_switch_enabled);
        Self::override_f64("MAX_SPREAD_BPS", &mut self.max_spread_bps)?;
        Self::override_f64("MAX_SLIPPAGE_BPS", &mut self.max_slippage_bps)?;
        Self::override_f64("MAX_LATENCY_MS", &mut self.max_latency_ms)?;
        Self::override_i32(
            "TRADING_WINDOW_UTC_OFFSET_MINUTES",
            &mut self.trading_window_utc_offset_minutes,
        )?;
        Self::override_f64("STOP_LOSS_PERCENTAGE", &mut self.stop_loss_percentage)?;
        Self::override_u64("RECONCILE_INTERVAL_SECONDS", &mut self.reconcile_interval_seconds)?;
        Self::override_u64(
            "STALE_ORDER_THRESHOLD_SECONDS",
            &mut self.stale_order_threshold_seconds,
        )?;
        Self::override_u32(
            "STOP_LOSS_FAILURE_KILL_THRESHOLD",
            &mut self.stop_loss_failure_kill_threshold,
        )?;
        Self::override_u32("RECONCILE_FAILURE_LIMIT", &mut self.reconcile_failure_limit)?;
        Self::override_u64("EXCHANGE_TIMEOUT_MS", &mut self.exchange_timeout_ms)?;
        Self::override_usize("SIGNAL_QUEUE_CAPACITY", &mut self.signal_queue_capacity)?;
        Self::override_u64("DASHBOARD_INTERVAL_SECONDS", &mut self.dashboard_interval_seconds)?;
        Self::override_usize("VA_COUNT", &mut self.va_count)?;

        if let Ok(s) = env::var("DATABASE_URL") {
            self.database_url = s;
        }
        if let Ok(s) = env::var("TRADING_WINDOW_START") {
            self.trading_window_start = Self::parse_window_time("TRADING_WINDOW_START", &s)?;
        }
        if let Ok(s) = env::var("TRADING_WINDOW_END") {
            self.trading_window_end = Self::parse_window_time("TRADING_WINDOW_END", &s)?;
        }
        if let Ok(s) = env::var("VA_INITIAL_BALANCE") {
            self.va_initial_balance = s
                .parse::<Decimal>()
                .context("Failed to parse VA_INITIAL_BALANCE")?;
        }
        Ok(())
    }

    /// "HH:MM"; empty string disables the bound (window always open once
    /// either bound is unset).
    fn parse_window_time(key: &str, raw: &str) -> Result<Option<NaiveTime>> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        NaiveTime::parse_from_str(trimmed, "%H:%M")
            .map(Some)
            .with_context(|| format!("Failed to parse {key} as HH:MM"))
    }

    pub fn cooldown_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_duration_seconds as i64)
    }

    pub fn stale_order_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_order_threshold_seconds as i64)
    }

    pub fn exchange_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.exchange_timeout_ms)
    }

    /// Stop distance as a fraction, e.g. 2.0% -> 0.02.
    pub fn stop_loss_fraction(&self) -> Decimal {
        Decimal::try_from(self.stop_loss_percentage / 100.0).unwrap_or(Decimal::ZERO)
    }

    fn override_u32(key: &str, slot: &mut u32) -> Result<()> {
        if let Ok(s) = env::var(key) {
            *slot = s.parse::<u32>().with_context(|| format!("Failed to parse {key}"))?;
        }
        Ok(())
    }

    fn override_u64(key: &str, slot: &mut u64) -> Result<()> {
        if let Ok(s) = env::var(key) {
            *slot = s.parse::<u64>().with_context(|| format!("Failed to parse {key}"))?;
        }
        Ok(())
    }

    fn override_usize(key: &str, slot: &mut usize) -> Result<()> {
        if let Ok(s) = env::var(key) {
            *slot = s.parse::<usize>().with_context(|| format!("Failed to parse {key}"))?;
        }
        Ok(())
    }

    fn override_i32(key: &str, slot: &mut i32) -> Result<()> {
        if let Ok(s) = env::var(key) {
            *slot = s.parse::<i32>().with_context(|| format!("Failed to parse {key}"))?;
        }
        Ok(())
    }

    fn override_f64(key: &str, slot: &mut f64) -> Result<()> {
        if let Ok(s) = env::var(key) {
            *slot = s.parse::<f64>().with_context(|| format!("Failed to parse {key}"))?;
        }
        Ok(())
    }

    fn override_bool(key: &str, slot: &mut bool) {
        if let Ok(s) = env::var(key) {
            *slot = s.parse::<bool>().unwrap_or(*slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_loss_cooldown, 3);
        assert_eq!(config.cooldown_duration_seconds, 300);
        assert_eq!(config.max_spread_bps, 10.0);
        assert_eq!(config.max_slippage_bps, 5.0);
        assert_eq!(config.max_latency_ms, 500.0);
        assert_eq!(config.reconcile_interval_seconds, 5);
        assert_eq!(config.stop_loss_percentage, 2.0);
        assert_eq!(config.max_open_positions_per_va, 5);
        assert!(!config.kill_switch_enabled);
        assert_eq!(
            config.trading_window_start,
            NaiveTime::from_hms_opt(9, 30, 0)
        );
        assert_eq!(config.trading_window_end, NaiveTime::from_hms_opt(16, 0, 0));
    }

    #[test]
    fn test_stop_loss_fraction() {
        let config = EngineConfig::default();
        assert_eq!(config.stop_loss_fraction(), Decimal::new(2, 2));
    }

    #[test]
    fn test_window_time_parsing() {
        assert_eq!(
            EngineConfig::parse_window_time("T", "09:30").unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0)
        );
        assert_eq!(EngineConfig::parse_window_time("T", "").unwrap(), None);
        assert!(EngineConfig::parse_window_time("T", "25:99").is_err());
    }

    #[test]
    fn test_file_overrides() {
        let dir = std::env::temp_dir();
        let path = dir.join("vatrade_config_test.toml");
        std::fs::write(
            &path,
            "max_spread_bps = 25.0\ntrading_window_start = \"\"\nva_count = 7\n",
        )
        .unwrap();

        let mut config = EngineConfig::default();
        config.apply_file(&path).unwrap();
        assert_eq!(config.max_spread_bps, 25.0);
        assert_eq!(config.trading_window_start, None);
        assert_eq!(config.va_count, 7);
        // Untouched keys keep defaults.
        assert_eq!(config.max_slippage_bps, 5.0);

        std::fs::remove_file(&path).ok();
    }
}
