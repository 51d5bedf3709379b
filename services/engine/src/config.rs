use anyhow::Context;
use serde::Deserialize;
use shared::{
    Amount, GameKind, DEFAULT_HOUSE_EDGE_BPS, DEFAULT_MAX_BET_BX, DEFAULT_MIN_BET_BX,
    DEFAULT_RATE_LIMIT_MAX_TRACKED_KEYS, DEFAULT_RATE_LIMIT_MAX_WAGERS,
    DEFAULT_RATE_LIMIT_WINDOW_MS, MAX_CONFLICT_RETRIES, RETRY_BACKOFF_BASE_MS,
    RETRY_BACKOFF_MAX_MS,
};
use std::env;
use std::str::FromStr;

use crate::domain::GameSettings;
use crate::fairness::ChickenCurve;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_port: u16,
    pub metrics_port: u16,
    pub admin_token: Option<String>,
    pub store: StoreConfig,
    pub engine: EngineConfig,
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            other => anyhow::bail!("unknown store backend '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Reject every new bet regardless of per-game settings
    pub games_frozen: bool,
    pub crash_defaults: GameSettings,
    pub chicken_defaults: GameSettings,
    pub chicken_curve: ChickenCurve,
    pub crash_growth_per_ms: f64,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_wagers: u32,
    pub window_ms: u64,
    pub max_tracked_keys: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_ms: u64,
    pub max_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u64,
    pub reset_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    pub embedded: bool,
    pub betting_window_ms: i64,
    pub tick_ms: u64,
    pub cooldown_ms: i64,
    pub round_timeout_ms: i64,
}

fn env_or<T>(key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("invalid value for {}: '{}'", key, raw))
}

fn default_settings(game: GameKind) -> GameSettings {
    GameSettings {
        game,
        min_bet: Amount::from_units(DEFAULT_MIN_BET_BX * shared::UNITS_PER_BX),
        max_bet: Amount::from_units(DEFAULT_MAX_BET_BX * shared::UNITS_PER_BX),
        house_edge_bps: DEFAULT_HOUSE_EDGE_BPS,
        enabled: true,
    }
}

fn settings_from_env(game: GameKind) -> anyhow::Result<GameSettings> {
    let prefix = game.as_str().to_ascii_uppercase();
    let defaults = default_settings(game);
    Ok(GameSettings {
        game,
        min_bet: env_or(&format!("{}_MIN_BET", prefix), &defaults.min_bet.to_string())?,
        max_bet: env_or(&format!("{}_MAX_BET", prefix), &defaults.max_bet.to_string())?,
        house_edge_bps: env_or(
            &format!("{}_HOUSE_EDGE_BPS", prefix),
            &defaults.house_edge_bps.to_string(),
        )?,
        enabled: env_or(&format!("{}_ENABLED", prefix), "true")?,
    })
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            games_frozen: false,
            crash_defaults: default_settings(GameKind::Crash),
            chicken_defaults: default_settings(GameKind::Chicken),
            chicken_curve: ChickenCurve::default(),
            crash_growth_per_ms: 0.00006,
            rate_limit: RateLimitConfig {
                max_wagers: DEFAULT_RATE_LIMIT_MAX_WAGERS,
                window_ms: DEFAULT_RATE_LIMIT_WINDOW_MS,
                max_tracked_keys: DEFAULT_RATE_LIMIT_MAX_TRACKED_KEYS,
            },
            retry: RetryConfig {
                max_retries: MAX_CONFLICT_RETRIES,
                base_ms: RETRY_BACKOFF_BASE_MS,
                max_ms: RETRY_BACKOFF_MAX_MS,
            },
            breaker: BreakerConfig {
                failure_threshold: 5,
                reset_timeout_seconds: 30,
            },
        }
    }
}

impl EngineConfig {
    pub fn defaults_for(&self, game: GameKind) -> &GameSettings {
        match game {
            GameKind::Crash => &self.crash_defaults,
            GameKind::Chicken => &self.chicken_defaults,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = ChickenCurve::default();
        let config = EngineConfig {
            games_frozen: env_or("GAME_FREEZE", "false")?,
            crash_defaults: settings_from_env(GameKind::Crash)?,
            chicken_defaults: settings_from_env(GameKind::Chicken)?,
            chicken_curve: ChickenCurve {
                base_risk_bps: env_or("CHICKEN_BASE_RISK_BPS", &defaults.base_risk_bps.to_string())?,
                step_risk_bps: env_or("CHICKEN_STEP_RISK_BPS", &defaults.step_risk_bps.to_string())?,
                max_risk_bps: env_or("CHICKEN_MAX_RISK_BPS", &defaults.max_risk_bps.to_string())?,
                step_multiplier_hundredths: env_or(
                    "CHICKEN_STEP_MULTIPLIER_HUNDREDTHS",
                    &defaults.step_multiplier_hundredths.to_string(),
                )?,
            },
            crash_growth_per_ms: env_or("CRASH_GROWTH_PER_MS", "0.00006")?,
            rate_limit: RateLimitConfig {
                max_wagers: env_or("RATE_LIMIT_MAX_WAGERS", &DEFAULT_RATE_LIMIT_MAX_WAGERS.to_string())?,
                window_ms: env_or("RATE_LIMIT_WINDOW_MS", &DEFAULT_RATE_LIMIT_WINDOW_MS.to_string())?,
                max_tracked_keys: env_or(
                    "RATE_LIMIT_MAX_TRACKED_KEYS",
                    &DEFAULT_RATE_LIMIT_MAX_TRACKED_KEYS.to_string(),
                )?,
            },
            retry: RetryConfig {
                max_retries: env_or("CONFLICT_MAX_RETRIES", &MAX_CONFLICT_RETRIES.to_string())?,
                base_ms: env_or("CONFLICT_BACKOFF_BASE_MS", &RETRY_BACKOFF_BASE_MS.to_string())?,
                max_ms: env_or("CONFLICT_BACKOFF_MAX_MS", &RETRY_BACKOFF_MAX_MS.to_string())?,
            },
            breaker: BreakerConfig {
                failure_threshold: env_or("CIRCUIT_BREAKER_THRESHOLD", "5")?,
                reset_timeout_seconds: env_or("CIRCUIT_BREAKER_TIMEOUT_SECONDS", "30")?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for settings in [&self.crash_defaults, &self.chicken_defaults] {
            anyhow::ensure!(
                !settings.min_bet.is_zero() && settings.min_bet <= settings.max_bet,
                "{} bet limits are inconsistent",
                settings.game
            );
            anyhow::ensure!(
                settings.house_edge_bps < shared::BPS_DENOMINATOR,
                "{} house edge must be below 100%",
                settings.game
            );
        }
        anyhow::ensure!(
            self.chicken_curve.max_risk_bps < shared::BPS_DENOMINATOR,
            "chicken risk cap must be below 100%"
        );
        anyhow::ensure!(
            self.crash_growth_per_ms > 0.0,
            "crash growth rate must be positive"
        );
        anyhow::ensure!(self.rate_limit.window_ms > 0, "rate limit window must be positive");
        Ok(())
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            embedded: false,
            betting_window_ms: 5_000,
            tick_ms: 100,
            cooldown_ms: 3_000,
            round_timeout_ms: 120_000,
        }
    }
}

impl DriverConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(DriverConfig {
            embedded: env_or("DRIVER_EMBEDDED", "false")?,
            betting_window_ms: env_or("BETTING_WINDOW_MS", "5000")?,
            tick_ms: env_or("DRIVER_TICK_MS", "100")?,
            cooldown_ms: env_or("ROUND_COOLDOWN_MS", "3000")?,
            round_timeout_ms: env_or("ROUND_TIMEOUT_MS", "120000")?,
        })
    }
}

impl StoreConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(StoreConfig {
            backend: env_or("STORE_BACKEND", "redis")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        })
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            api_port: env_or("API_PORT", "3001")?,
            metrics_port: env_or("METRICS_PORT", "9090")?,
            admin_token: env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
            store: StoreConfig::from_env()?,
            engine: EngineConfig::from_env()?,
            driver: DriverConfig::from_env()?,
        })
    }
}
