// Common test utilities and fixtures for integration tests
#![allow(dead_code)]

use engine::{
    clock::ManualClock,
    config::{Config, DriverConfig, EngineConfig, StoreBackend, StoreConfig},
    fairness::{crash_point, derive, extend_seed_chain, round_seed_chain, ChickenCurve, FixedSeedSource},
    repository::{MemoryStore, Store},
    settlement::SettlementCoordinator,
    state::AppState,
};
use shared::{Amount, Asset, RoundId, UserId};
use std::sync::Arc;

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const START_MS: i64 = 1_700_000_000_000;

/// A coordinator over a fresh in-memory store with a manual clock
pub struct TestContext {
    pub coordinator: Arc<SettlementCoordinator>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub config: Config,
}

impl TestContext {
    pub fn new(seeds: Vec<String>) -> Self {
        Self::with_engine(EngineConfig::default(), seeds)
    }

    pub fn with_engine(engine: EngineConfig, seeds: Vec<String>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at_epoch_ms(START_MS));
        let coordinator = SettlementCoordinator::new(store.clone(), &engine)
            .with_clock(clock.clone())
            .with_seed_source(Box::new(FixedSeedSource::new(seeds)));
        let config = Config {
            api_port: 0,
            metrics_port: 0,
            admin_token: Some(ADMIN_TOKEN.to_string()),
            store: StoreConfig {
                backend: StoreBackend::Memory,
                redis_url: String::new(),
            },
            engine,
            driver: DriverConfig::default(),
        };
        Self {
            coordinator: Arc::new(coordinator),
            store,
            clock,
            config,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.config.clone(), self.coordinator.clone())
    }

    pub async fn fund(&self, user: i64, bx_amount: u64) {
        self.coordinator
            .ledger()
            .deposit(UserId(user), Asset::Bx, bx(bx_amount), &format!("fund-{}", user))
            .await
            .expect("Failed to fund user");
    }

    pub async fn balance(&self, user: i64) -> Amount {
        self.coordinator
            .balance(UserId(user), Asset::Bx)
            .await
            .expect("Failed to read balance")
    }

    /// Every transfer is double-entry against the house
    pub async fn assert_conserved(&self) {
        for asset in Asset::ALL {
            assert_eq!(self.store.total_balance(asset).await.unwrap(), 0, "{} not conserved", asset);
        }
    }
}

pub fn bx(amount: u64) -> Amount {
    Amount::from_bx(amount).unwrap()
}

/// Server seed that makes `round_id` crash inside `[min, max]` hundredths
/// once the given client seeds have been accepted, in order
pub fn crash_seed(round_id: u64, client_seeds: &[&str], min: u32, max: u32) -> String {
    let chain = client_seeds
        .iter()
        .fold(round_seed_chain(RoundId(round_id)), |chain, seed| extend_seed_chain(&chain, seed));
    (0..)
        .map(|i| format!("server-{}", i))
        .find(|seed| (min..=max).contains(&crash_point(&derive(seed, &chain, round_id), 300).hundredths()))
        .unwrap()
}

/// Client seed under which the first `steps` chicken steps survive
pub fn surviving_client_seed(server_seed: &str, steps: u32) -> String {
    let curve = ChickenCurve::default();
    (0..)
        .map(|i| format!("client-{}", i))
        .find(|c| (0..steps).all(|step| curve.survives(server_seed, c, step)))
        .unwrap()
}
