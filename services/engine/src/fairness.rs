//! Commit/reveal fairness
//!
//! A server seed is committed by publishing `sha256(server_seed)` before any
//! bet can depend on it. Outcomes are derived from
//! `sha256("{server_seed}:{client_seed}:{nonce}")` and mapped to game results
//! with integer-only transforms, so anyone holding the revealed seed can
//! recompute them bit for bit.

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use shared::{
    Multiplier, RoundId, SeedId, BPS_DENOMINATOR, DEFAULT_CHICKEN_BASE_RISK_BPS,
    DEFAULT_CHICKEN_MAX_RISK_BPS, DEFAULT_CHICKEN_STEP_MULTIPLIER_HUNDREDTHS,
    DEFAULT_CHICKEN_STEP_RISK_BPS, MAX_MULTIPLIER_HUNDREDTHS, MIN_CRASH_POINT_HUNDREDTHS,
    MULTIPLIER_SCALE,
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use crate::domain::{RoundReveal, SeedPair};

const CRASH_PRECISION_BITS: u32 = 52;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FairnessError {
    #[error("server seed does not match published hash {published}")]
    CommitmentMismatch { published: String },

    #[error("recomputed outcome {actual} differs from recorded {expected}")]
    OutcomeMismatch { expected: String, actual: String },

    #[error("seed {0} has not been revealed")]
    NotRevealed(SeedId),
}

/// Produces fresh server seeds
pub trait SeedSource: Send + Sync {
    fn next_seed(&self) -> String;
}

/// 32 bytes from the operating system RNG, hex encoded
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSeedSource;

impl SeedSource for OsSeedSource {
    fn next_seed(&self) -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

/// Hands out a scripted list of seeds, then deterministic `fixed-{n}` seeds
#[derive(Debug, Default)]
pub struct FixedSeedSource {
    queue: Mutex<VecDeque<String>>,
    issued: Mutex<u64>,
}

impl FixedSeedSource {
    pub fn new<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: Mutex::new(seeds.into_iter().map(Into::into).collect()),
            issued: Mutex::new(0),
        }
    }

    pub fn push(&self, seed: impl Into<String>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(seed.into());
        }
    }
}

impl SeedSource for FixedSeedSource {
    fn next_seed(&self) -> String {
        let scripted = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        if let Some(seed) = scripted {
            return seed;
        }
        let mut issued = match self.issued.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *issued += 1;
        format!("fixed-{}", *issued)
    }
}

/// 32-byte derived outcome
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Outcome([u8; 32]);

impl Outcome {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn leading_u64(&self) -> u64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(head)
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Outcome({})", self.to_hex())
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

pub fn hash_seed(server_seed: &str) -> String {
    hex::encode(Sha256::digest(server_seed.as_bytes()))
}

/// Deterministic outcome for (server seed, client seed, nonce)
pub fn derive(server_seed: &str, client_seed: &str, nonce: u64) -> Outcome {
    let input = format!("{}:{}:{}", server_seed, client_seed, nonce);
    Outcome(Sha256::digest(input.as_bytes()).into())
}

pub fn verify_commitment(server_seed: &str, published_hash: &str) -> bool {
    hash_seed(server_seed).eq_ignore_ascii_case(published_hash)
}

/// Map an outcome to a crash point with the given house edge.
///
/// `floor(100 * (1 - e) * 2^52 / (2^52 - h))` where `h` is the top 52 bits,
/// clamped to `[1.01x, MAX]`.
pub fn crash_point(outcome: &Outcome, house_edge_bps: u32) -> Multiplier {
    let h = (outcome.leading_u64() >> (64 - CRASH_PRECISION_BITS)) as u128;
    let range = 1u128 << CRASH_PRECISION_BITS;
    let edge = house_edge_bps.min(BPS_DENOMINATOR - 1) as u128;

    let numerator = MULTIPLIER_SCALE as u128 * (BPS_DENOMINATOR as u128 - edge) * range;
    let denominator = BPS_DENOMINATOR as u128 * (range - h);
    let raw = numerator / denominator;

    let clamped = raw.clamp(
        MIN_CRASH_POINT_HUNDREDTHS as u128,
        MAX_MULTIPLIER_HUNDREDTHS as u128,
    );
    Multiplier::from_hundredths(clamped as u32)
}

/// Uniform roll in `[0, 10_000)` basis points
pub fn roll_bps(outcome: &Outcome) -> u32 {
    ((outcome.leading_u64() as u128 * BPS_DENOMINATOR as u128) >> 64) as u32
}

/// Chicken risk and payout curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChickenCurve {
    pub base_risk_bps: u32,
    pub step_risk_bps: u32,
    pub max_risk_bps: u32,
    pub step_multiplier_hundredths: u32,
}

impl Default for ChickenCurve {
    fn default() -> Self {
        Self {
            base_risk_bps: DEFAULT_CHICKEN_BASE_RISK_BPS,
            step_risk_bps: DEFAULT_CHICKEN_STEP_RISK_BPS,
            max_risk_bps: DEFAULT_CHICKEN_MAX_RISK_BPS,
            step_multiplier_hundredths: DEFAULT_CHICKEN_STEP_MULTIPLIER_HUNDREDTHS,
        }
    }
}

impl ChickenCurve {
    /// Death probability of the step about to be taken when `completed` steps are behind
    pub fn risk_bps(&self, completed: u32) -> u32 {
        let cap = self.max_risk_bps.min(BPS_DENOMINATOR - 1);
        self.step_risk_bps
            .saturating_mul(completed)
            .saturating_add(self.base_risk_bps)
            .min(cap)
    }

    /// Cash-out multiplier after `completed` successful steps
    pub fn payout_multiplier(&self, completed: u32) -> Multiplier {
        let bonus = self.step_multiplier_hundredths.saturating_mul(completed);
        let hundredths = MULTIPLIER_SCALE
            .saturating_add(bonus)
            .min(MAX_MULTIPLIER_HUNDREDTHS);
        Multiplier::from_hundredths(hundredths)
    }

    /// Whether the step with nonce `completed` survives
    pub fn survives(&self, server_seed: &str, client_seed: &str, completed: u32) -> bool {
        let outcome = derive(server_seed, client_seed, completed as u64);
        roll_bps(&outcome) >= self.risk_bps(completed)
    }
}

/// Seed chain start for a round
pub fn round_seed_chain(round_id: RoundId) -> String {
    hash_seed(&format!("round:{}", round_id))
}

/// Fold one bet's client seed into the round's chain
pub fn extend_seed_chain(chain: &str, client_seed: &str) -> String {
    hash_seed(&format!("{}:{}", chain, client_seed))
}

/// Recompute a revealed round and check it against its published commitment
pub fn verify_round(reveal: &RoundReveal) -> Result<(), FairnessError> {
    if !verify_commitment(&reveal.server_seed, &reveal.server_seed_hash) {
        return Err(FairnessError::CommitmentMismatch {
            published: reveal.server_seed_hash.clone(),
        });
    }
    let outcome = derive(&reveal.server_seed, &reveal.client_seed, reveal.nonce);
    let recomputed = crash_point(&outcome, reveal.house_edge_bps);
    if recomputed != reveal.crash_point {
        return Err(FairnessError::OutcomeMismatch {
            expected: reveal.crash_point.to_string(),
            actual: recomputed.to_string(),
        });
    }
    Ok(())
}

/// Issues committed seed pairs
pub struct FairnessGenerator {
    source: Box<dyn SeedSource>,
}

impl FairnessGenerator {
    pub fn new(source: Box<dyn SeedSource>) -> Self {
        Self { source }
    }

    pub fn commit(&self, seed_id: SeedId, at: DateTime<Utc>) -> SeedPair {
        let server_seed = self.source.next_seed();
        let server_seed_hash = hash_seed(&server_seed);
        SeedPair {
            seed_id,
            server_seed,
            server_seed_hash,
            created_at: at,
            revealed_at: None,
        }
    }
}

impl Default for FairnessGenerator {
    fn default() -> Self {
        Self::new(Box::new(OsSeedSource))
    }
}

impl SeedPair {
    pub fn is_revealed(&self) -> bool {
        self.revealed_at.is_some()
    }

    /// Mark revealed; returns the updated pair
    pub fn reveal(&self, at: DateTime<Utc>) -> SeedPair {
        let mut revealed = self.clone();
        revealed.revealed_at.get_or_insert(at);
        revealed
    }

    /// The server seed, only once revealed
    pub fn revealed_seed(&self) -> Result<&str, FairnessError> {
        if self.is_revealed() {
            Ok(&self.server_seed)
        } else {
            Err(FairnessError::NotRevealed(self.seed_id))
        }
    }
}
