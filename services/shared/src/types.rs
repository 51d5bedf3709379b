/// Type-safe wrappers for domain primitives
///
/// These types prevent common errors by enforcing validation at construction time
/// and providing checked arithmetic operations.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::constants::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Amount overflow in operation")]
    AmountOverflow,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Multiplier out of range: {hundredths} (min: {min}, max: {max})")]
    MultiplierOutOfRange { hundredths: u32, min: u32, max: u32 },

    #[error("Unknown game: {0}")]
    UnknownGame(String),

    #[error("Unknown asset: {0}")]
    UnknownAsset(String),
}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $inner:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            pub fn get(&self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<$inner>().map(Self)
            }
        }
    };
}

numeric_id!(
    /// Verified user identifier supplied by the authenticating transport
    UserId,
    i64
);
numeric_id!(
    /// Crash bet identifier
    BetId,
    u64
);
numeric_id!(
    /// Chicken session identifier
    SessionId,
    u64
);
numeric_id!(
    /// Crash round identifier, also the round's fairness nonce
    RoundId,
    u64
);
numeric_id!(
    /// Committed server seed identifier
    SeedId,
    u64
);

/// Fixed-point BX quantity (6 decimal places) with overflow protection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Create from raw minor units
    pub fn from_units(units: u64) -> Self {
        Self(units)
    }

    /// Create from a whole number of BX
    pub fn from_bx(bx: u64) -> Result<Self, ValidationError> {
        bx.checked_mul(UNITS_PER_BX)
            .map(Self)
            .ok_or(ValidationError::AmountOverflow)
    }

    pub fn units(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Signed representation used by balance postings
    pub fn to_signed(&self) -> Result<i64, ValidationError> {
        i64::try_from(self.0).map_err(|_| ValidationError::AmountOverflow)
    }

    pub fn checked_add(&self, other: Amount) -> Result<Self, ValidationError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(ValidationError::AmountOverflow)
    }

    pub fn checked_sub(&self, other: Amount) -> Result<Self, ValidationError> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(ValidationError::AmountOverflow)
    }

    /// Apply a multiplier, rounding down to the nearest minor unit
    pub fn times(&self, multiplier: Multiplier) -> Result<Self, ValidationError> {
        let scaled = (self.0 as u128) * (multiplier.hundredths() as u128) / (MULTIPLIER_SCALE as u128);
        u64::try_from(scaled)
            .map(Self)
            .map_err(|_| ValidationError::AmountOverflow)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / UNITS_PER_BX;
        let frac = self.0 % UNITS_PER_BX;
        if frac == 0 {
            return write!(f, "{}", whole);
        }
        let digits = format!("{:06}", frac);
        write!(f, "{}.{}", whole, digits.trim_end_matches('0'))
    }
}

impl FromStr for Amount {
    type Err = ValidationError;

    /// Parse a decimal BX string such as `17.5`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidAmount(s.to_string());
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() || frac.len() > 6 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        let frac_units: u64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<6}", frac).parse().map_err(|_| invalid())?
        };
        Self::from_bx(whole)?.checked_add(Self(frac_units))
    }
}

/// Payout multiplier in hundredths (350 == 3.50x)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Multiplier(u32);

impl Multiplier {
    pub const ONE: Multiplier = Multiplier(MULTIPLIER_SCALE);

    pub fn from_hundredths(hundredths: u32) -> Self {
        Self(hundredths)
    }

    /// Validated cash-out target: at least 1.01x, at most the engine ceiling
    pub fn cashout_target(hundredths: u32) -> Result<Self, ValidationError> {
        if !(MIN_CRASH_POINT_HUNDREDTHS..=MAX_MULTIPLIER_HUNDREDTHS).contains(&hundredths) {
            return Err(ValidationError::MultiplierOutOfRange {
                hundredths,
                min: MIN_CRASH_POINT_HUNDREDTHS,
                max: MAX_MULTIPLIER_HUNDREDTHS,
            });
        }
        Ok(Self(hundredths))
    }

    pub fn hundredths(&self) -> u32 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / MULTIPLIER_SCALE as f64
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}x", self.0 / MULTIPLIER_SCALE, self.0 % MULTIPLIER_SCALE)
    }
}

/// Ledger asset. Games are staked in BX; the other assets only move
/// through deposit and withdrawal flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Asset {
    Bx,
    Usdt,
    Ton,
}

impl Asset {
    pub const ALL: [Asset; 3] = [Asset::Bx, Asset::Usdt, Asset::Ton];

    pub fn as_str(&self) -> &'static str {
        match self {
            Asset::Bx => "bx",
            Asset::Usdt => "usdt",
            Asset::Ton => "ton",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Asset {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bx" => Ok(Asset::Bx),
            "usdt" => Ok(Asset::Usdt),
            "ton" => Ok(Asset::Ton),
            _ => Err(ValidationError::UnknownAsset(s.to_string())),
        }
    }
}

/// Closed set of game families the engine can settle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Crash,
    Chicken,
}

impl GameKind {
    pub const ALL: [GameKind; 2] = [GameKind::Crash, GameKind::Chicken];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameKind::Crash => "crash",
            GameKind::Chicken => "chicken",
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "crash" => Ok(GameKind::Crash),
            "chicken" => Ok(GameKind::Chicken),
            _ => Err(ValidationError::UnknownGame(s.to_string())),
        }
    }
}

/// Ledger account: a user wallet or the house pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountId {
    User(UserId),
    House,
}

impl AccountId {
    /// Stable storage key for the account
    pub fn key(&self) -> String {
        match self {
            AccountId::User(id) => format!("user:{}", id),
            AccountId::House => "house".to_string(),
        }
    }

    /// Only user balances are held non-negative; the house carries the
    /// operator's liability and may go below zero.
    pub fn must_stay_non_negative(&self) -> bool {
        matches!(self, AccountId::User(_))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_parse_and_display() {
        let amount: Amount = "17.5".parse().unwrap();
        assert_eq!(amount.units(), 17_500_000);
        assert_eq!(amount.to_string(), "17.5");
        assert_eq!(Amount::from_bx(120).unwrap().to_string(), "120");
        assert!("1.1234567".parse::<Amount>().is_err());
        assert!(".5".parse::<Amount>().is_err());
        assert!("abc".parse::<Amount>().is_err());
    }

    #[test]
    fn test_amount_times_multiplier_rounds_down() {
        let stake = Amount::from_bx(20).unwrap();
        assert_eq!(stake.times(Multiplier::from_hundredths(200)).unwrap(), Amount::from_bx(40).unwrap());

        let odd = Amount::from_units(3);
        assert_eq!(odd.times(Multiplier::from_hundredths(150)).unwrap(), Amount::from_units(4));
    }

    #[test]
    fn test_amount_checked_arithmetic() {
        let max = Amount::from_units(u64::MAX);
        assert!(max.checked_add(Amount::from_units(1)).is_err());
        assert!(Amount::ZERO.checked_sub(Amount::from_units(1)).is_err());
        assert!(max.to_signed().is_err());
    }

    #[test]
    fn test_cashout_target_bounds() {
        assert!(Multiplier::cashout_target(100).is_err());
        assert!(Multiplier::cashout_target(101).is_ok());
        assert_eq!(Multiplier::from_hundredths(350).to_string(), "3.50x");
    }

    #[test]
    fn test_game_kind_parsing() {
        assert_eq!("Crash".parse::<GameKind>().unwrap(), GameKind::Crash);
        assert_eq!("chicken".parse::<GameKind>().unwrap(), GameKind::Chicken);
        assert!("dice".parse::<GameKind>().is_err());
    }

    #[test]
    fn test_account_keys() {
        assert_eq!(AccountId::User(UserId(7)).key(), "user:7");
        assert_eq!(AccountId::House.key(), "house");
        assert!(!AccountId::House.must_stay_non_negative());
    }
}
