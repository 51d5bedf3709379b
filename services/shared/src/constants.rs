/// Shared constants for the wagering engine
///
/// This module centralizes the numeric domains and default tuning values
/// so the API service and the round driver agree on them.

/// Minor units per whole BX (6 decimal places)
pub const UNITS_PER_BX: u64 = 1_000_000;

/// Denominator for every basis-point quantity (house edge, risk)
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Multipliers are stored in hundredths: 100 == 1.00x
pub const MULTIPLIER_SCALE: u32 = 100;

/// Lowest crash point a round can resolve at (1.01x)
///
/// Also the lowest cash-out target a player may request. A round that
/// resolves here pays nobody.
pub const MIN_CRASH_POINT_HUNDREDTHS: u32 = 101;

/// Highest multiplier the engine will ever settle at (1,000,000x)
pub const MAX_MULTIPLIER_HUNDREDTHS: u32 = 100_000_000;

/// Default house edge (3%)
pub const DEFAULT_HOUSE_EDGE_BPS: u32 = 300;

/// Default stake bounds in whole BX
pub const DEFAULT_MIN_BET_BX: u64 = 1;
pub const DEFAULT_MAX_BET_BX: u64 = 10_000;

/// Chicken risk curve: base + step * increment, capped below certainty
pub const DEFAULT_CHICKEN_BASE_RISK_BPS: u32 = 1_500;
pub const DEFAULT_CHICKEN_STEP_RISK_BPS: u32 = 500;
pub const DEFAULT_CHICKEN_MAX_RISK_BPS: u32 = 9_500;

/// Chicken payout grows by this many hundredths per survived step (0.25x)
pub const DEFAULT_CHICKEN_STEP_MULTIPLIER_HUNDREDTHS: u32 = 25;

/// Maximum client seed length accepted at bet placement
pub const MAX_CLIENT_SEED_LENGTH: usize = 64;

/// Maximum idempotency key length
pub const MAX_REQUEST_ID_LENGTH: usize = 128;

/// Default wager rate limit: 30 wagers per rolling 10 seconds per user
pub const DEFAULT_RATE_LIMIT_MAX_WAGERS: u32 = 30;
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 10_000;

/// Upper bound on users tracked by the in-process rate limiter
pub const DEFAULT_RATE_LIMIT_MAX_TRACKED_KEYS: usize = 100_000;

/// Maximum retry attempts for conflicting transactions
pub const MAX_CONFLICT_RETRIES: u32 = 5;

/// Base backoff delay in milliseconds for conflict retries
pub const RETRY_BACKOFF_BASE_MS: u64 = 5;

/// Maximum backoff delay in milliseconds for conflict retries
pub const RETRY_BACKOFF_MAX_MS: u64 = 200;
