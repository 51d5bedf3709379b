pub mod admin;
pub mod balances;
pub mod bets;
pub mod chicken;
pub mod health;
pub mod metrics;
pub mod rounds;
