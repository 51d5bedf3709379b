//! Game state machines
//!
//! Each machine is a set of pure transitions over stored rows. They decide
//! what happens; the settlement coordinator commits the result together
//! with the matching ledger effect.

pub mod chicken;
pub mod crash;

pub use chicken::{ChickenMachine, StepResult};
pub use crash::{CashoutDecision, CrashCurve, CrashMachine};
