//! Utility functions and types used throughout cachechat.
//!
//! - Constants for memory and protocol geometry ([`PAGE_SIZE`], [`CL_SIZE`], etc.)
//! - Progress reporting utilities ([`NamedProgress`])
//! - Seeded random number generation ([`Rng`])

mod constants;
mod named_progress;
mod rng;

pub use self::constants::*;
pub use self::named_progress::NamedProgress;
pub use self::rng::Rng;
