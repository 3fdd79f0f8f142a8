//! Common infrastructure for mock hardware.
//!
//! - **mode**: Operational modes (Instant, Realistic, Chaos)
//! - **timing**: Board-like timing configuration
//! - **errors**: Error injection framework
//! - **rng**: Seeded random number generator

pub mod errors;
pub mod mode;
pub mod rng;
pub mod timing;

pub use errors::{ops, ErrorConfig, ErrorScenario};
pub use mode::MockMode;
pub use rng::MockRng;
pub use timing::TimingConfig;
