//! Vision library implementations
//!
//! - Burn backend (pure Rust CNN trained on the CPU with `burn`'s learner)

#[cfg(feature = "burn-backend")]
pub mod burn;

#[cfg(feature = "burn-backend")]
pub use self::burn::{BurnLibrary, BurnModel, ClassifierConfig};
