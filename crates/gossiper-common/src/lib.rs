//! # Gossiper Common
//!
//! Shared types, errors, and constants used across Gossiper components.
//!
//! ## Modules
//! - `types` - Core data structures (BindAddress, Member, MemberState)
//! - `error` - Common error type
//! - `constants` - Shared defaults and protocol limits

pub mod constants;
pub mod error;
pub mod types;

pub use error::{GossiperError, Result};
pub use types::*;
