//! # Tongs
//!
//! Umbrella crate of the Tongs workspace. Re-exports the address arithmetic of
//! [`tongs_core`] at the top level and the trigger protocol as [`trigger`].

pub use tongs_core::*;
pub use tongs_trigger as trigger;
