//! Value resolution and settings binding.
//!
//! The [`Binder`] walks a [`crate::tree::CommandTree`] from root to leaf,
//! converts matched and derived values into a [`CommandValueLookup`] and
//! finally builds the leaf command's settings instance from it.

mod binder;
mod construct;
mod lookup;

pub use binder::{Binder, BoundSettings};
pub use lookup::CommandValueLookup;
