//! Work package lifecycle.
//!
//! Lane rules live on [`crate::core::Lane`]; this module adds ownership,
//! review, and persistence on top of them.

mod lifecycle;

pub use lifecycle::{Claim, LifecycleEngine};
