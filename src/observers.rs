//! Renderers for the current value of a set of guards.
//!
//! Observers work on `&dyn Observable`, so guards of different strategies can
//! be shown side by side without opening a session on any of them.
//!
//! # Feature Flags
//!
//! - `table` - Enables the [`table`] module
//! - `full` - Enables all observer modules

#[cfg(feature = "table")]
pub mod table;
