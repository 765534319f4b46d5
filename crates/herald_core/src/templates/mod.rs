//! # Template Resolution
//!
//! Turns a [`ResolvedContext`](crate::types::ResolvedContext) plus a
//! [`TemplateCatalog`] into exactly one [`Resolution`]. No I/O, no clock, no
//! randomness: the same inputs always produce the same text on every process.

mod catalog;
mod placeholder;
mod resolver;

pub use catalog::TemplateCatalog;
pub use placeholder::{Part, Placeholder, PlaceholderValues, Template};
pub use resolver::{resolve, resolve_welcome, selected_key, Resolution, FALLBACK_JOIN, FALLBACK_LEAVE};

/// Well-known template keys. Override keys `K` are looked up as `K.join` /
/// `K.leave` first, then `K` for joins.
pub mod keys {
    pub const JOIN: &str = "join";
    pub const LEAVE: &str = "leave";
    pub const FIRST_JOIN: &str = "first-join";
    pub const SWITCH: &str = "switch";
    pub const RETURNING: &str = "returning";
    pub const LEAVE_KICK: &str = "leave-kick";
    pub const LEAVE_NETWORK: &str = "leave-network";
    pub const WELCOME_FIRST: &str = "welcome-first";
    pub const WELCOME_RETURNING: &str = "welcome-returning";
}
