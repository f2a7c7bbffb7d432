//! Built-in, statically linked plugins.
//!
//! The suite's real device handlers live in their own crates; these are
//! the ones the dispatcher ships with. Each is registered by name in
//! `register.rs` when enabled in `[plugins].enabled`.

pub(crate) mod fanout;
pub(crate) mod handlers;
pub(crate) mod history;
pub(crate) mod inventory;
