//! Nexus Daemon - display platform manager
//!
//! This crate owns the display hardware resource and the clients attached
//! to it:
//! - `driver` - Hardware driver boundary, callbacks and a simulated driver
//! - `platform` - Platform actor, client registry and lifecycle state machine
//! - `observer` - State and client observer capabilities
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod driver;
pub mod observer;
pub mod platform;
