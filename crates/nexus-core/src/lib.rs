//! Nexus Core - Shared types for the display platform manager
//!
//! This crate provides the domain types shared between the platform
//! manager (nexusd) and the binary that hosts it.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod client;
pub mod config;
pub mod error;
pub mod resolution;
pub mod state;

// Re-exports for convenience
pub use client::{
    ClientMode, ClientName, ClientSession, ClientSettings, ClientView, ConnectionHandle,
    JoinSettings, Opacity, Rectangle, ZOrder,
};
pub use config::{PlatformConfig, SvpMode, DEFAULT_DRIVER_TIMEOUT_MS, DEFAULT_MAX_CLIENTS};
pub use error::{DomainError, DomainResult};
pub use resolution::ScreenResolution;
pub use state::PlatformState;
