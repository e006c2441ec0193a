//! Platform lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the display hardware resource.
///
/// The discriminants match the values the Nexus server reports, which is
/// why `Failure` is zero. Ordering by discriminant carries no meaning:
/// `Failure` is reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PlatformState {
    /// The hardware reported an unrecoverable error, or the resource was released.
    Failure = 0,

    /// Resource allocated, server not yet started.
    #[default]
    Uninitialized = 1,

    /// Server start-up in progress.
    Initializing = 2,

    /// Clients may attach and resolution may change.
    Operational = 3,

    /// Tear-down in progress.
    Deinitializing = 4,
}

impl PlatformState {
    /// Returns the display label for this state.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Failure => "failure",
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Operational => "operational",
            Self::Deinitializing => "deinitializing",
        }
    }

    /// Returns true if clients may attach and detach in this state.
    #[must_use]
    pub fn accepts_clients(&self) -> bool {
        matches!(self, Self::Operational)
    }

    /// Returns the numeric code the hardware uses for this state.
    #[must_use]
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for PlatformState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_uninitialized() {
        assert_eq!(PlatformState::default(), PlatformState::Uninitialized);
    }

    #[test]
    fn test_codes_match_server_values() {
        assert_eq!(PlatformState::Failure.code(), 0);
        assert_eq!(PlatformState::Uninitialized.code(), 1);
        assert_eq!(PlatformState::Initializing.code(), 2);
        assert_eq!(PlatformState::Operational.code(), 3);
        assert_eq!(PlatformState::Deinitializing.code(), 4);
    }

    #[test]
    fn test_only_operational_accepts_clients() {
        assert!(PlatformState::Operational.accepts_clients());
        assert!(!PlatformState::Initializing.accepts_clients());
        assert!(!PlatformState::Deinitializing.accepts_clients());
        assert!(!PlatformState::Failure.accepts_clients());
        assert!(!PlatformState::Uninitialized.accepts_clients());
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&PlatformState::Operational).unwrap();
        assert_eq!(json, "\"operational\"");
        assert_eq!(PlatformState::Deinitializing.to_string(), "deinitializing");
    }
}
