//! Client session entities and value objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Display name of a client, unique among the active clients.
///
/// The name comes from the client's join settings and is used as the
/// registry key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientName(String);

impl ClientName {
    /// Creates a new client name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the name is empty or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ClientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ClientName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque hardware connection handle for a client.
///
/// Zero is the null handle and never identifies a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// The null handle.
    pub const NULL: ConnectionHandle = ConnectionHandle(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Returns true for any non-null handle.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ============================================================================
// Display Attributes
// ============================================================================

/// Client opacity, 0 (transparent) to 255 (opaque).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Opacity(u8);

impl Opacity {
    pub const TRANSPARENT: Opacity = Opacity(0);
    pub const OPAQUE: Opacity = Opacity(u8::MAX);

    pub fn new(value: u8) -> Self {
        Self(value)
    }

    /// Creates an opacity from a wider value, saturating at 255.
    pub fn saturating(value: u32) -> Self {
        Self(u8::try_from(value).unwrap_or(u8::MAX))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Opacity {
    fn default() -> Self {
        Self::OPAQUE
    }
}

/// Stacking rank of a client surface. Higher values are drawn on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZOrder(u8);

impl ZOrder {
    pub fn new(rank: u8) -> Self {
        Self(rank)
    }

    pub fn rank(&self) -> u8 {
        self.0
    }
}

/// Position and size of a client surface on the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rectangle {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A rectangle of the given size anchored at the origin.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Returns true if the rectangle covers no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

// ============================================================================
// Join / Client Settings
// ============================================================================

/// Trust level a client requests when joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMode {
    #[default]
    Untrusted,
    Protected,
    Trusted,
    Verified,
}

/// Settings a process presents when it joins the display server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JoinSettings {
    /// Display name, unique among active clients
    pub name: ClientName,

    /// Requested trust level
    #[serde(default)]
    pub mode: ClientMode,

    /// Whether the client ignores standby requests
    #[serde(default)]
    pub ignore_standby_request: bool,
}

impl JoinSettings {
    pub fn new(name: impl Into<ClientName>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ClientMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Resources a connecting client asks the server for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Client wants its graphics in secure (SVP) memory
    #[serde(default)]
    pub secure_graphics: bool,

    /// Number of video windows requested
    #[serde(default)]
    pub video_windows: u8,
}

// ============================================================================
// Client Session
// ============================================================================

/// One external application's live attachment to the display hardware.
///
/// Owned exclusively by the client registry. Everything outside the
/// registry sees a [`ClientView`] snapshot instead.
#[derive(Debug, Clone)]
pub struct ClientSession {
    handle: ConnectionHandle,
    join: JoinSettings,
    settings: ClientSettings,
    opacity: Opacity,
    geometry: Rectangle,
    z_order: ZOrder,
    attached_at: DateTime<Utc>,
}

impl ClientSession {
    /// Creates a session for a freshly joined client.
    ///
    /// The surface starts opaque, at the bottom of the stack, covering
    /// `geometry`.
    pub fn new(
        handle: ConnectionHandle,
        join: JoinSettings,
        settings: ClientSettings,
        geometry: Rectangle,
    ) -> Self {
        debug!(client = %join.name, handle = %handle, "Created client session");
        Self {
            handle,
            join,
            settings,
            opacity: Opacity::default(),
            geometry,
            z_order: ZOrder::default(),
            attached_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &ClientName {
        &self.join.name
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    /// Returns true while the hardware connection handle is valid.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn join_settings(&self) -> &JoinSettings {
        &self.join
    }

    pub fn client_settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn opacity(&self) -> Opacity {
        self.opacity
    }

    pub fn geometry(&self) -> Rectangle {
        self.geometry
    }

    pub fn z_order(&self) -> ZOrder {
        self.z_order
    }

    pub fn attached_at(&self) -> DateTime<Utc> {
        self.attached_at
    }

    pub fn set_opacity(&mut self, opacity: Opacity) {
        self.opacity = opacity;
    }

    pub fn set_geometry(&mut self, geometry: Rectangle) {
        self.geometry = geometry;
    }

    pub fn set_z_order(&mut self, z_order: ZOrder) {
        self.z_order = z_order;
    }
}

// ============================================================================
// Client View (read-only snapshot)
// ============================================================================

/// Serializable snapshot of a client session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientView {
    pub name: ClientName,
    pub handle: ConnectionHandle,
    pub mode: ClientMode,
    pub opacity: Opacity,
    pub geometry: Rectangle,
    pub z_order: ZOrder,
    pub attached_at: DateTime<Utc>,
}

impl ClientView {
    /// Creates a snapshot of a session.
    pub fn from_session(session: &ClientSession) -> Self {
        Self {
            name: session.name().clone(),
            handle: session.handle(),
            mode: session.join_settings().mode,
            opacity: session.opacity(),
            geometry: session.geometry(),
            z_order: session.z_order(),
            attached_at: session.attached_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(name: &str, handle: u64) -> ClientSession {
        ClientSession::new(
            ConnectionHandle::new(handle),
            JoinSettings::new(name),
            ClientSettings::default(),
            Rectangle::full(1920, 1080),
        )
    }

    #[test]
    fn test_connection_handle_validity() {
        assert!(!ConnectionHandle::NULL.is_valid());
        assert!(ConnectionHandle::new(7).is_valid());
        assert_eq!(ConnectionHandle::new(255).to_string(), "0xff");
    }

    #[test]
    fn test_client_name_blank() {
        assert!(ClientName::new("").is_blank());
        assert!(ClientName::new("  ").is_blank());
        assert!(!ClientName::new("netflix").is_blank());
    }

    #[test]
    fn test_opacity_saturates() {
        assert_eq!(Opacity::saturating(1000).value(), 255);
        assert_eq!(Opacity::saturating(12).value(), 12);
        assert_eq!(Opacity::default(), Opacity::OPAQUE);
    }

    #[test]
    fn test_new_session_defaults() {
        let s = session("browser", 3);
        assert_eq!(s.name().as_str(), "browser");
        assert!(s.is_active());
        assert_eq!(s.opacity(), Opacity::OPAQUE);
        assert_eq!(s.z_order(), ZOrder::new(0));
        assert_eq!(s.geometry(), Rectangle::full(1920, 1080));
    }

    #[test]
    fn test_session_attribute_updates_show_in_view() {
        let mut s = session("browser", 3);
        s.set_opacity(Opacity::new(128));
        s.set_geometry(Rectangle::new(10, 20, 640, 360));
        s.set_z_order(ZOrder::new(4));

        let view = ClientView::from_session(&s);
        assert_eq!(view.name, ClientName::new("browser"));
        assert_eq!(view.opacity.value(), 128);
        assert_eq!(view.geometry.to_string(), "640x360+10+20");
        assert_eq!(view.z_order.rank(), 4);
    }

    #[test]
    fn test_join_settings_deserialize_defaults() {
        let join: JoinSettings = serde_json::from_str(r#"{"name":"netflix"}"#).unwrap();
        assert_eq!(join.name.as_str(), "netflix");
        assert_eq!(join.mode, ClientMode::Untrusted);
        assert!(!join.ignore_standby_request);
    }

    #[test]
    fn test_rectangle_empty() {
        assert!(Rectangle::new(0, 0, 0, 10).is_empty());
        assert!(!Rectangle::full(1, 1).is_empty());
    }
}
