//! Connection state of a device session.

use serde::{Deserialize, Serialize};

/// Lifecycle of the link to one sensor device.
///
/// ```text
/// Disconnected ──connect──► Connected ──start_reading──► Reading
///      ▲                       │  ▲                          │
///      └──────disconnect───────┘  └───────window ends────────┘
/// ```
///
/// A window that hits end-of-stream drops straight from `Reading` to
/// `Disconnected`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    /// An acquisition window holds the read lock
    Reading,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Reading => write!(f, "Reading"),
        }
    }
}
