#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// Error parsing a WebSocket message
    MessageParse(serde_json::Error),
    /// `connect` was called while a connection attempt is already in flight
    AlreadyConnecting,
    /// Every candidate endpoint failed its open handshake
    HandshakeFailed {
        /// One entry per dialed endpoint, in dial order
        attempts: Vec<String>,
    },
    /// The connect attempt was interrupted by `disconnect`
    Cancelled,
    /// The endpoint descriptor could not be turned into a URL
    InvalidEndpoint(String),
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::MessageParse(e) => write!(f, "Failed to parse WebSocket message: {e}"),
            Self::AlreadyConnecting => write!(f, "A connection attempt is already in progress"),
            Self::HandshakeFailed { attempts } => {
                write!(f, "WebSocket handshake failed: {}", attempts.join("; "))
            }
            Self::Cancelled => write!(f, "Connection attempt cancelled by disconnect"),
            Self::InvalidEndpoint(reason) => write!(f, "Invalid endpoint: {reason}"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::MessageParse(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}
