use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

/// Stable error kinds shared across the connector, event loop and transport
/// driver. These map 1:1 onto the error table in the design notes (NOT_CONNECTED,
/// TIMEOUT, BACKPRESSURED, ...).
///
/// # Why
/// Every layer below the user handler needs to decide, from the error alone,
/// whether a single item failed (the connection stays alive) or the whole
/// connection must be disposed. Centralizing the taxonomy here keeps that
/// decision table in one place instead of re-derived from string codes at
/// each call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// `ensureConnected` exceeded `connectTimeout`.
    NotConnected,
    /// An item waited longer than `publicationTimeout`/`backpressureTimeout`.
    Timeout,
    /// The send queue is full and the caller opted out of blocking.
    Backpressured,
    /// A per-session inbound buffer overflowed; only that session is disposed.
    SlowConsumer,
    /// The transport reported the image gone (image-unavailable).
    ImageLost,
    /// A new image's session id collided with one already tracked.
    SessionCollision,
    /// The publication is closed, exceeded max position, or a handler panicked.
    Fatal,
    /// The user-supplied handler's outbound stream errored or completed unexpectedly.
    HandlerError,
    /// The connection (or resource manager) was disposed while the operation was pending.
    Cancelled,
    /// Anything that doesn't fit the above, usually a driver/IO failure.
    Other,
}

impl ErrorKind {
    /// Whether an error of this kind should take the owning connection down,
    /// as opposed to only failing the single pending item.
    pub fn is_connection_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::ImageLost
                | ErrorKind::Fatal
                | ErrorKind::HandlerError
                | ErrorKind::SlowConsumer
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Backpressured => "backpressured",
            ErrorKind::SlowConsumer => "slow_consumer",
            ErrorKind::ImageLost => "image_lost",
            ErrorKind::SessionCollision => "session_collision",
            ErrorKind::Fatal => "fatal",
            ErrorKind::HandlerError => "handler_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Other => "other",
        };
        f.write_str(label)
    }
}

/// The crate-wide error type. Carries a stable [`ErrorKind`], a human message
/// and an optional cause, following the `code + message + cause` shape used
/// throughout the corpus this project grew out of.
#[derive(Debug)]
pub struct CoreError {
    kind: ErrorKind,
    message: Cow<'static, str>,
    cause: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn not_connected(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::NotConnected, message)
    }

    pub fn timeout(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn backpressured(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Backpressured, message)
    }

    pub fn cancelled(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn fatal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for CoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::WouldBlock => ErrorKind::Backpressured,
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            std::io::ErrorKind::NotConnected | std::io::ErrorKind::ConnectionRefused => {
                ErrorKind::NotConnected
            }
            _ => ErrorKind::Other,
        };
        CoreError::new(kind, err.to_string()).with_cause(err)
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
