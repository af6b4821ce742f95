use std::fmt;

/// Driver-assigned 32-bit identifier of a publication's logical stream. Used
/// as the rendezvous token binding the outbound and inbound halves of one
/// logical connection. Uniqueness holds only within a driver instance and
/// within the image-liveness window -- collisions are possible (see
/// `SESSION_COLLISION` in the error table) and must be handled by callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(i32);

impl SessionId {
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for SessionId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}
