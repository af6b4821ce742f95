//! Back-pressure vocabulary shared by `MessagePublication` and the
//! transport driver's `offer` calls.

/// Outcome of a single non-blocking `offer` against the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfferResult {
    /// Accepted at the given stream position.
    Accepted(i64),
    BackPressured,
    AdminAction,
    NotConnected,
    MaxPositionExceeded,
    Closed,
}

impl OfferResult {
    pub fn is_transient(self) -> bool {
        matches!(self, OfferResult::BackPressured | OfferResult::AdminAction)
    }

    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            OfferResult::MaxPositionExceeded | OfferResult::Closed
        )
    }
}
