//! The user-visible send half of a [`crate::connection::Connection`].
//!
//! §3 describes Outbound as accepting a lazy sequence of buffers and
//! producing one completion. Each buffer maps onto one
//! [`MessagePublication::enqueue`] call, so a handler drives it the same
//! way it would drive any other async sink: `for buf in buffers { outbound.send(buf).await?; }`.

use aeroflux_core::CoreError;
use bytes::Bytes;

use crate::publication::MessagePublication;

#[derive(Clone)]
pub struct Outbound {
    publication: MessagePublication,
}

impl Outbound {
    pub(crate) fn new(publication: MessagePublication) -> Self {
        Self { publication }
    }

    /// Enqueues one buffer and resolves once the driver has accepted it (or
    /// the item failed -- see §4.B's result-code table).
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<(), CoreError> {
        self.publication.enqueue(payload.into()).await
    }

    /// Sends every item of an iterator in order, stopping at the first
    /// failure.
    pub async fn send_all<I>(&self, payloads: I) -> Result<(), CoreError>
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        for payload in payloads {
            self.send(payload).await?;
        }
        Ok(())
    }
}
