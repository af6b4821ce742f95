//! Tunable knobs shared by the connector, the publication send loop and the
//! server handler. Defaults mirror the design notes' §4.H table.

use std::time::Duration;

#[derive(Clone, Copy, Debug)]
pub struct ConnectorOptions {
    pub connect_timeout: Duration,
    pub publication_timeout: Duration,
    pub backpressure_timeout: Duration,
    pub image_liveness_timeout: Duration,
    pub send_queue_capacity: usize,
    pub fragment_limit: usize,
    pub mtu_length: usize,
    /// How many times `ensureConnected` retries publication creation on a
    /// session-id collision before surfacing `NOT_CONNECTED`. Not specified
    /// by the source material; left configurable per the open question in
    /// the design notes.
    pub session_collision_retries: u32,
    /// Maximum number of send-queue items served per event-loop tick, so
    /// several publications pinned to one loop all make progress.
    pub fairness_batch: usize,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            publication_timeout: Duration::from_secs(5),
            backpressure_timeout: Duration::from_secs(5),
            image_liveness_timeout: Duration::from_secs(10),
            send_queue_capacity: 128,
            fragment_limit: 8,
            mtu_length: 1408,
            session_collision_retries: 3,
            fairness_batch: 8,
        }
    }
}

impl ConnectorOptions {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.backpressure_timeout = timeout;
        self
    }

    pub fn with_image_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.image_liveness_timeout = timeout;
        self
    }

    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity;
        self
    }

    pub fn with_fragment_limit(mut self, limit: usize) -> Self {
        self.fragment_limit = limit;
        self
    }

    pub fn with_mtu_length(mut self, mtu: usize) -> Self {
        self.mtu_length = mtu;
        self
    }
}

/// Stream id defaults from §6: `serverStreamId` = 1, `clientStreamId` = 1001.
pub const DEFAULT_SERVER_STREAM_ID: i32 = 1;
pub const DEFAULT_CLIENT_STREAM_ID: i32 = 1001;
