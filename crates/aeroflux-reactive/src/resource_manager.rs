//! Component A: owns the driver, the event loops, and every publication and
//! subscription created through it. §4.A's "publications and subscriptions
//! are pinned to a single event loop for their entire life" is implemented
//! by hashing the channel URI to an event-loop index at creation time.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use aeroflux_core::{ChannelUri, CoreError};
use aeroflux_transport::{Driver, SessionId};
use dashmap::DashMap;
use tracing::{info, warn};

use crate::event_loop::{EventLoop, ResourceId};
use crate::publication::MessagePublication;
use crate::subscription::{ClientSubscription, ServerSubscription};

pub struct ResourceManagerConfig {
    pub driver: Arc<dyn Driver>,
    pub event_loop_count: usize,
    pub dispose_timeout: Duration,
}

impl ResourceManagerConfig {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            event_loop_count: 1,
            dispose_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_event_loop_count(mut self, count: usize) -> Self {
        self.event_loop_count = count.max(1);
        self
    }
}

#[derive(PartialEq, Eq, Hash, Clone)]
struct ResourceKey {
    channel: String,
    stream_id: i32,
}

struct PublicationEntry {
    publication: MessagePublication,
    event_loop: Arc<EventLoop>,
    resource_id: ResourceId,
}

struct SubscriptionEntry {
    event_loop: Arc<EventLoop>,
    resource_id: ResourceId,
}

pub struct ResourceManager {
    driver: Arc<dyn Driver>,
    loops: Vec<Arc<EventLoop>>,
    publications: DashMap<ResourceKey, PublicationEntry>,
    subscriptions: DashMap<ResourceKey, SubscriptionEntry>,
    dispose_timeout: Duration,
}

impl ResourceManager {
    pub fn start(config: ResourceManagerConfig) -> Arc<Self> {
        let loops = (0..config.event_loop_count)
            .map(|idx| EventLoop::spawn(format!("aeroflux-event-loop-{idx}")))
            .collect();
        info!(event_loops = config.event_loop_count, "resource manager started");
        Arc::new(Self {
            driver: config.driver,
            loops,
            publications: DashMap::new(),
            subscriptions: DashMap::new(),
            dispose_timeout: config.dispose_timeout,
        })
    }

    pub(crate) fn loop_for(&self, channel: &ChannelUri) -> Arc<EventLoop> {
        let mut hasher = DefaultHasher::new();
        channel.to_string().hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.loops.len();
        self.loops[idx].clone()
    }

    /// Idempotent by `(channel, streamId)`: a second call with the same key
    /// returns the already-cached publication.
    pub async fn publication(
        &self,
        channel: &ChannelUri,
        stream_id: i32,
        queue_capacity: usize,
        connect_timeout: Duration,
        publication_timeout: Duration,
        backpressure_timeout: Duration,
        fairness_batch: usize,
    ) -> Result<MessagePublication, CoreError> {
        let key = ResourceKey {
            channel: channel.to_string(),
            stream_id,
        };
        if let Some(existing) = self.publications.get(&key) {
            return Ok(existing.publication.clone());
        }

        let driver_publication = self.driver.add_publication(channel, stream_id)?;
        let publication = MessagePublication::new(
            driver_publication,
            queue_capacity,
            connect_timeout,
            publication_timeout,
            backpressure_timeout,
            fairness_batch,
        );
        let event_loop = self.loop_for(channel);
        let resource_id = event_loop.add(Arc::new(publication.clone()));
        self.publications.insert(
            key,
            PublicationEntry {
                publication: publication.clone(),
                event_loop,
                resource_id,
            },
        );
        Ok(publication)
    }

    /// Drops the cache entry for a publication and unpins it from its event
    /// loop -- used once a `Connection` has already disposed it directly.
    pub fn forget_publication(&self, channel: &ChannelUri, stream_id: i32) {
        if let Some((_, entry)) = self.publications.remove(&ResourceKey {
            channel: channel.to_string(),
            stream_id,
        }) {
            entry.event_loop.remove(entry.resource_id);
        }
    }

    pub fn new_client_subscription(
        &self,
        channel: &ChannelUri,
        stream_id: i32,
        fragment_limit: usize,
        on_available: aeroflux_transport::ImageAvailableHandler,
        on_unavailable: aeroflux_transport::ImageUnavailableHandler,
    ) -> Result<Arc<ClientSubscription>, CoreError> {
        let driver_subscription = self.driver.add_subscription(channel, stream_id, on_available, on_unavailable)?;
        let subscription = ClientSubscription::new(driver_subscription, fragment_limit);
        let event_loop = self.loop_for(channel);
        let resource_id = event_loop.add(subscription.clone());
        self.subscriptions.insert(
            ResourceKey {
                channel: channel.to_string(),
                stream_id,
            },
            SubscriptionEntry { event_loop, resource_id },
        );
        Ok(subscription)
    }

    pub fn new_server_subscription(
        &self,
        channel: &ChannelUri,
        stream_id: i32,
        fragment_limit: usize,
        on_available: aeroflux_transport::ImageAvailableHandler,
        on_unavailable: aeroflux_transport::ImageUnavailableHandler,
        on_slow_consumer: aeroflux_transport::ImageUnavailableHandler,
    ) -> Result<Arc<ServerSubscription>, CoreError> {
        let driver_subscription = self.driver.add_subscription(channel, stream_id, on_available, on_unavailable)?;
        let subscription = ServerSubscription::new(driver_subscription, fragment_limit, on_slow_consumer);
        let event_loop = self.loop_for(channel);
        let resource_id = event_loop.add(subscription.clone());
        self.subscriptions.insert(
            ResourceKey {
                channel: channel.to_string(),
                stream_id,
            },
            SubscriptionEntry { event_loop, resource_id },
        );
        Ok(subscription)
    }

    /// Unpins a subscription from its event loop -- used once its owner
    /// (e.g. `ServerHandler::dispose`) has already closed the driver side.
    pub fn forget_subscription(&self, channel: &ChannelUri, stream_id: i32) {
        if let Some((_, entry)) = self.subscriptions.remove(&ResourceKey {
            channel: channel.to_string(),
            stream_id,
        }) {
            entry.event_loop.remove(entry.resource_id);
        }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Stops accepting new work, disposes and unpins every cached
    /// publication and subscription, then joins every event-loop thread with
    /// a bounded timeout. Unpinning everything first is what lets each
    /// loop's resource set reach empty so its thread can actually exit.
    pub async fn dispose(&self) {
        for entry in self.publications.iter() {
            entry.value().publication.dispose();
            entry.value().event_loop.remove(entry.value().resource_id);
        }
        self.publications.clear();

        for entry in self.subscriptions.iter() {
            entry.value().event_loop.remove(entry.value().resource_id);
        }
        self.subscriptions.clear();

        self.driver.close();

        let loops = self.loops.clone();
        let joined = tokio::task::spawn_blocking(move || {
            for event_loop in loops {
                event_loop.stop_and_join();
            }
        });
        if tokio::time::timeout(self.dispose_timeout, joined).await.is_err() {
            warn!("event loops did not terminate within dispose_timeout");
        }
    }
}

pub fn reverse_channel(template: &ChannelUri, session_id: SessionId) -> ChannelUri {
    template.with_session_id(session_id.value())
}
