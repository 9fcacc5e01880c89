//! Fan-out gateway: the single place that turns "deliver X to audience Y" into
//! live pushes or offline queue entries.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc::error::TrySendError, watch};
use uuid::Uuid;

use super::message_queue::OfflineQueue;
use super::ports::{Audience, Clock, Directory, Envelope, MessageBroker, SystemClock};
use super::resilience::bounded;
use super::session_registry::{OutboundSender, SessionRegistry};
use crate::models::{ConnectionId, Identity, OutboundEvent, Presence};

/// Whether offline recipients should get a queued copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queue for offline recipients, drained when they reconnect.
    Reliable,
    /// Drop for offline recipients.
    LiveOnly,
}

/// Per-identity outcome of a `notify` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Identities reached on at least one live connection.
    pub delivered: usize,
    /// Identities that got a queued copy.
    pub queued: usize,
}

impl DeliveryReport {
    pub fn recipients(&self) -> usize {
        self.delivered + self.queued
    }
}

/// Result of connecting a session.
#[derive(Debug)]
pub struct Connected {
    pub presence: Presence,
    /// Events queued while the identity was offline, oldest first. The transport
    /// must write these before anything it reads from the connection's channel.
    pub backlog: Vec<OutboundEvent>,
}

/// Events a closing connection never wrote to its socket.
#[derive(Debug, Default)]
pub struct Unsent {
    /// Offline backlog entries from `Connected`, oldest first.
    pub backlog: Vec<OutboundEvent>,
    /// Events taken from the connection's channel, oldest first.
    pub live: Vec<OutboundEvent>,
}

pub struct NotificationGateway {
    registry: Arc<SessionRegistry>,
    queue: Arc<OfflineQueue>,
    directory: Option<Arc<dyn Directory>>,
    broker: Option<Arc<dyn MessageBroker>>,
    clock: Arc<dyn Clock>,
    instance_id: Uuid,
    directory_timeout: Duration,
}

impl NotificationGateway {
    pub fn new(registry: Arc<SessionRegistry>, queue: Arc<OfflineQueue>) -> Self {
        Self {
            registry,
            queue,
            directory: None,
            broker: None,
            clock: Arc::new(SystemClock),
            instance_id: Uuid::new_v4(),
            directory_timeout: Duration::from_secs(2),
        }
    }

    /// Resolves offline group members through the directory.
    pub fn with_directory(mut self, directory: Arc<dyn Directory>, timeout: Duration) -> Self {
        self.directory = Some(directory);
        self.directory_timeout = timeout;
        self
    }

    /// Republishes every notification for other instances.
    pub fn with_broker(mut self, broker: Arc<dyn MessageBroker>, instance_id: Uuid) -> Self {
        self.broker = Some(broker);
        self.instance_id = instance_id;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Registers a session and, if this is the identity's first connection,
    /// drains its offline queue.
    ///
    /// The recipient's queue shard stays locked across registration and drain,
    /// so a concurrent `notify` either queued before the drain or sees the
    /// identity online and sends live after it.
    pub fn connect(
        &self,
        connection_id: ConnectionId,
        identity: Identity,
        sender: OutboundSender,
    ) -> Connected {
        let identity_id = identity.id;
        let mut shard = self.queue.lock(identity_id);
        let presence = self.registry.register(connection_id, identity, sender);
        let backlog: Vec<OutboundEvent> = match presence {
            Presence::CameOnline => shard
                .drain(identity_id)
                .into_iter()
                .map(|m| m.event)
                .collect(),
            _ => Vec::new(),
        };
        drop(shard);

        if !backlog.is_empty() {
            tracing::info!(
                identity_id = %identity_id,
                connection_id = %connection_id,
                count = backlog.len(),
                "Draining offline queue"
            );
        }
        Connected { presence, backlog }
    }

    /// Unregisters a session and takes back whatever its transport never wrote.
    ///
    /// The unwritten backlog tail goes to the identity's remaining connections,
    /// or back to the front of its queue when none is left. Durable events
    /// still in the connection's channel are requeued only when the identity
    /// went offline; otherwise its other connections already received them.
    pub fn disconnect(
        &self,
        connection_id: &ConnectionId,
        identity_id: Uuid,
        unsent: Unsent,
    ) -> Option<Presence> {
        let mut shard = self.queue.lock(identity_id);
        let presence = self.registry.unregister(connection_id)?;

        let mut requeue = Vec::new();
        if presence == Presence::WentOffline {
            requeue.extend(unsent.backlog);
            requeue.extend(unsent.live.into_iter().filter(OutboundEvent::is_durable));
        } else {
            let siblings = self.registry.senders_for(identity_id);
            for event in unsent.backlog {
                let reached = siblings
                    .iter()
                    .filter(|(_, sender)| sender.try_send(event.clone()).is_ok())
                    .count()
                    > 0;
                if !reached {
                    requeue.push(event);
                }
            }
        }

        if !requeue.is_empty() {
            tracing::info!(
                identity_id = %identity_id,
                connection_id = %connection_id,
                count = requeue.len(),
                "Requeued events the connection never wrote"
            );
            shard.requeue(identity_id, requeue, self.clock.now());
        }
        Some(presence)
    }

    /// Delivers an event to an audience.
    pub async fn notify(
        &self,
        audience: Audience,
        event: OutboundEvent,
        delivery: Delivery,
    ) -> DeliveryReport {
        let recipients = self.resolve(&audience, delivery).await;
        let report = self.deliver_local(&recipients, &event, delivery);

        metrics::counter!("realtime_events_delivered_total", "event" => event.name())
            .increment(report.delivered as u64);
        metrics::counter!("realtime_events_queued_total", "event" => event.name())
            .increment(report.queued as u64);
        tracing::debug!(
            event = event.name(),
            delivered = report.delivered,
            queued = report.queued,
            "Notification fanned out"
        );

        if let Some(broker) = &self.broker {
            let envelope = Envelope {
                origin_instance: self.instance_id,
                audience,
                event,
            };
            if let Err(e) = broker.publish(envelope).await {
                tracing::warn!(error = %e, "Failed to republish notification on broker");
            }
        }
        report
    }

    /// Delivers an envelope published by another instance to local sessions only.
    /// Envelopes from this instance are ignored.
    pub fn deliver_remote(&self, envelope: &Envelope) -> DeliveryReport {
        if envelope.origin_instance == self.instance_id {
            return DeliveryReport::default();
        }
        let recipients = self.online_recipients(&envelope.audience);
        self.deliver_local(&recipients, &envelope.event, Delivery::LiveOnly)
    }

    /// Relays broker envelopes from other instances until shutdown is signalled.
    pub async fn relay_remote(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let Some(broker) = &self.broker else {
            return;
        };
        let mut rx = broker.subscribe();
        tracing::info!(instance_id = %self.instance_id, "Broker relay started");

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(envelope) => {
                        self.deliver_remote(&envelope);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Broker relay lagged, envelopes skipped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Broker relay stopped");
    }

    fn online_recipients(&self, audience: &Audience) -> HashSet<Uuid> {
        match audience {
            Audience::Identity(id) => HashSet::from([*id]),
            Audience::Groups(groups) => groups
                .iter()
                .flat_map(|g| self.registry.members_of(g))
                .collect(),
        }
    }

    async fn resolve(&self, audience: &Audience, delivery: Delivery) -> HashSet<Uuid> {
        let mut recipients = self.online_recipients(audience);
        let (Audience::Groups(groups), Delivery::Reliable, Some(directory)) =
            (audience, delivery, &self.directory)
        else {
            return recipients;
        };

        // Rooms are live subscriptions with no durable membership.
        for group in groups.iter().filter(|g| !g.is_room()) {
            match bounded(self.directory_timeout, directory.members_of(group)).await {
                Ok(members) => recipients.extend(members),
                Err(e) => tracing::warn!(
                    group = %group,
                    error = %e,
                    "Directory lookup failed, delivering to online members only"
                ),
            }
        }
        recipients
    }

    fn deliver_local(
        &self,
        recipients: &HashSet<Uuid>,
        event: &OutboundEvent,
        delivery: Delivery,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for &recipient in recipients {
            let mut shard = self.queue.lock(recipient);
            let mut reached = false;

            for (connection_id, sender) in self.registry.senders_for(recipient) {
                match sender.try_send(event.clone()) {
                    Ok(()) => reached = true,
                    Err(TrySendError::Full(_)) => tracing::warn!(
                        connection_id = %connection_id,
                        event = event.name(),
                        "Outbound buffer full, event not delivered on connection"
                    ),
                    Err(TrySendError::Closed(_)) => tracing::debug!(
                        connection_id = %connection_id,
                        "Connection closing, event not delivered"
                    ),
                }
            }

            if reached {
                report.delivered += 1;
            } else if delivery == Delivery::Reliable {
                shard.enqueue(recipient, event.clone(), self.clock.now());
                report.queued += 1;
            }
        }
        report
    }
}
