//! Realtime WebSocket transport.
//!
//! One task per connection multiplexes the socket and the connection's outbound
//! channel. The offline backlog is written before the channel is polled, so
//! queued events always precede live ones. Events the socket never took are
//! handed back to the gateway on close. Every inbound frame gets exactly one
//! reply frame (acknowledgement or `error`), except `status_update` when the
//! sender is part of the broadcast audience and receives the broadcast copy.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc, watch};
use tracing::{debug, info, warn, Instrument};
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::AuthIdentity;
use domain::models::emergency_alert::CreateAlertRequest;
use domain::models::events::{
    AlertReceipt, LocationReceipt, RaiseAlertPayload, RoomPayload, StatusUpdatePayload,
    UserStatusChange,
};
use domain::models::{
    ConnectionId, GroupKey, Identity, InboundEvent, OutboundEvent, Presence, Role,
};
use domain::services::{Audience, Delivery, NotificationGateway, RaiseAlert, Unsent};

const MAX_STATUS_LEN: usize = 64;

/// GET /api/v1/realtime
///
/// Authentication already happened in `require_auth`, so a rejected token never
/// reaches the upgrade.
pub async fn realtime_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
) -> Response {
    ws.on_upgrade(move |socket| run_session(state, identity, socket))
}

async fn run_session(state: AppState, identity: Identity, socket: WebSocket) {
    let connection_id = ConnectionId::new();
    let span = tracing::info_span!(
        "realtime",
        connection_id = %connection_id,
        identity_id = %identity.id,
    );

    async move {
        let (tx, mut rx) = mpsc::channel(state.config.realtime.outbound_buffer);
        let connected = state.gateway.connect(connection_id, identity.clone(), tx);
        metrics::counter!("realtime_connections_total").increment(1);
        info!(
            role = %identity.role,
            presence = ?connected.presence,
            backlog = connected.backlog.len(),
            "Realtime session opened"
        );

        let (mut sink, mut stream) = socket.split();
        let mut unsent = Unsent {
            backlog: write_backlog(&mut sink, connected.backlog).await,
            live: Vec::new(),
        };
        let mut open = unsent.backlog.is_empty();

        while open {
            tokio::select! {
                outbound = rx.recv() => match outbound {
                    Some(event) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            unsent.live.push(event);
                            open = false;
                        }
                    }
                    None => open = false,
                },
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) =
                            handle_inbound(&state, &identity, connection_id, &text).await
                        {
                            open = send_event(&mut sink, &reply).await.is_ok();
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let reply = OutboundEvent::error(
                            "unsupported_frame",
                            "Binary frames are not supported",
                        );
                        open = send_event(&mut sink, &reply).await.is_ok();
                    }
                    Some(Ok(Message::Close(_))) | None => open = false,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "Realtime socket error");
                        open = false;
                    }
                },
            }
        }

        unsent.live.extend(close_channel(&mut rx));
        let presence = state.gateway.disconnect(&connection_id, identity.id, unsent);
        info!(presence = ?presence, "Realtime session closed");
    }
    .instrument(span)
    .await
}

/// Writes the offline backlog in order. Returns the entries that were not
/// written, starting with the one whose write failed.
async fn write_backlog<S>(sink: &mut S, backlog: Vec<OutboundEvent>) -> Vec<OutboundEvent>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut pending = backlog.into_iter();
    while let Some(event) = pending.next() {
        if send_event(sink, &event).await.is_err() {
            return std::iter::once(event).chain(pending).collect();
        }
    }
    Vec::new()
}

/// Closes the outbound channel and returns what was still buffered in it.
/// Later sends fail, so the gateway queues them instead.
fn close_channel(rx: &mut mpsc::Receiver<OutboundEvent>) -> Vec<OutboundEvent> {
    rx.close();
    let mut buffered = Vec::new();
    while let Ok(event) = rx.try_recv() {
        buffered.push(event);
    }
    buffered
}

async fn send_event<S>(sink: &mut S, event: &OutboundEvent) -> Result<(), ()>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!(event = event.name(), error = %e, "Failed to serialize realtime event");
            return Ok(());
        }
    };
    sink.send(Message::Text(text)).await.map_err(|e| {
        debug!(error = %e, "Realtime send failed");
    })
}

/// Handles one inbound text frame and returns the reply for the sender.
pub async fn handle_inbound(
    state: &AppState,
    identity: &Identity,
    connection_id: ConnectionId,
    text: &str,
) -> Option<OutboundEvent> {
    let event: InboundEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Rejected malformed realtime frame");
            return Some(OutboundEvent::error(
                "invalid_event",
                format!("Malformed event: {}", e),
            ));
        }
    };

    let name = event.name();
    metrics::counter!("realtime_events_received_total", "event" => name).increment(1);
    match dispatch(state, identity, connection_id, event).await {
        Ok(reply) => reply,
        Err(e) => {
            debug!(event = name, error = %e, "Realtime event rejected");
            Some(OutboundEvent::error(e.code(), e.public_message()))
        }
    }
}

async fn dispatch(
    state: &AppState,
    identity: &Identity,
    connection_id: ConnectionId,
    event: InboundEvent,
) -> Result<Option<OutboundEvent>, ApiError> {
    let reply = match event {
        InboundEvent::LocationUpdate(payload) => {
            let person = identity.require_tracked_person()?;
            let outcome = state
                .pipeline
                .ingest(payload.into_sample(person, Utc::now()))
                .await?;
            OutboundEvent::LocationUpdateReceived(LocationReceipt {
                violations: outcome.violations.len(),
            })
        }
        InboundEvent::EmergencyAlert(payload) => raise_alert(state, identity, payload).await?,
        InboundEvent::JoinRoom(payload) => {
            let room = GroupKey::room(&payload.room_id)?;
            state.gateway.registry().join_room(&connection_id, room)?;
            OutboundEvent::RoomJoined(payload)
        }
        InboundEvent::LeaveRoom(payload) => {
            let room = GroupKey::room(&payload.room_id)?;
            state.gateway.registry().leave_room(&connection_id, &room)?;
            OutboundEvent::RoomLeft(RoomPayload {
                room_id: payload.room_id,
            })
        }
        InboundEvent::StatusUpdate(payload) => {
            return update_status(&state.gateway, identity, payload).await;
        }
        InboundEvent::Ping => OutboundEvent::Pong,
    };
    Ok(Some(reply))
}

async fn raise_alert(
    state: &AppState,
    identity: &Identity,
    payload: RaiseAlertPayload,
) -> Result<OutboundEvent, ApiError> {
    let person = identity.require_tracked_person()?;
    let request = CreateAlertRequest {
        category: payload.category,
        tracked_person_id: Some(person),
        location: payload.location,
        description: payload.description,
    };
    request.validate()?;

    let alert = state
        .alerts
        .create(
            RaiseAlert {
                category: request.category,
                tracked_person_id: person,
                location: request.location,
                description: request.description,
            },
            Some(identity.id),
        )
        .await?;
    Ok(OutboundEvent::EmergencyAlertSent(AlertReceipt {
        alert_id: alert.id,
        escalation_level: alert.escalation_level,
    }))
}

/// Who hears about an identity's status: its tenant, or supervisors and admins
/// when it has none.
fn status_audience(identity: &Identity) -> (Audience, bool) {
    match identity.tenant_id {
        Some(tenant_id) => (Audience::groups([GroupKey::Tenant(tenant_id)]), true),
        None => (
            Audience::roles(&[Role::Supervisor, Role::Admin]),
            identity.role.manages_alerts(),
        ),
    }
}

async fn update_status(
    gateway: &NotificationGateway,
    identity: &Identity,
    payload: StatusUpdatePayload,
) -> Result<Option<OutboundEvent>, ApiError> {
    let status = payload.status.trim();
    if status.is_empty() || status.len() > MAX_STATUS_LEN {
        return Err(ApiError::Validation(format!(
            "status must be 1-{} characters",
            MAX_STATUS_LEN
        )));
    }

    let event = OutboundEvent::UserStatusChange(UserStatusChange {
        identity_id: identity.id,
        display_name: identity.display_name.clone(),
        status: status.to_string(),
        metadata: payload.metadata,
        at: Utc::now(),
    });
    let (audience, sender_included) = status_audience(identity);
    gateway
        .notify(audience, event.clone(), Delivery::LiveOnly)
        .await;

    Ok((!sender_included).then_some(event))
}

/// Broadcasts `online`/`offline` status changes until shutdown is signalled.
pub async fn relay_presence(
    gateway: Arc<NotificationGateway>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut changes = gateway.registry().subscribe_presence();
    info!("Presence relay started");

    loop {
        tokio::select! {
            received = changes.recv() => match received {
                Ok(change) => {
                    let status = match change.presence {
                        Presence::CameOnline => "online",
                        Presence::WentOffline => "offline",
                        Presence::AlreadyOnline | Presence::StillOnline => continue,
                    };
                    let (audience, _) = status_audience(&change.identity);
                    let event = OutboundEvent::UserStatusChange(UserStatusChange {
                        identity_id: change.identity.id,
                        display_name: change.identity.display_name.clone(),
                        status: status.to_string(),
                        metadata: None,
                        at: change.at,
                    });
                    gateway.notify(audience, event, Delivery::LiveOnly).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Presence relay lagged, changes skipped");
                }
                Err(RecvError::Closed) => break,
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    info!("Presence relay stopped");
}
