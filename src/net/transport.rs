//! WebTransport server implementation
//!
//! One task per connection runs the session gateway. Reliable messages are
//! read from the first bidirectional stream by a reader task; inputs may
//! also arrive as datagrams. A writer task owns the send half and merges
//! direct replies, the arena's control queue and the latest snapshot.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::game::command_buffer::{ArenaCommand, CommandBufferError, CommandSender, JoinCommand};
use crate::game::state::SessionId;
use crate::lobby::RoomManager;
use crate::metrics::Metrics;
use crate::net::dos_protection::{DoSConfig, DoSProtection};
use crate::net::framing::{decode_datagram, read_message, write_message};
use crate::net::game_session::{OutboxReceivers, SessionOutbox};
use crate::net::gateway::{GatewayAction, JoinError, JoinRequest, SessionGateway};
use crate::net::protocol::{ClientMessage, ServerMessage};
use crate::net::session::{SessionRegistry, UserKey};
use crate::net::tls::TlsConfig;

/// Time the arena has to answer a join
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);
/// Time the writer gets to flush a final message
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);
/// Interval of ban expiry and idle room cleanup
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);
/// Decoded reliable messages waiting for the connection task
const INBOUND_QUEUE_SIZE: usize = 64;

/// State shared by every connection task
#[derive(Clone)]
pub struct ServerContext {
    pub rooms: Arc<RwLock<RoomManager>>,
    pub registry: Arc<Mutex<SessionRegistry>>,
    pub dos: Arc<RwLock<DoSProtection>>,
    pub metrics: Arc<Metrics>,
    pub max_violations: u32,
}

/// WebTransport server
pub struct WebTransportServer {
    config: ServerConfig,
    tls_config: TlsConfig,
    ctx: ServerContext,
}

impl WebTransportServer {
    pub async fn new(
        config: ServerConfig,
        rooms: Arc<RwLock<RoomManager>>,
        registry: Arc<Mutex<SessionRegistry>>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let tls_config =
            TlsConfig::load(config.tls_cert_path.as_deref(), config.tls_key_path.as_deref()).await?;
        let dos_config = DoSConfig::load_or_default();
        let max_violations = dos_config.violations_before_ban;

        Ok(Self {
            config,
            tls_config,
            ctx: ServerContext {
                rooms,
                registry,
                dos: Arc::new(RwLock::new(DoSProtection::new(dos_config))),
                metrics,
                max_violations,
            },
        })
    }

    /// Certificate hash for client configuration
    pub fn cert_hash(&self) -> &str {
        self.tls_config.cert_hash()
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind_address, self.config.port)
    }

    /// Run the server
    pub async fn run(self) -> anyhow::Result<()> {
        use wtransport::Endpoint;

        // with_bind_default binds dual-stack (IPv4 + IPv6)
        let server_config = wtransport::ServerConfig::builder()
            .with_bind_default(self.config.port)
            .with_identity(self.tls_config.identity)
            .build();

        let server = Endpoint::server(server_config)?;
        info!("WebTransport server listening on port {}", self.config.port);

        start_maintenance(self.ctx.clone());

        loop {
            let incoming = server.accept().await;
            let ctx = self.ctx.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, ctx).await {
                    debug!("Connection error: {}", e);
                }
            });
        }
    }
}

/// Expire bans and close idle rooms periodically
fn start_maintenance(ctx: ServerContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let expired = ctx.dos.write().await.cleanup_expired_bans();
            if expired > 0 {
                debug!("Expired {} IP bans", expired);
            }
            ctx.rooms.write().await.prune_empty();
        }
    })
}

/// Handle a single WebTransport connection
async fn handle_connection(
    incoming: wtransport::endpoint::IncomingSession,
    ctx: ServerContext,
) -> anyhow::Result<()> {
    let session_request = incoming.await?;
    let client_ip = session_request.remote_address().ip();

    let connection_id = {
        let mut dos = ctx.dos.write().await;
        match dos.register_connection(client_ip) {
            Ok(id) => id,
            Err(e) => {
                warn!("Connection from {} rejected: {}", client_ip, e);
                return Err(anyhow::anyhow!("Connection rejected: {}", e));
            }
        }
    };

    debug!(
        "New connection from {} path {} (conn_id: {})",
        client_ip,
        session_request.path(),
        connection_id
    );

    let result = match session_request.accept().await {
        Ok(connection) => {
            ctx.metrics.connections_active.fetch_add(1, Ordering::Relaxed);
            let result = serve_connection(&connection, connection_id, &ctx).await;
            ctx.metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
            result
        }
        Err(e) => Err(e.into()),
    };

    ctx.dos.write().await.unregister_connection(connection_id);
    debug!("Connection closed (conn_id: {})", connection_id);
    result
}

/// Outcome of the per-message DoS check
enum Admission {
    Accept,
    Drop,
    Disconnect,
}

#[cfg(feature = "dos_ratelimit")]
async fn admit(ctx: &ServerContext, connection_id: u64, size: usize) -> Admission {
    let mut dos = ctx.dos.write().await;
    match dos.check_message(connection_id, size) {
        Ok(()) => Admission::Accept,
        Err(e) if e.is_fatal() => {
            warn!("Disconnecting conn_id {}: {}", connection_id, e);
            Admission::Disconnect
        }
        Err(e) => {
            debug!("Dropped message from conn_id {}: {}", connection_id, e);
            Admission::Drop
        }
    }
}

#[cfg(not(feature = "dos_ratelimit"))]
async fn admit(_ctx: &ServerContext, _connection_id: u64, _size: usize) -> Admission {
    Admission::Accept
}

/// Messages from the reliable stream reader
enum Inbound {
    Message(ClientMessage, usize),
    Malformed(String),
}

/// Instructions for the writer task
#[derive(Debug)]
enum WriterEvent {
    Send(ServerMessage),
    Attach(OutboxReceivers, Arc<Notify>),
}

/// Per-connection state once a join succeeded
struct Joined {
    session_id: SessionId,
    room_id: String,
    user: UserKey,
    commands: CommandSender,
}

async fn serve_connection(
    connection: &wtransport::Connection,
    connection_id: u64,
    ctx: &ServerContext,
) -> anyhow::Result<()> {
    let (send, recv) = connection.accept_bi().await?;

    let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_QUEUE_SIZE);
    let reader = tokio::spawn(read_loop(recv, inbound_tx));

    let (writer_tx, writer_rx) = mpsc::unbounded_channel();
    let mut writer = tokio::spawn(write_loop(send, writer_rx, ctx.metrics.clone()));

    let mut gateway = SessionGateway::new(ctx.max_violations);
    let mut joined: Option<Joined> = None;
    let mut writer_done = false;

    loop {
        let message = tokio::select! {
            inbound = inbound_rx.recv() => match inbound {
                Some(Inbound::Message(message, size)) => {
                    ctx.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                    ctx.metrics.bytes_received.fetch_add(size as u64, Ordering::Relaxed);
                    match admit(ctx, connection_id, size).await {
                        Admission::Accept => message,
                        Admission::Drop => continue,
                        Admission::Disconnect => break,
                    }
                }
                Some(Inbound::Malformed(reason)) => {
                    debug!("Malformed message on conn_id {}: {}", connection_id, reason);
                    ctx.metrics.protocol_violations.fetch_add(1, Ordering::Relaxed);
                    if ctx.dos.write().await.record_violation(connection_id).is_err() {
                        break;
                    }
                    continue;
                }
                None => break,
            },
            datagram = connection.receive_datagram() => match datagram {
                Ok(data) => {
                    ctx.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                    ctx.metrics.bytes_received.fetch_add(data.len() as u64, Ordering::Relaxed);
                    match admit(ctx, connection_id, data.len()).await {
                        Admission::Accept => {}
                        Admission::Drop => continue,
                        Admission::Disconnect => break,
                    }
                    // Only inputs are accepted unreliably
                    match decode_datagram::<ClientMessage>(&data) {
                        Ok(message @ ClientMessage::Input { .. }) => message,
                        Ok(_) => continue,
                        Err(e) => {
                            debug!("Failed to decode datagram: {}", e);
                            continue;
                        }
                    }
                }
                Err(e) => {
                    debug!("Datagram receive error: {}", e);
                    break;
                }
            },
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        };

        let violations = gateway.violations();
        let action = gateway.handle(message);
        if gateway.violations() > violations {
            ctx.metrics.protocol_violations.fetch_add(1, Ordering::Relaxed);
        }

        match action {
            GatewayAction::Join(request) => {
                match join_arena(ctx, request, &writer_tx).await {
                    Ok(session) => {
                        gateway.on_join_accepted(session.session_id, session.room_id.clone());
                        joined = Some(session);
                    }
                    Err(e) => {
                        debug!("Join failed on conn_id {}: {}", connection_id, e);
                        ctx.metrics.joins_rejected_total.fetch_add(1, Ordering::Relaxed);
                        gateway.on_join_rejected();
                        let _ = writer_tx.send(WriterEvent::Send(ServerMessage::JoinRejected {
                            reason: e.to_string(),
                        }));
                    }
                }
            }
            GatewayAction::Forward(command) => {
                let Some(session) = joined.as_ref() else {
                    continue;
                };
                match session.commands.try_send(command) {
                    Ok(()) => {}
                    Err(CommandBufferError::Full) => {
                        ctx.metrics.commands_dropped.fetch_add(1, Ordering::Relaxed);
                        warn!("Command buffer full, dropped command from {}", session.session_id);
                    }
                    Err(CommandBufferError::Disconnected) => {
                        warn!("Arena stopped under session {}", session.session_id);
                        break;
                    }
                }
            }
            GatewayAction::Reply(message) => {
                let _ = writer_tx.send(WriterEvent::Send(message));
            }
            GatewayAction::Leave => break,
            GatewayAction::Ignore => {}
            GatewayAction::Close(reason) => {
                warn!("Closing conn_id {}: {}", connection_id, reason);
                let _ = writer_tx.send(WriterEvent::Send(ServerMessage::Kicked { reason }));
                break;
            }
        }
    }

    if let Some(session) = joined {
        let _ = session.commands.try_send(ArenaCommand::Leave {
            session_id: session.session_id,
        });
        ctx.registry.lock().unregister(&session.user, session.session_id);
        debug!("Session {} detached", session.session_id);
    }

    drop(writer_tx);
    if !writer_done && tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
    reader.abort();
    Ok(())
}

/// Hand a validated join to the room's arena and register the session
async fn join_arena(
    ctx: &ServerContext,
    request: JoinRequest,
    writer_tx: &mpsc::UnboundedSender<WriterEvent>,
) -> Result<Joined, JoinError> {
    let commands = {
        let mut rooms = ctx.rooms.write().await;
        rooms
            .get_or_create(&request.room_id)
            .map(|room| room.commands())
            .map_err(|e| {
                warn!("No arena for room {}: {}", request.room_id, e);
                JoinError::RoomLimit
            })?
    };

    let session_id = Uuid::new_v4();
    let (outbox, receivers) = SessionOutbox::new();
    let (reply_tx, reply_rx) = oneshot::channel();
    commands
        .try_send(ArenaCommand::Join(JoinCommand {
            session_id,
            name: request.display_name.clone(),
            cosmetic: request.cosmetic,
            user_id: request.user_id.clone(),
            outbox,
            reply: reply_tx,
        }))
        .map_err(|_| JoinError::ArenaFull)?;

    let ticket = match tokio::time::timeout(JOIN_TIMEOUT, reply_rx).await {
        Ok(Ok(result)) => result?,
        _ => return Err(JoinError::RoomLimit),
    };

    let user = UserKey::new(request.user_id.as_deref(), session_id);
    let registration = ctx.registry.lock().register(
        user.clone(),
        session_id,
        request.room_id.clone(),
    );

    if let Some(old) = registration.evicted {
        info!(
            "{:?} joined again, evicting session {}",
            user.user_id(),
            old.session_id
        );
        if let Ok(old_commands) = ctx.rooms.read().await.sender_for(&old.room_id) {
            let _ = old_commands.try_send(ArenaCommand::Leave {
                session_id: old.session_id,
            });
        }
    }

    let _ = writer_tx.send(WriterEvent::Send(ServerMessage::JoinAccepted {
        session_id,
        session_token: registration.token.to_vec(),
        room_id: request.room_id.clone(),
        zone: ticket.zone,
    }));
    let _ = writer_tx.send(WriterEvent::Attach(receivers, registration.evict));

    Ok(Joined {
        session_id,
        room_id: request.room_id,
        user,
        commands,
    })
}

/// Decode framed messages from the reliable stream
async fn read_loop<R: AsyncRead + Unpin>(mut recv: R, inbound: mpsc::Sender<Inbound>) {
    loop {
        let item = match read_message::<_, ClientMessage>(&mut recv).await {
            Ok((message, size)) => Inbound::Message(message, size),
            Err(e) if e.is_recoverable() => Inbound::Malformed(e.to_string()),
            Err(e) => {
                debug!("Stream closed: {}", e);
                break;
            }
        };
        if inbound.send(item).await.is_err() {
            break;
        }
    }
}

enum WriterStep {
    Send(ServerMessage),
    Attach(OutboxReceivers, Arc<Notify>),
    /// The arena dropped this session's outbox
    Detach,
    Evicted,
    Stop,
}

/// Messages after which the connection ends
fn is_terminal(message: &ServerMessage) -> bool {
    matches!(
        message,
        ServerMessage::CashOutComplete { .. } | ServerMessage::Kicked { .. }
    )
}

/// Write replies, control messages and the latest snapshot until the
/// connection ends. Returns after a terminal message.
async fn write_loop<W: AsyncWrite + Unpin>(
    mut send: W,
    mut events: mpsc::UnboundedReceiver<WriterEvent>,
    metrics: Arc<Metrics>,
) {
    let mut attached: Option<(OutboxReceivers, Arc<Notify>)> = None;

    loop {
        let step = match attached.as_mut() {
            Some((outbox, evict)) => tokio::select! {
                biased;
                _ = evict.notified() => WriterStep::Evicted,
                event = events.recv() => match event {
                    Some(WriterEvent::Send(message)) => WriterStep::Send(message),
                    Some(WriterEvent::Attach(rx, evict)) => WriterStep::Attach(rx, evict),
                    None => WriterStep::Stop,
                },
                control = outbox.control.recv() => match control {
                    Some(message) => WriterStep::Send(message),
                    None => WriterStep::Detach,
                },
                changed = outbox.snapshots.changed() => match changed {
                    Ok(()) => match outbox.snapshots.borrow_and_update().clone() {
                        Some(snapshot) => WriterStep::Send(ServerMessage::StateSnapshot((*snapshot).clone())),
                        None => continue,
                    },
                    Err(_) => WriterStep::Detach,
                },
            },
            None => match events.recv().await {
                Some(WriterEvent::Send(message)) => WriterStep::Send(message),
                Some(WriterEvent::Attach(rx, evict)) => WriterStep::Attach(rx, evict),
                None => WriterStep::Stop,
            },
        };

        let outgoing = match step {
            WriterStep::Send(message) => vec![message],
            WriterStep::Attach(rx, evict) => {
                attached = Some((rx, evict));
                continue;
            }
            WriterStep::Detach => {
                // Deliver whatever the arena queued before letting go
                let mut pending = Vec::new();
                if let Some((mut outbox, _)) = attached.take() {
                    while let Ok(message) = outbox.control.try_recv() {
                        pending.push(message);
                    }
                }
                if !pending.iter().any(is_terminal) {
                    pending.push(ServerMessage::Kicked {
                        reason: "arena stopped".to_string(),
                    });
                }
                pending
            }
            WriterStep::Evicted => vec![ServerMessage::Kicked {
                reason: "signed in from another connection".to_string(),
            }],
            WriterStep::Stop => break,
        };

        for message in outgoing {
            match write_message(&mut send, &message).await {
                Ok(size) => {
                    metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
                    metrics.bytes_sent.fetch_add(size as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Failed to send message: {}", e);
                    return;
                }
            }
            if is_terminal(&message) {
                return;
            }
        }
    }
}
