//! Loopback SMTP listener and the per-envelope fan-out

use crate::relay::{Deliver, OutboundDelivery};
use crate::splitter::{self, SubMessage};
use crate::{CoreError, CoreResult};
use async_trait::async_trait;
use mailrelay_smtp::server::{serve_connection, EnvelopeHandler, InboundEnvelope, Reply};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Where to listen and what to call ourselves
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub listen_addr: SocketAddr,
    /// Announced in the greeting and EHLO reply
    pub hostname: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 25)),
            hostname: "localhost".to_string(),
        }
    }
}

/// Lifecycle of an inbound connection, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitEnvelope,
    Received,
    Dispatching,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::AwaitEnvelope => "await-envelope",
            ConnectionState::Received => "received",
            ConnectionState::Dispatching => "dispatching",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Outcome of dispatching one envelope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub failed: usize,
}

/// Send every sub-message of `envelope` to every recipient
///
/// Only a malformed envelope is an error; see [`fan_out`] for the order.
pub async fn dispatch<D>(envelope: &InboundEnvelope, deliver: &D) -> CoreResult<DispatchReport>
where
    D: Deliver + ?Sized,
{
    let sub_messages: Vec<SubMessage> = splitter::split(&envelope.data)?.collect();
    Ok(fan_out(envelope, &sub_messages, deliver).await)
}

/// Deliver `sub_messages` to the recipients of `envelope`
///
/// Recipients are the outer loop and sub-messages the inner one, so each
/// recipient gets the batch in document order. A failed pair is logged and
/// does not stop the others.
pub async fn fan_out<D>(
    envelope: &InboundEnvelope,
    sub_messages: &[SubMessage],
    deliver: &D,
) -> DispatchReport
where
    D: Deliver + ?Sized,
{
    let mut report = DispatchReport::default();

    for recipient in &envelope.rcpt_to {
        for (index, sub) in sub_messages.iter().enumerate() {
            let delivery = OutboundDelivery {
                from: envelope.mail_from.clone(),
                to: recipient.clone(),
                subject: sub.subject.clone(),
                body: sub.body.clone(),
            };

            report.attempted += 1;
            if let Err(e) = deliver.deliver(&delivery).await {
                report.failed += 1;
                match e.delivery_stage() {
                    Some(stage) => error!(
                        "Delivery of part {} to {} failed at {}: {}",
                        index + 1,
                        recipient,
                        stage,
                        e
                    ),
                    None => error!("Delivery of part {} to {} failed: {}", index + 1, recipient, e),
                }
            }
        }
    }

    report
}

/// Per-connection [`EnvelopeHandler`] that relays through a [`Deliver`]
pub struct RelayHandler {
    deliver: Arc<dyn Deliver>,
    peer_address: SocketAddr,
    state: Mutex<ConnectionState>,
}

impl RelayHandler {
    pub fn new(deliver: Arc<dyn Deliver>, peer_address: SocketAddr) -> Self {
        Self {
            deliver,
            peer_address,
            state: Mutex::new(ConnectionState::AwaitEnvelope),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    /// Mark the connection as finished
    pub async fn close(&self) {
        self.transition(ConnectionState::Closed).await;
    }

    async fn transition(&self, next: ConnectionState) {
        let mut state = self.state.lock().await;
        debug!("{}: {} -> {}", self.peer_address, *state, next);
        *state = next;
    }
}

#[async_trait]
impl EnvelopeHandler for RelayHandler {
    async fn handle_envelope(&self, envelope: InboundEnvelope) -> Reply {
        let peer = self.peer_address;
        self.transition(ConnectionState::Received).await;
        info!(
            "Envelope from {} ({:?}) for {} recipient(s), {} bytes",
            peer,
            envelope.mail_from,
            envelope.rcpt_to.len(),
            envelope.data.len()
        );

        let sub_messages: Vec<SubMessage> = match splitter::split(&envelope.data) {
            Ok(parts) => parts.collect(),
            Err(e) => {
                self.transition(ConnectionState::AwaitEnvelope).await;
                return match e {
                    CoreError::MalformedMessage(reason) => {
                        warn!("Rejected envelope from {}: {}", peer, reason);
                        Reply::new(554, format!("Transaction failed: {}", reason))
                    }
                    e => {
                        error!("Dispatch for {} failed: {}", peer, e);
                        Reply::new(451, "Local error in processing")
                    }
                };
            }
        };

        self.transition(ConnectionState::Dispatching).await;
        let report = fan_out(&envelope, &sub_messages, self.deliver.as_ref()).await;
        info!(
            "Dispatched envelope from {}: {} attempted, {} failed",
            peer, report.attempted, report.failed
        );
        self.transition(ConnectionState::AwaitEnvelope).await;

        Reply::new(
            250,
            format!(
                "OK {} deliveries attempted, {} failed",
                report.attempted, report.failed
            ),
        )
    }
}

/// A bound, not yet accepting, inbound listener
pub struct InboundListener {
    listener: TcpListener,
    config: ListenerConfig,
    deliver: Arc<dyn Deliver>,
}

impl InboundListener {
    /// Bind the listening socket
    pub async fn bind(config: ListenerConfig, deliver: Arc<dyn Deliver>) -> CoreResult<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        info!("Listening for SMTP on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            config,
            deliver,
        })
    }

    /// Address actually bound; differs from the config for port 0
    pub fn local_addr(&self) -> CoreResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Start accepting connections in a background task
    pub fn start(self) -> CoreResult<ListenerHandle> {
        let local_addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.serve(shutdown_rx));

        Ok(ListenerHandle {
            local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }

    async fn serve(self, mut shutdown: oneshot::Receiver<()>) {
        let mut sessions = JoinSet::new();
        let (stop_sessions, session_shutdown) = watch::channel(false);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Listener shutting down");
                    break;
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("Session task failed: {}", e);
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("{}: accepted", peer);
                        let handler = RelayHandler::new(Arc::clone(&self.deliver), peer);
                        let hostname = self.config.hostname.clone();
                        let shutdown = session_shutdown.clone();

                        sessions.spawn(async move {
                            if let Err(e) =
                                serve_connection(stream, peer, &hostname, &handler, shutdown).await
                            {
                                warn!("Session with {} ended with error: {}", peer, e);
                            }
                            handler.close().await;
                        });
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
            }
        }

        drop(self.listener);

        // Idle sessions close now; those dispatching finish first
        stop_sessions.send_replace(true);
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!("Session task failed: {}", e);
            }
        }
        info!("Listener stopped");
    }
}

/// Running listener
///
/// Dropping the handle also stops the listener.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close idle sessions and wait for in-flight dispatches
    pub async fn stop(self) -> CoreResult<()> {
        let _ = self.shutdown.send(());
        self.task.await.map_err(std::io::Error::other)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, Vec<u8>)>>,
        fail_first: bool,
    }

    #[async_trait]
    impl Deliver for Recorder {
        async fn deliver(&self, delivery: &OutboundDelivery) -> CoreResult<()> {
            let mut seen = self.seen.lock().unwrap();
            seen.push((delivery.to.clone(), delivery.body.clone()));
            if self.fail_first && seen.len() == 1 {
                return Err(CoreError::Delivery(mailrelay_smtp::SmtpError::SendFailed(
                    "550 rejected".to_string(),
                )));
            }
            Ok(())
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn envelope(data: &[u8]) -> InboundEnvelope {
        InboundEnvelope {
            peer_address: peer(),
            mail_from: "nagios@host.example".to_string(),
            rcpt_to: vec!["r1@example.org".to_string(), "r2@example.org".to_string()],
            data: data.to_vec(),
        }
    }

    const BATCH: &[u8] =
        b"Subject: Alert\n\nmessage one textEND OF NOTIFICATIONmessage two text";

    #[tokio::test]
    async fn test_recipient_major_order() {
        let recorder = Recorder::default();
        let report = dispatch(&envelope(BATCH), &recorder).await.unwrap();

        assert_eq!(report, DispatchReport { attempted: 4, failed: 0 });
        let seen = recorder.seen.into_inner().unwrap();
        let order: Vec<(&str, bool)> = seen
            .iter()
            .map(|(to, body)| (to.as_str(), body.ends_with(b"one text")))
            .collect();
        assert_eq!(
            order,
            vec![
                ("r1@example.org", true),
                ("r1@example.org", false),
                ("r2@example.org", true),
                ("r2@example.org", false),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_siblings() {
        let recorder = Recorder {
            fail_first: true,
            ..Default::default()
        };
        let report = dispatch(&envelope(BATCH), &recorder).await.unwrap();

        assert_eq!(report, DispatchReport { attempted: 4, failed: 1 });
        assert_eq!(recorder.seen.into_inner().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_handler_rejects_missing_subject() {
        let recorder = Arc::new(Recorder::default());
        let handler = RelayHandler::new(recorder.clone(), peer());

        let reply = handler
            .handle_envelope(envelope(b"From: x\r\n\r\nno subject line in here"))
            .await;
        assert_eq!(reply.code, 554);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handler_reports_counts() {
        let handler = RelayHandler::new(Arc::new(Recorder::default()), peer());
        let reply = handler.handle_envelope(envelope(BATCH)).await;

        assert!(reply.is_success());
        assert!(reply.format().contains("4 deliveries attempted, 0 failed"));
    }

    #[derive(Default)]
    struct Gate {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl Deliver for Gate {
        async fn deliver(&self, _delivery: &OutboundDelivery) -> CoreResult<()> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handler_tracks_connection_state() {
        let gate = Arc::new(Gate::default());
        let handler = Arc::new(RelayHandler::new(gate.clone(), peer()));
        assert_eq!(handler.state().await, ConnectionState::AwaitEnvelope);

        let mut single = envelope(b"Subject: Alert\n\nsingle incident text");
        single.rcpt_to.truncate(1);
        let task = tokio::spawn({
            let handler = handler.clone();
            async move { handler.handle_envelope(single).await }
        });

        gate.entered.notified().await;
        assert_eq!(handler.state().await, ConnectionState::Dispatching);

        gate.release.notify_one();
        assert!(task.await.unwrap().is_success());
        assert_eq!(handler.state().await, ConnectionState::AwaitEnvelope);

        handler.close().await;
        assert_eq!(handler.state().await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_rejected_envelope_returns_to_waiting() {
        let handler = RelayHandler::new(Arc::new(Recorder::default()), peer());
        handler
            .handle_envelope(envelope(b"no headers at all, just text"))
            .await;
        assert_eq!(handler.state().await, ConnectionState::AwaitEnvelope);
    }
}
