use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::auth::Authenticator;
use crate::core::client_info::ClientInfo;
use crate::core::errors::{AgentError, AgentResult};
use crate::core::modules::ModuleDescriptor;
use crate::stream::pb::{message, order, Message, Order};
use crate::stream::{Connection, ConnectionReceiver, ConnectionSender};

/// Heartbeat ticker period (§4.4, §5).
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);
/// Pacing delay between outbound sends, bounding throughput to ~20 frames/s.
const SEND_PACING: Duration = Duration::from_millis(50);
/// Upper bound on the best-effort EOF drain after a graceful stop (§4.4 step
/// 4): the receiver keeps consuming queued frames for at most this long
/// after the attach context is cancelled, rather than waiting forever for a
/// server that never half-closes its side.
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
/// `orders`/`messages` are modeled as unbuffered in the source; tokio's mpsc
/// has no true zero-capacity channel, so depth 1 is the closest equivalent —
/// one frame may sit ready while the previous one is still being handed off.
const CHANNEL_DEPTH: usize = 1;

/// Builds the connect-time metadata for a stream attach: authenticator
/// credentials plus the `ClientInfo`/module-registry fields from §6.
/// `capabilities`/`MODULE_LIST`/`EE` carry one value per entry, not a joined
/// string, so they round-trip as repeated gRPC metadata headers.
pub async fn build_connect_metadata(
    authenticator: &dyn Authenticator,
    info: &ClientInfo,
    modules: &[ModuleDescriptor],
) -> AgentResult<HashMap<String, Vec<String>>> {
    let mut metadata = info.to_metadata(modules);
    metadata.insert("authorization".to_string(), vec![authenticator.authenticate().await?]);
    metadata.insert("capabilities".to_string(), vec!["EE".to_string(), "MODULE_LIST".to_string()]);
    Ok(metadata)
}

fn pong_message() -> Message {
    Message {
        metadata: HashMap::new(),
        payload: Some(message::Payload::Pong(crate::stream::pb::Pong {})),
    }
}

/// The caller-facing side of an attach: submit messages, request a graceful
/// stop. Cheap to clone and hand to both C7 (as its upstream send sink) and
/// whatever drives process shutdown, while the `orders` receiver returned
/// alongside it is consumed exclusively by C7's dispatch loop.
#[derive(Clone)]
pub struct MembershipSink {
    messages_tx: mpsc::Sender<Message>,
    stop_tx: mpsc::Sender<oneshot::Sender<AgentResult<()>>>,
    stopped: Arc<AtomicBool>,
}

impl MembershipSink {
    /// Submits `msg` for delivery. Rejected with `AgentError::Stopped` once
    /// `stop` has been called, even if the controller has not yet exited.
    pub async fn send(&self, msg: Message) -> AgentResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(AgentError::Stopped);
        }
        self.messages_tx.send(msg).await.map_err(|_| AgentError::Stopped)
    }

    /// Requests a graceful shutdown: rejects further `send`s immediately,
    /// then asks the controller to half-close the stream, cancel the attach
    /// and let the receiver drain to EOF.
    pub async fn stop(&self) -> AgentResult<()> {
        self.stopped.store(true, Ordering::SeqCst);

        let (done_tx, done_rx) = oneshot::channel();
        if self.stop_tx.send(done_tx).await.is_err() {
            // Controller already exited; nothing left to coordinate with.
            return Ok(());
        }
        done_rx.await.unwrap_or(Ok(()))
    }
}

/// Owns one attach of the bidirectional stream (C4): `build_connect_metadata`
/// plus `Connection::connect` happen before construction; this type owns the
/// multiplex loop once a `Connection` is handed to `start`.
pub struct MembershipClient {
    messages_rx: mpsc::Receiver<Message>,
    orders_tx: mpsc::Sender<Order>,
    stop_rx: mpsc::Receiver<oneshot::Sender<AgentResult<()>>>,
    stopped: Arc<AtomicBool>,
    token: CancellationToken,
}

impl MembershipClient {
    /// Returns the client itself (to be handed to `start`), the cloneable
    /// sink used to submit messages and request shutdown, and the
    /// receive-only channel of incoming orders that C7 consumes.
    pub fn new() -> (Self, MembershipSink, mpsc::Receiver<Order>) {
        let (messages_tx, messages_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (orders_tx, orders_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let stopped = Arc::new(AtomicBool::new(false));

        let client = Self {
            messages_rx,
            orders_tx,
            stop_rx,
            stopped: stopped.clone(),
            token: CancellationToken::new(),
        };
        let sink = MembershipSink {
            messages_tx,
            stop_tx,
            stopped,
        };
        (client, sink, orders_rx)
    }

    /// Runs the multiplex loop to completion: spawns the receiver, heartbeat
    /// and controller tasks, and returns once the stream terminates, either
    /// because of a graceful `stop` or because one of the three activities
    /// hit a fatal error.
    pub async fn start(self, conn: Box<dyn Connection>) -> AgentResult<()> {
        let (sender, receiver) = conn.split();
        let (pong_tx, pong_rx) = mpsc::channel::<Message>(CHANNEL_DEPTH);
        let (fault_tx, fault_rx) = mpsc::channel::<AgentError>(1);
        let (drain_done_tx, drain_done_rx) = oneshot::channel();

        let receiver_task = tokio::spawn(run_receiver(
            receiver,
            self.orders_tx,
            pong_tx.clone(),
            fault_tx,
            self.stopped.clone(),
            self.token.clone(),
            drain_done_tx,
        ));
        let heartbeat_task = tokio::spawn(run_heartbeat(self.token.clone(), pong_tx));
        let controller_task = tokio::spawn(run_controller(
            sender,
            self.messages_rx,
            pong_rx,
            fault_rx,
            self.stop_rx,
            self.token.clone(),
            drain_done_rx,
        ));

        let (receiver_result, _heartbeat_result, controller_result) =
            tokio::join!(receiver_task, heartbeat_task, controller_task);

        if let Err(join_err) = &receiver_result {
            warn!(error = %join_err, "receiver task panicked");
        }

        controller_result.map_err(|e| AgentError::Transport(format!("controller task panicked: {e}")))?
    }
}

/// Runs the receive loop and, on the way out, always notifies `drain_done_tx`
/// so the controller's stop branch knows the EOF drain (or lack of one, on a
/// non-stop exit) has finished before it signals completion to the caller.
async fn run_receiver(
    mut receiver: Box<dyn ConnectionReceiver>,
    orders_tx: mpsc::Sender<Order>,
    pong_tx: mpsc::Sender<Message>,
    fault_tx: mpsc::Sender<AgentError>,
    stopped: Arc<AtomicBool>,
    token: CancellationToken,
    drain_done_tx: oneshot::Sender<()>,
) -> AgentResult<()> {
    let result = run_receiver_loop(&mut receiver, orders_tx, pong_tx, fault_tx, stopped, token).await;
    let _ = drain_done_tx.send(());
    result
}

async fn run_receiver_loop(
    receiver: &mut Box<dyn ConnectionReceiver>,
    orders_tx: mpsc::Sender<Order>,
    pong_tx: mpsc::Sender<Message>,
    fault_tx: mpsc::Sender<AgentError>,
    stopped: Arc<AtomicBool>,
    token: CancellationToken,
) -> AgentResult<()> {
    loop {
        let received = tokio::select! {
            _ = token.cancelled() => {
                drain_until_eof(receiver.as_mut()).await;
                return Ok(());
            }
            received = receiver.recv() => received,
        };

        match received {
            Ok(Some(order)) => {
                if matches!(order.command, Some(order::Command::Ping(_))) {
                    if pong_tx.send(pong_message()).await.is_err() {
                        return Ok(());
                    }
                    continue;
                }

                tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    result = orders_tx.send(order) => {
                        if result.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
            Ok(None) => {
                if stopped.load(Ordering::SeqCst) {
                    return Ok(());
                }
                let err = AgentError::Transport("membership stream ended unexpectedly".to_string());
                let _ = fault_tx.send(err.clone()).await;
                return Err(err);
            }
            Err(err) => {
                let _ = fault_tx.send(err.clone()).await;
                return Err(err);
            }
        }
    }
}

/// Keeps calling `recv` after the attach context has been cancelled, to
/// release any frames the server already had in flight when `CloseSend` was
/// issued, rather than dropping them on the floor (§4.4 step 4). Best-effort:
/// stops on the first error, on EOF, or once `STOP_DRAIN_TIMEOUT` elapses,
/// whichever comes first.
async fn drain_until_eof(receiver: &mut dyn ConnectionReceiver) {
    let deadline = tokio::time::Instant::now() + STOP_DRAIN_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match tokio::time::timeout(remaining, receiver.recv()).await {
            Ok(Ok(Some(_))) => continue,
            Ok(Ok(None)) | Ok(Err(_)) | Err(_) => return,
        }
    }
}

async fn run_heartbeat(token: CancellationToken, pong_tx: mpsc::Sender<Message>) -> AgentResult<()> {
    let mut ticker = tokio::time::interval(HEARTBEAT_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = ticker.tick() => {
                if pong_tx.send(pong_message()).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

async fn run_controller(
    mut sender: Box<dyn ConnectionSender>,
    mut messages_rx: mpsc::Receiver<Message>,
    mut pong_rx: mpsc::Receiver<Message>,
    mut fault_rx: mpsc::Receiver<AgentError>,
    mut stop_rx: mpsc::Receiver<oneshot::Sender<AgentResult<()>>>,
    token: CancellationToken,
    drain_done_rx: oneshot::Receiver<()>,
) -> AgentResult<()> {
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            Some(completer) = stop_rx.recv() => {
                let close_result = sender.close_send().await;
                token.cancel();
                // Step 4: let the receiver drain to EOF before step 5 signals
                // completion back to the caller.
                let _ = tokio::time::timeout(STOP_DRAIN_TIMEOUT + Duration::from_millis(200), drain_done_rx).await;
                let _ = completer.send(close_result.clone());
                return close_result;
            }
            Some(fault) = fault_rx.recv() => {
                token.cancel();
                return Err(fault);
            }
            Some(msg) = messages_rx.recv() => {
                if let Err(err) = sender.send(msg).await {
                    token.cancel();
                    return Err(err);
                }
                tokio::time::sleep(SEND_PACING).await;
            }
            Some(msg) = pong_rx.recv() => {
                if let Err(err) = sender.send(msg).await {
                    token.cancel();
                    return Err(err);
                }
                tokio::time::sleep(SEND_PACING).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct FakeSender {
        sent: Arc<Mutex<Vec<Message>>>,
        close_send_calls: Arc<AtomicBool>,
        fail_next: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ConnectionSender for FakeSender {
        async fn send(&mut self, msg: Message) -> AgentResult<()> {
            if self.fail_next.load(Ordering::SeqCst) {
                return Err(AgentError::Transport("send failed".to_string()));
            }
            self.sent.lock().unwrap().push(msg);
            Ok(())
        }

        async fn close_send(&mut self) -> AgentResult<()> {
            self.close_send_calls.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeReceiver {
        scripted: VecDeque<AgentResult<Option<Order>>>,
    }

    #[async_trait]
    impl ConnectionReceiver for FakeReceiver {
        async fn recv(&mut self) -> AgentResult<Option<Order>> {
            match self.scripted.pop_front() {
                Some(result) => result,
                None => {
                    // Block forever once the script is exhausted; tests drive
                    // termination via `stop`, not EOF.
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    struct FakeConnection {
        sender: FakeSender,
        receiver: FakeReceiver,
    }

    impl Connection for FakeConnection {
        fn split(self: Box<Self>) -> (Box<dyn ConnectionSender>, Box<dyn ConnectionReceiver>) {
            let this = *self;
            (Box::new(this.sender), Box::new(this.receiver))
        }
    }

    fn ping_order() -> Order {
        Order {
            metadata: HashMap::new(),
            command: Some(order::Command::Ping(crate::stream::pb::Ping {})),
        }
    }

    #[tokio::test]
    async fn ping_triggers_pong_without_order() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let conn = FakeConnection {
            sender: FakeSender {
                sent: sent.clone(),
                close_send_calls: Arc::new(AtomicBool::new(false)),
                fail_next: Arc::new(AtomicBool::new(false)),
            },
            receiver: FakeReceiver {
                scripted: VecDeque::from(vec![Ok(Some(ping_order()))]),
            },
        };

        let (client, sink, mut orders_rx) = MembershipClient::new();
        let start = tokio::spawn(client.start(Box::new(conn)));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(orders_rx.try_recv().is_err());

        sink.stop().await.unwrap();
        start.await.unwrap().unwrap();

        let pongs = sent.lock().unwrap();
        assert_eq!(pongs.len(), 1);
        assert!(matches!(pongs[0].payload, Some(message::Payload::Pong(_))));
    }

    #[tokio::test]
    async fn heartbeat_fires_without_inbound_traffic() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let conn = FakeConnection {
            sender: FakeSender {
                sent: sent.clone(),
                close_send_calls: Arc::new(AtomicBool::new(false)),
                fail_next: Arc::new(AtomicBool::new(false)),
            },
            receiver: FakeReceiver {
                scripted: VecDeque::new(),
            },
        };

        let (client, sink, _orders_rx) = MembershipClient::new();
        let start = tokio::spawn(client.start(Box::new(conn)));

        tokio::time::sleep(Duration::from_secs(6)).await;
        sink.stop().await.unwrap();
        start.await.unwrap().unwrap();

        assert!(!sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_rejects_subsequent_sends() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let close_calls = Arc::new(AtomicBool::new(false));
        let conn = FakeConnection {
            sender: FakeSender {
                sent: sent.clone(),
                close_send_calls: close_calls.clone(),
                fail_next: Arc::new(AtomicBool::new(false)),
            },
            receiver: FakeReceiver {
                scripted: VecDeque::new(),
            },
        };

        let (client, sink, _orders_rx) = MembershipClient::new();
        let start = tokio::spawn(client.start(Box::new(conn)));

        sink.stop().await.unwrap();
        start.await.unwrap().unwrap();

        assert!(close_calls.load(Ordering::SeqCst));
        let err = sink.send(pong_message()).await.unwrap_err();
        assert!(matches!(err, AgentError::Stopped));
    }

    #[tokio::test]
    async fn drain_until_eof_consumes_queued_frames_then_stops_at_eof() {
        struct CountingReceiver {
            calls: Arc<std::sync::atomic::AtomicUsize>,
            scripted: VecDeque<AgentResult<Option<Order>>>,
        }

        #[async_trait]
        impl ConnectionReceiver for CountingReceiver {
            async fn recv(&mut self) -> AgentResult<Option<Order>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.scripted.pop_front().unwrap_or(Ok(None))
            }
        }

        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut receiver: Box<dyn ConnectionReceiver> = Box::new(CountingReceiver {
            calls: calls.clone(),
            scripted: VecDeque::from(vec![Ok(Some(ping_order())), Ok(Some(ping_order())), Ok(None)]),
        });

        drain_until_eof(receiver.as_mut()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_until_eof_gives_up_after_timeout_on_a_silent_receiver() {
        struct PendingReceiver;

        #[async_trait]
        impl ConnectionReceiver for PendingReceiver {
            async fn recv(&mut self) -> AgentResult<Option<Order>> {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }

        let mut receiver: Box<dyn ConnectionReceiver> = Box::new(PendingReceiver);
        let drain = tokio::spawn(async move {
            drain_until_eof(receiver.as_mut()).await;
        });

        tokio::time::advance(STOP_DRAIN_TIMEOUT + Duration::from_millis(10)).await;
        drain.await.unwrap();
    }
}
