use std::{
    collections::HashMap,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use comms::{
    Aggregate, AgentState, MessageKind, OnoReceiver, Payload, Receipt, SyncErr, SyncMessage,
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time,
};

use super::OUTBOX_CAPACITY;
use crate::{Result, SyncCoordinator};

/// The sender id of the messages that act on the whole session.
const CONTROL_ID: &str = "@client";

/// How long past its own timeout a barrier waits for the remote verdict.
const BARRIER_GRACE: Duration = Duration::from_secs(1);

type Key = (String, u64);

/// The requests waiting for a reply, `None` once the connection is gone.
type Pending = Arc<Mutex<Option<HashMap<Key, oneshot::Sender<SyncMessage>>>>>;

struct Inner {
    outbox: mpsc::Sender<SyncMessage>,
    pending: Pending,
    sequences: Mutex<HashMap<String, u64>>,
    rounds: Mutex<HashMap<String, u64>>,
    closed: AtomicBool,
    reader: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// A coordinator reached through a byte stream, the other end runs `serve`.
///
/// Every call turns into a request `SyncMessage` and waits for the reply carrying the
/// same sender and sequence number, so calls of different agents may interleave freely.
#[derive(Clone)]
pub struct MessagePassingCoordinator {
    inner: Arc<Inner>,
}

impl MessagePassingCoordinator {
    /// Creates a new `MessagePassingCoordinator` on top of a connection.
    ///
    /// Spawns the reader and writer tasks of the connection, so it must be called from
    /// inside a tokio runtime.
    ///
    /// # Arguments
    /// * `rx` - The reading half of the connection.
    /// * `tx` - The writing half of the connection.
    ///
    /// # Returns
    /// A new `MessagePassingCoordinator` instance.
    pub fn connect<R, W>(rx: R, tx: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (rx, tx) = comms::channel(rx, tx);
        let (outbox, queue) = mpsc::channel(OUTBOX_CAPACITY);
        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));

        tokio::spawn(super::write_loop(tx, queue));
        let reader = tokio::spawn(read_loop(rx, pending.clone()));

        let inner = Inner {
            outbox,
            pending,
            sequences: Mutex::new(HashMap::new()),
            rounds: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            reader,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    fn next_sequence(&self, sender_id: &str) -> u64 {
        let mut sequences = self.inner.sequences.lock();
        let sequence = sequences.entry(sender_id.to_string()).or_default();
        *sequence += 1;
        *sequence
    }

    async fn send_request(
        &self,
        sender_id: &str,
        kind: MessageKind,
        payload: Payload,
    ) -> Result<(Key, oneshot::Receiver<SyncMessage>)> {
        let sequence = self.next_sequence(sender_id);
        let key = (sender_id.to_string(), sequence);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.inner.pending.lock();
            let Some(pending) = pending.as_mut() else {
                return Err(disconnected());
            };
            pending.insert(key.clone(), tx);
        }

        let msg = SyncMessage::new(sender_id, kind, payload, sequence);
        if self.inner.outbox.send(msg).await.is_err() {
            self.forget(&key);
            return Err(disconnected());
        }

        Ok((key, rx))
    }

    async fn call(
        &self,
        sender_id: &str,
        kind: MessageKind,
        payload: Payload,
    ) -> Result<SyncMessage> {
        let (_, rx) = self.send_request(sender_id, kind, payload).await?;
        reply(rx).await
    }

    fn forget(&self, key: &Key) {
        if let Some(pending) = self.inner.pending.lock().as_mut() {
            pending.remove(key);
        }
    }
}

#[async_trait::async_trait]
impl SyncCoordinator for MessagePassingCoordinator {
    async fn register(&self, agent_id: &str) -> Result<Receipt> {
        let msg = self.call(agent_id, MessageKind::Register, Payload::Empty).await?;

        match msg.payload {
            Payload::Receipt(receipt) => Ok(receipt),
            _ => Err(unexpected(msg.kind)),
        }
    }

    async fn submit(&self, agent_id: &str, state: AgentState) -> Result<u64> {
        let msg = self
            .call(agent_id, MessageKind::State, Payload::State(state))
            .await?;

        let Payload::Round(round) = msg.payload else {
            return Err(unexpected(msg.kind));
        };

        self.inner.rounds.lock().insert(agent_id.to_string(), round);
        Ok(round)
    }

    async fn barrier(&self, agent_id: &str, timeout: Duration) -> Result<Arc<Aggregate>> {
        let (key, rx) = self
            .send_request(agent_id, MessageKind::BarrierEnter, Payload::Timeout(timeout))
            .await?;

        let msg = match time::timeout(timeout + BARRIER_GRACE, reply(rx)).await {
            Ok(msg) => msg?,
            Err(_) => {
                self.forget(&key);
                let round = self.inner.rounds.lock().get(agent_id).copied().unwrap_or_default();
                warn!("no barrier release arrived for {agent_id} in round {round}");
                return Err(SyncErr::BarrierTimeout { round });
            }
        };

        match msg.payload {
            Payload::Release(aggregate) => Ok(Arc::new(aggregate)),
            _ => Err(unexpected(msg.kind)),
        }
    }

    async fn withdraw(&self, agent_id: &str) -> Result<()> {
        self.call(agent_id, MessageKind::Withdraw, Payload::Empty)
            .await
            .map(|_| ())
    }

    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        match self.call(CONTROL_ID, MessageKind::Close, Payload::Empty).await {
            Ok(_) => info!("remote coordinator closed"),
            Err(e) => debug!("couldn't close the remote coordinator: {e}"),
        }
    }
}

/// Routes every reply to the request waiting for it.
async fn read_loop<R>(mut rx: OnoReceiver<R>, pending: Pending)
where
    R: AsyncRead + Unpin,
{
    loop {
        let msg: SyncMessage = match rx.recv().await {
            Ok(msg) => msg,
            Err(e) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    warn!("coordinator connection failed: {e}");
                }
                break;
            }
        };

        let key = (msg.sender_id.clone(), msg.sequence);
        let waiter = pending.lock().as_mut().and_then(|p| p.remove(&key));

        match waiter {
            Some(waiter) => {
                let _ = waiter.send(msg);
            }
            None => debug!(
                "dropping an unsolicited {} reply for {}",
                msg.kind.as_str(),
                msg.sender_id
            ),
        }
    }

    // Dropping the waiters fails every request still in flight.
    pending.lock().take();
}

async fn reply(rx: oneshot::Receiver<SyncMessage>) -> Result<SyncMessage> {
    let msg = rx.await.map_err(|_| disconnected())?;

    match msg.payload {
        Payload::Error(err) => Err(err),
        _ => Ok(msg),
    }
}

fn disconnected() -> SyncErr {
    SyncErr::transport("the coordinator connection is closed")
}

fn unexpected(kind: MessageKind) -> SyncErr {
    SyncErr::transport(format!("unexpected {} reply", kind.as_str()))
}
