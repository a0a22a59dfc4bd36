use std::{collections::HashMap, io};

use comms::{MessageKind, Payload, SyncErr, SyncMessage};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
    task::JoinSet,
};

use super::OUTBOX_CAPACITY;
use crate::{LocalSyncCoordinator, Result, SyncCoordinator};

/// Answers the requests of a `MessagePassingCoordinator` on behalf of `coordinator`.
///
/// Every request is answered by its own task, so a blocked barrier never holds back the
/// requests of other agents. A request whose sequence number doesn't grow past the
/// last one of its sender is answered with a `SequenceRegression` error.
///
/// # Arguments
/// * `coordinator` - The coordinator doing the actual work.
/// * `rx` - The reading half of the connection.
/// * `tx` - The writing half of the connection.
///
/// # Returns
/// An io error if the connection failed, `Ok` once the peer hangs up.
pub async fn serve<R, W>(coordinator: LocalSyncCoordinator, rx: R, tx: W) -> io::Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (mut rx, tx) = comms::channel(rx, tx);
    let (outbox, queue) = mpsc::channel(OUTBOX_CAPACITY);
    let writer = tokio::spawn(super::write_loop(tx, queue));

    let mut tasks = JoinSet::new();
    let mut sequences: HashMap<String, u64> = HashMap::new();

    info!("serving coordinator requests");

    let result = loop {
        let msg: SyncMessage = match rx.recv().await {
            Ok(msg) => msg,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break Ok(()),
            Err(e) => break Err(e),
        };

        while tasks.try_join_next().is_some() {}

        if let Some(&last) = sequences.get(&msg.sender_id) {
            if msg.sequence <= last {
                let err = SyncErr::SequenceRegression {
                    agent_id: msg.sender_id.clone(),
                    last,
                    got: msg.sequence,
                };

                warn!("flagging a {} request: {err}", msg.kind.as_str());

                let reply = SyncMessage::error(msg.sender_id, msg.sequence, err);
                if outbox.send(reply).await.is_err() {
                    break Ok(());
                }
                continue;
            }
        }

        sequences.insert(msg.sender_id.clone(), msg.sequence);
        debug!(sequence = msg.sequence; "{} request from {}", msg.kind.as_str(), msg.sender_id);

        let coordinator = coordinator.clone();
        let outbox = outbox.clone();

        tasks.spawn(async move {
            let reply = answer(&coordinator, msg).await;
            if outbox.send(reply).await.is_err() {
                debug!("dropping a reply, the connection is gone");
            }
        });
    };

    tasks.shutdown().await;
    drop(outbox);

    if let Err(e) = writer.await {
        warn!("the writer task failed: {e}");
    }

    info!("coordinator peer disconnected");
    result
}

async fn answer(coordinator: &LocalSyncCoordinator, msg: SyncMessage) -> SyncMessage {
    let SyncMessage {
        sender_id,
        kind,
        payload,
        sequence,
        ..
    } = msg;

    let reply: Result<(MessageKind, Payload)> = match (kind, payload) {
        (MessageKind::Register, _) => coordinator
            .register(&sender_id)
            .await
            .map(|receipt| (MessageKind::Ack, Payload::Receipt(receipt))),
        (MessageKind::State, Payload::State(state)) => coordinator
            .submit(&sender_id, state)
            .await
            .map(|round| (MessageKind::Ack, Payload::Round(round))),
        (MessageKind::BarrierEnter, Payload::Timeout(timeout)) => coordinator
            .barrier(&sender_id, timeout)
            .await
            .map(|aggregate| (MessageKind::BarrierRelease, Payload::Release((*aggregate).clone()))),
        (MessageKind::Withdraw, _) => coordinator
            .withdraw(&sender_id)
            .await
            .map(|()| (MessageKind::Ack, Payload::Empty)),
        (MessageKind::Close, _) => {
            coordinator.close().await;
            Ok((MessageKind::Ack, Payload::Empty))
        }
        (kind, _) => Err(SyncErr::transport(format!(
            "a coordinator can't answer a {} message",
            kind.as_str()
        ))),
    };

    match reply {
        Ok((kind, payload)) => SyncMessage::new(sender_id, kind, payload, sequence),
        Err(err) => SyncMessage::error(sender_id, sequence, err),
    }
}
