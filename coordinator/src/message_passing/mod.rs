mod client;
mod serve;

use comms::{OnoSender, SyncMessage};
use log::warn;
use tokio::{io::AsyncWrite, sync::mpsc};

pub use client::MessagePassingCoordinator;
pub use serve::serve;

/// The amount of messages that can be queued for the writer task.
const OUTBOX_CAPACITY: usize = 64;

/// Writes every queued message until all the outbox senders are dropped.
///
/// # Arguments
/// * `tx` - The sending end of the connection.
/// * `queue` - The receiving end of the outbox.
async fn write_loop<W>(mut tx: OnoSender<W>, mut queue: mpsc::Receiver<SyncMessage>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = queue.recv().await {
        if let Err(e) = tx.send(&msg).await {
            warn!(
                "failed to send a {} message to {}: {e}",
                msg.kind.as_str(),
                msg.sender_id
            );
            break;
        }
    }
}
