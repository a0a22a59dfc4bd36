mod codec;
mod deserialize;
pub mod error;
pub mod msg;
mod receiver;
pub mod round;
mod sender;
mod serialize;
pub mod specs;
pub mod state;

use tokio::io::{AsyncRead, AsyncWrite};

pub use deserialize::Deserialize;
pub use error::SyncErr;
pub use msg::{MessageKind, Payload, SyncMessage};
pub use receiver::OnoReceiver;
pub use round::{Aggregate, Exclusion, ExclusionReason, Receipt, RoundOutcome, RoundReport};
pub use sender::OnoSender;
pub use serialize::Serialize;
pub use state::AgentState;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Frames bigger than this are rejected by the receiving end.
const MAX_FRAME_LEN: usize = 1 << 30;

/// Creates both `OnoReceiver` and `OnoSender` network channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// A communication stream in the form of an ono receiver and sender.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}
