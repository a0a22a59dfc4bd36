use std::{
    io,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::{
    Aggregate, AgentState, Deserialize, Receipt, RoundReport, Serialize, SyncErr,
    codec::{self, Reader},
};

type Header = u32;

/// The kind of a `SyncMessage`.
///
/// `State`, `BarrierEnter`, `BarrierRelease` and `Error` make up a round, the rest
/// are the control messages of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Register,
    State,
    BarrierEnter,
    BarrierRelease,
    Withdraw,
    Close,
    Ack,
    Error,
}

impl MessageKind {
    fn header(self) -> Header {
        match self {
            Self::Register => 0,
            Self::State => 1,
            Self::BarrierEnter => 2,
            Self::BarrierRelease => 3,
            Self::Withdraw => 4,
            Self::Close => 5,
            Self::Ack => 6,
            Self::Error => 7,
        }
    }

    fn from_header(header: Header) -> io::Result<Self> {
        Ok(match header {
            0 => Self::Register,
            1 => Self::State,
            2 => Self::BarrierEnter,
            3 => Self::BarrierRelease,
            4 => Self::Withdraw,
            5 => Self::Close,
            6 => Self::Ack,
            7 => Self::Error,
            other => {
                return codec::invalid_data(format!("Received an invalid kind header {other}"));
            }
        })
    }

    /// A stable name for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::State => "state",
            Self::BarrierEnter => "barrier_enter",
            Self::BarrierRelease => "barrier_release",
            Self::Withdraw => "withdraw",
            Self::Close => "close",
            Self::Ack => "ack",
            Self::Error => "error",
        }
    }
}

/// The body of a `SyncMessage`.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    State(AgentState),
    /// How long the sender is willing to wait at the barrier.
    Timeout(Duration),
    Receipt(Receipt),
    /// The round a submitted state was staged for.
    Round(u64),
    Release(Aggregate),
    Error(SyncErr),
}

impl Payload {
    fn tag(&self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::State(_) => 1,
            Self::Timeout(_) => 2,
            Self::Receipt(_) => 3,
            Self::Round(_) => 4,
            Self::Release(_) => 5,
            Self::Error(_) => 6,
        }
    }
}

/// The envelope of all coordinator traffic.
///
/// Replies echo the `sender_id` and `sequence` of the request they answer.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncMessage {
    pub sender_id: String,
    pub kind: MessageKind,
    pub payload: Payload,
    /// Strictly increasing per sender.
    pub sequence: u64,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
}

impl SyncMessage {
    /// Creates a new `SyncMessage` stamped with the current time.
    ///
    /// # Arguments
    /// * `sender_id` - The sending agent, or the agent a reply is addressed to.
    /// * `kind` - The message kind.
    /// * `payload` - The message body.
    /// * `sequence` - The sender's sequence number.
    ///
    /// # Returns
    /// A new `SyncMessage` instance.
    pub fn new(
        sender_id: impl Into<String>,
        kind: MessageKind,
        payload: Payload,
        sequence: u64,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            kind,
            payload,
            sequence,
            timestamp: now_millis(),
        }
    }

    /// Creates an `Error` reply.
    pub fn error(sender_id: impl Into<String>, sequence: u64, err: SyncErr) -> Self {
        Self::new(sender_id, MessageKind::Error, Payload::Error(err), sequence)
    }

    /// Checks that the payload fits the message kind.
    ///
    /// # Returns
    /// An `InvalidData` io error on a kind and payload mismatch.
    pub fn validate(&self) -> io::Result<()> {
        use MessageKind as K;

        let valid = matches!(
            (self.kind, &self.payload),
            (K::Register | K::Withdraw | K::Close, Payload::Empty)
                | (K::State, Payload::State(_))
                | (K::BarrierEnter, Payload::Timeout(_))
                | (K::BarrierRelease, Payload::Release(_))
                | (
                    K::Ack,
                    Payload::Empty | Payload::Receipt(_) | Payload::Round(_)
                )
                | (K::Error, Payload::Error(_))
        );

        if valid {
            Ok(())
        } else {
            codec::invalid_data(format!(
                "a {} message can't carry payload tag {}",
                self.kind.as_str(),
                self.payload.tag()
            ))
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

impl Serialize for SyncMessage {
    fn serialize(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        codec::put_u32(buf, self.kind.header());
        codec::put_u64(buf, self.sequence);
        codec::put_u64(buf, self.timestamp);
        codec::put_str(buf, &self.sender_id);
        codec::put_u8(buf, self.payload.tag());

        match &self.payload {
            Payload::Empty => {}
            Payload::State(state) => state.encode(buf),
            Payload::Timeout(timeout) => {
                let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                codec::put_u64(buf, millis);
            }
            Payload::Receipt(receipt) => serde_json::to_writer(&mut *buf, receipt)?,
            Payload::Round(round) => codec::put_u64(buf, *round),
            Payload::Release(aggregate) => {
                let report = serde_json::to_vec(&aggregate.report)?;
                codec::put_u32(buf, report.len() as u32);
                buf.extend_from_slice(&report);
                aggregate.state.encode(buf);
            }
            Payload::Error(err) => serde_json::to_writer(&mut *buf, err)?,
        }

        Ok(())
    }
}

impl Deserialize for SyncMessage {
    fn deserialize(buf: &[u8]) -> io::Result<Self> {
        let mut reader = Reader::new(buf);

        let kind = MessageKind::from_header(reader.u32()?)?;
        let sequence = reader.u64()?;
        let timestamp = reader.u64()?;
        let sender_id = reader.str()?;

        let payload = match reader.u8()? {
            0 => Payload::Empty,
            1 => Payload::State(AgentState::read_from(&mut reader)?),
            2 => Payload::Timeout(Duration::from_millis(reader.u64()?)),
            3 => Payload::Receipt(serde_json::from_slice(reader.rest())?),
            4 => Payload::Round(reader.u64()?),
            5 => {
                let len = reader.u32()? as usize;
                let report: RoundReport = serde_json::from_slice(reader.take(len)?)?;
                let state = AgentState::read_from(&mut reader)?;
                Payload::Release(Aggregate { state, report })
            }
            6 => Payload::Error(serde_json::from_slice(reader.rest())?),
            tag => return codec::invalid_data(format!("Received an invalid payload tag {tag}")),
        };

        reader.finish()?;

        let msg = Self {
            sender_id,
            kind,
            payload,
            sequence,
            timestamp,
        };

        msg.validate()?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Exclusion, ExclusionReason, RoundOutcome};

    fn encode(msg: &SyncMessage) -> Vec<u8> {
        let mut buf = Vec::new();
        msg.serialize(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_release_keeps_state_and_report() {
        let report = RoundReport {
            round: 3,
            outcome: RoundOutcome::Partial,
            participants: vec!["a".into(), "b".into()],
            missed: vec![],
            excluded: vec![Exclusion {
                agent_id: "c".into(),
                reason: ExclusionReason::Corrupt { index: 1 },
            }],
            error: None,
        };
        let state = AgentState::new("aggregate", vec![0.1, 1.0 / 3.0], 11);
        let aggregate = Aggregate { state, report };
        let msg = SyncMessage::new(
            "a",
            MessageKind::BarrierRelease,
            Payload::Release(aggregate.clone()),
            9,
        );

        let decoded = SyncMessage::deserialize(&encode(&msg)).unwrap();

        assert_eq!(decoded, msg);
        let Payload::Release(got) = decoded.payload else {
            panic!("expected a release payload");
        };
        assert_eq!(got.round(), 3);
        assert_eq!(got.state.weights[1].to_bits(), (1.0f64 / 3.0).to_bits());
    }

    #[test]
    fn test_error_payload() {
        let msg = SyncMessage::error("b", 2, SyncErr::BarrierTimeout { round: 1 });

        let decoded = SyncMessage::deserialize(&encode(&msg)).unwrap();

        assert_eq!(
            decoded.payload,
            Payload::Error(SyncErr::BarrierTimeout { round: 1 })
        );
        assert_eq!(decoded.kind, MessageKind::Error);
    }

    #[test]
    fn test_mismatched_payload_is_invalid() {
        let msg = SyncMessage::new("a", MessageKind::State, Payload::Empty, 1);
        assert!(msg.validate().is_err());

        let err = SyncMessage::deserialize(&encode(&msg)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_invalid_kind_header() {
        let msg = SyncMessage::new("a", MessageKind::Close, Payload::Empty, 1);
        let mut buf = encode(&msg);
        buf[..4].copy_from_slice(&42u32.to_be_bytes());

        assert!(SyncMessage::deserialize(&buf).is_err());
    }

    #[test]
    fn test_timeout_is_carried_in_millis() {
        let timeout = Duration::from_millis(1500);
        let msg = SyncMessage::new("a", MessageKind::BarrierEnter, Payload::Timeout(timeout), 4);

        let decoded = SyncMessage::deserialize(&encode(&msg)).unwrap();

        assert_eq!(decoded.payload, Payload::Timeout(timeout));
        assert_eq!(decoded.sequence, 4);
    }
}
