use std::{collections::BTreeMap, io};

use crate::{
    Deserialize, Serialize,
    codec::{self, Reader},
};

/// A point in time snapshot of an agent's weights.
///
/// Values are never updated in place, every update produces a new `AgentState`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    pub weights: Vec<f64>,
    pub iteration: u64,
    pub metadata: BTreeMap<String, String>,
}

impl AgentState {
    /// Creates a new `AgentState` without metadata.
    ///
    /// # Arguments
    /// * `agent_id` - The identifier of the owning agent.
    /// * `weights` - The flat weight vector.
    /// * `iteration` - The iteration counter of this snapshot.
    ///
    /// # Returns
    /// A new `AgentState` instance.
    pub fn new(agent_id: impl Into<String>, weights: Vec<f64>, iteration: u64) -> Self {
        Self {
            agent_id: agent_id.into(),
            weights,
            iteration,
            metadata: BTreeMap::new(),
        }
    }

    /// Returns this state with an extra metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }

    /// The dimensionality of the weight vector.
    pub fn dimension(&self) -> usize {
        self.weights.len()
    }

    /// Looks for a `NaN` or infinite weight.
    ///
    /// # Returns
    /// The index of the first non-finite weight, if any.
    pub fn first_non_finite(&self) -> Option<usize> {
        self.weights.iter().position(|w| !w.is_finite())
    }

    /// Produces the state that follows a local update.
    ///
    /// # Arguments
    /// * `weights` - The updated weights.
    ///
    /// # Returns
    /// A new state owned by the same agent, one iteration ahead.
    pub fn successor(&self, weights: Vec<f64>) -> Self {
        Self {
            agent_id: self.agent_id.clone(),
            weights,
            iteration: self.iteration + 1,
            metadata: self.metadata.clone(),
        }
    }

    /// Produces this agent's state after taking over an aggregated state.
    ///
    /// The agent keeps its identity and metadata, weights and iteration come from `other`.
    pub fn adopt(&self, other: &AgentState) -> Self {
        Self {
            agent_id: self.agent_id.clone(),
            weights: other.weights.clone(),
            iteration: other.iteration.max(self.iteration),
            metadata: self.metadata.clone(),
        }
    }

    /// Appends the canonical encoding of this state to `buf`.
    ///
    /// States with equal fields encode to identical bytes: weights are written as their
    /// bit patterns and metadata in key order.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        codec::put_str(buf, &self.agent_id);
        codec::put_u64(buf, self.iteration);
        codec::put_u64(buf, self.weights.len() as u64);
        self.weights.iter().for_each(|&w| codec::put_f64(buf, w));
        codec::put_u32(buf, self.metadata.len() as u32);

        for (key, value) in &self.metadata {
            codec::put_str(buf, key);
            codec::put_str(buf, value);
        }
    }

    /// Decodes a state out of a buffer holding exactly one canonical encoding.
    ///
    /// # Arguments
    /// * `buf` - The encoded state.
    ///
    /// # Returns
    /// The decoded state or an `InvalidData` io error.
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        let mut reader = Reader::new(buf);
        let state = Self::read_from(&mut reader)?;
        reader.finish()?;
        Ok(state)
    }

    pub(crate) fn read_from(reader: &mut Reader<'_>) -> io::Result<Self> {
        let agent_id = reader.str()?;
        let iteration = reader.u64()?;
        let len = reader.u64()? as usize;

        let weights = (0..len)
            .map(|_| reader.f64())
            .collect::<io::Result<Vec<_>>>()?;

        let entries = reader.u32()?;
        let mut metadata = BTreeMap::new();

        for _ in 0..entries {
            let key = reader.str()?;
            let value = reader.str()?;
            metadata.insert(key, value);
        }

        Ok(Self {
            agent_id,
            weights,
            iteration,
            metadata,
        })
    }
}

impl Serialize for AgentState {
    fn serialize(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        self.encode(buf);
        Ok(())
    }
}

impl Deserialize for AgentState {
    fn deserialize(buf: &[u8]) -> io::Result<Self> {
        Self::decode(buf)
    }
}
