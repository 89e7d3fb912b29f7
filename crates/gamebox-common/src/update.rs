//! Wire forms of document updates and state vectors.
//!
//! Both are opaque lib0 v1 byte strings produced by `yrs`. The relay never
//! decodes document contents; it only merges and diffs these buffers with
//! the byte-level helpers `yrs` provides (see [`UpdateLog`]).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use yrs::updates::encoder::Encode;

/// Identifies one replica of a document. Chosen at random per process.
pub type ClientId = u64;

/// `encode_state_as_update_v1` of a document with nothing in it: zero
/// struct groups followed by an empty delete set.
const EMPTY_UPDATE: [u8; 2] = [0, 0];

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("malformed update: {0}")]
    MalformedUpdate(String),
    #[error("malformed state vector: {0}")]
    MalformedStateVector(String),
}

/// A v1-encoded document update, as produced by one local transaction or by
/// a sync reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update(Vec<u8>);

impl Update {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encoded size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when applying the update could not change any replica.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty() || self.0 == EMPTY_UPDATE
    }

    /// Fold several updates into one without materialising a document.
    pub fn merge(updates: Vec<Update>) -> Result<Update, SyncError> {
        let parts: Vec<&[u8]> = updates
            .iter()
            .filter(|u| !u.0.is_empty())
            .map(|u| u.0.as_slice())
            .collect();
        match parts.as_slice() {
            [] => Ok(Update::default()),
            [single] => Ok(Update(single.to_vec())),
            _ => yrs::merge_updates_v1(&parts)
                .map(Update)
                .map_err(|e| SyncError::MalformedUpdate(e.to_string())),
        }
    }
}

/// A v1-encoded state vector: the highest clock seen per client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVector(Vec<u8>);

impl StateVector {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Default for StateVector {
    /// The state vector of a replica that has seen nothing.
    fn default() -> Self {
        Self(yrs::StateVector::default().encode_v1())
    }
}

/// Relay-side record of one document: every update seen so far, merged into
/// a single buffer.
#[derive(Debug, Clone, Default)]
pub struct UpdateLog {
    merged: Vec<u8>,
    updates: usize,
}

impl UpdateLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `update` into the log. Malformed updates are rejected and leave
    /// the log untouched.
    pub fn merge(&mut self, update: &Update) -> Result<(), SyncError> {
        if update.is_empty() {
            return Ok(());
        }
        let next = if self.merged.is_empty() {
            // a merge of one validates the encoding
            yrs::merge_updates_v1(&[update.as_bytes()])
        } else {
            yrs::merge_updates_v1(&[self.merged.as_slice(), update.as_bytes()])
        }
        .map_err(|e| SyncError::MalformedUpdate(e.to_string()))?;
        self.merged = next;
        self.updates += 1;
        Ok(())
    }

    /// Everything in the log that a replica at `remote` has not seen.
    pub fn diff(&self, remote: &StateVector) -> Result<Update, SyncError> {
        if self.merged.is_empty() {
            return Ok(Update::default());
        }
        yrs::diff_updates_v1(&self.merged, remote.as_bytes())
            .map(Update)
            .map_err(|e| SyncError::MalformedStateVector(e.to_string()))
    }

    pub fn state_vector(&self) -> Result<StateVector, SyncError> {
        if self.merged.is_empty() {
            return Ok(StateVector::default());
        }
        yrs::encode_state_vector_from_update_v1(&self.merged)
            .map(StateVector)
            .map_err(|e| SyncError::MalformedUpdate(e.to_string()))
    }

    /// Number of updates merged so far.
    pub fn update_count(&self) -> usize {
        self.updates
    }

    /// Size of the merged buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates == 0
    }
}
