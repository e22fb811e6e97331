use crate::crypto::Nonce;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Unique identifier for a node in the network, derived from (public key, nonce)
pub type NodeId = String;

/// Hash of a block or message
pub type Hash = [u8; 32];

/// Width of a block hash in bytes
pub const HASH_SIZE: usize = 32;

/// Compute SHA256 hash
pub fn compute_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Transaction identity correlating the 2PC phases of one write
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxId {
    pub connection_id: u64,
    pub seq_no: u64,
    pub timestamp: u64,
}

impl TxId {
    pub fn new(connection_id: u64, seq_no: u64, timestamp: u64) -> Self {
        Self {
            connection_id,
            seq_no,
            timestamp,
        }
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conn = {}, seq = {}, time = {}",
            self.connection_id, self.seq_no, self.timestamp
        )
    }
}

/// Execution log of SQL statements, the write batch of one 2PC attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecLog {
    pub tx_id: TxId,
    pub queries: Vec<String>,
}

impl ExecLog {
    pub fn new(tx_id: TxId, queries: Vec<String>) -> Self {
        Self { tx_id, queries }
    }
}

/// Registered node record: identity, address, and the key material binding them
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub addr: String,
    pub public_key: Option<[u8; 32]>,
    pub nonce: Nonce,
}

impl Node {
    pub fn new(id: NodeId, addr: String, public_key: Option<[u8; 32]>, nonce: Nonce) -> Self {
        Self {
            id,
            addr,
            public_key,
            nonce,
        }
    }
}

// ==================== 2PC RPC Surface ====================

/// Prepare request carrying the transaction identity and its statements
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrepareRequest {
    pub tx_id: TxId,
    pub queries: Vec<String>,
}

/// Commit request for a previously prepared transaction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitRequest {
    pub tx_id: TxId,
}

/// Rollback request for a previously prepared transaction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RollbackRequest {
    pub tx_id: TxId,
}

/// Phase outcome: `err_code == 0` is success, any other code carries
/// a human-readable reason in `err_string`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseResponse {
    pub err_code: u32,
    pub err_string: String,
}

impl PhaseResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(err_code: u32, err_string: impl Into<String>) -> Self {
        Self {
            err_code,
            err_string: err_string.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_id_equality() {
        let a = TxId::new(1, 2, 3);
        let b = TxId::new(1, 2, 3);
        assert_eq!(a, b);
        assert_ne!(a, TxId::new(1, 2, 4));
        assert_ne!(a, TxId::new(1, 3, 3));
        assert_ne!(a, TxId::new(2, 2, 3));
    }

    #[test]
    fn test_node_record_round_trip() {
        let node = Node::new(
            "abc".to_string(),
            "addr".to_string(),
            None,
            Nonce([1, 2, 3, 4]),
        );
        let encoded = bincode::serialize(&node).unwrap();
        let decoded: Node = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded, node);

        let node = Node::new("def".to_string(), String::new(), Some([9u8; 32]), Nonce::default());
        let encoded = bincode::serialize(&node).unwrap();
        let decoded: Node = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_phase_response() {
        assert!(PhaseResponse::ok().is_ok());
        let resp = PhaseResponse::error(2, "failed to prepare");
        assert!(!resp.is_ok());
        assert_eq!(resp.err_code, 2);
        assert_eq!(resp.err_string, "failed to prepare");
    }
}
