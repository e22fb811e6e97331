use crate::crypto::{self, CryptoError, KeyPair};
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Leader is not listed as a leader among the servers")]
    LeaderNotInServers,
    #[error("Signature error: {0}")]
    Signature(#[from] CryptoError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Role of a consensus participant
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

/// One consensus participant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub role: Role,
    pub id: NodeId,
    pub public_key: [u8; 32],
}

/// Signed enumeration of consensus participants for one term.
///
/// The signature covers the canonical encoding of (term, servers) and is
/// verified with the carried public key. Immutable once signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peers {
    pub term: u64,
    pub leader: Server,
    pub servers: Vec<Server>,
    pub public_key: [u8; 32],
    pub signature: Vec<u8>,
}

impl Peers {
    /// Canonical byte encoding the signature covers
    fn signing_bytes(&self) -> Result<Vec<u8>, ConsensusError> {
        Ok(bincode::serialize(&(self.term, &self.servers))?)
    }

    /// Sign (term, servers) with `keypair`
    pub fn sign(&mut self, keypair: &KeyPair) -> Result<(), ConsensusError> {
        self.signature = keypair.sign(&self.signing_bytes()?);
        Ok(())
    }

    /// Verify the signature and that the leader is among the servers with
    /// the Leader role
    pub fn verify(&self) -> Result<(), ConsensusError> {
        if !self
            .servers
            .iter()
            .any(|s| s.id == self.leader.id && s.role == Role::Leader)
        {
            return Err(ConsensusError::LeaderNotInServers);
        }

        crypto::verify_signature(&self.public_key, &self.signing_bytes()?, &self.signature)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers_fixture(term: u64) -> (KeyPair, Peers) {
        let keypair = KeyPair::from_seed(&[9u8; 32]);
        let public_key = keypair.public_key_bytes();

        let leader = Server {
            role: Role::Leader,
            id: "leader".to_string(),
            public_key,
        };
        let follower = Server {
            role: Role::Follower,
            id: "follower".to_string(),
            public_key,
        };

        let mut peers = Peers {
            term,
            leader: leader.clone(),
            servers: vec![leader, follower],
            public_key,
            signature: Vec::new(),
        };
        peers.sign(&keypair).unwrap();
        (keypair, peers)
    }

    #[test]
    fn test_sign_and_verify() {
        let (_, peers) = peers_fixture(1);
        peers.verify().unwrap();
    }

    #[test]
    fn test_tampered_term_fails() {
        let (_, mut peers) = peers_fixture(1);
        peers.term = 2;
        assert!(matches!(
            peers.verify(),
            Err(ConsensusError::Signature(_))
        ));
    }

    #[test]
    fn test_tampered_servers_fail() {
        let (_, mut peers) = peers_fixture(1);
        peers.servers[1].id = "impostor".to_string();
        assert!(matches!(
            peers.verify(),
            Err(ConsensusError::Signature(_))
        ));
    }

    #[test]
    fn test_leader_must_be_listed() {
        let (keypair, mut peers) = peers_fixture(1);
        peers.servers[0].role = Role::Follower;
        peers.sign(&keypair).unwrap();
        assert!(matches!(
            peers.verify(),
            Err(ConsensusError::LeaderNotInServers)
        ));
    }
}
