//! Permissioned SQL-chain node
//!
//! This library implements the replication plane of a distributed SQL
//! database: nodes coordinate SQL mutations through a two-phase commit
//! protocol over an addressable request/response fabric, persist a chained
//! log of signed block headers indexed by hash, and authenticate peers
//! through a persistent public-key directory.
//!
//! ## Components
//!
//! - **Two-Phase Commit**: coordinator and worker contract with hookable
//!   pre-phase gates and a wall-clock deadline
//! - **Storage**: per-node SQL executor (SQLite) mapping 2PC phases onto a
//!   single-writer database transaction
//! - **Transport**: in-process message fabric keyed by node ID, with
//!   per-request IDs and cancellation
//! - **Chain**: in-memory block index with ancestor-at-height walks
//! - **Keystore**: persistent node ID to (public key, nonce) directory
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqlchain::storage::Storage;
//! use sqlchain::twopc::{Coordinator, Options, Worker};
//! use sqlchain::types::{ExecLog, TxId};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let workers: Vec<Arc<dyn Worker<ExecLog>>> = vec![
//!         Arc::new(Storage::new(":memory:").unwrap()),
//!         Arc::new(Storage::new(":memory:").unwrap()),
//!     ];
//!
//!     let coordinator = Coordinator::new(Options::new(Duration::from_secs(5)));
//!     let batch = ExecLog::new(
//!         TxId::new(1, 1, 0),
//!         vec!["CREATE TABLE kv (k TEXT, v TEXT)".to_string()],
//!     );
//!     coordinator.put(&workers, &batch).await.unwrap();
//! }
//! ```

pub mod chain;
pub mod consensus;
pub mod crypto;
pub mod dsn;
pub mod keystore;
pub mod node;
pub mod storage;
pub mod transport;
pub mod twopc;
pub mod types;

pub use chain::{BlockIndex, BlockNode, SignedHeader};
pub use consensus::{Peers, Role, Server};
pub use crypto::{KeyPair, Nonce};
pub use dsn::Dsn;
pub use keystore::PublicKeyStore;
pub use node::{ChainNode, ChainRouter, ChainTransport, RemoteWorker};
pub use storage::Storage;
pub use transport::{Router, Transport};
pub use twopc::{Coordinator, Options, Worker};
pub use types::{ExecLog, Node, NodeId, TxId};
