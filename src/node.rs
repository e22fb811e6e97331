use crate::chain::{BlockIndex, BlockNode, SignedHeader};
use crate::crypto::KeyPair;
use crate::storage::{Storage, StorageError};
use crate::transport::{Router, Transport};
use crate::twopc::{BoxError, Worker};
use crate::types::{
    compute_hash, CommitRequest, ExecLog, Hash, NodeId, PhaseResponse, PrepareRequest,
    RollbackRequest,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Method names of the 2PC RPC surface
pub const METHOD_PREPARE: &str = "Prepare";
pub const METHOD_COMMIT: &str = "Commit";
pub const METHOD_ROLLBACK: &str = "Rollback";

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Unexpected batch type for method {0}")]
    UnexpectedBatchType(String),
    #[error("Worker error {code}: {message}")]
    Remote { code: u32, message: String },
}

/// Wire call of the 2PC worker surface
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum WorkerCall {
    Prepare(PrepareRequest),
    Commit(CommitRequest),
    Rollback(RollbackRequest),
}

/// Fabric specialisations for the 2PC worker surface
pub type ChainRouter = Router<WorkerCall, PhaseResponse>;
pub type ChainTransport = Transport<WorkerCall, PhaseResponse>;

/// A chain replica: serves the 2PC worker surface from the fabric against
/// its local SQL storage, and extends its signed block index on every
/// committed batch.
pub struct ChainNode {
    node_id: NodeId,
    keypair: KeyPair,
    storage: Arc<Storage>,
    transport: ChainTransport,
    index: BlockIndex,
    tip: Mutex<Option<Arc<BlockNode>>>,
}

impl ChainNode {
    pub fn new(
        node_id: NodeId,
        keypair: KeyPair,
        storage: Arc<Storage>,
        transport: ChainTransport,
    ) -> Self {
        Self {
            node_id,
            keypair,
            storage,
            transport,
            index: BlockIndex::new(),
            tip: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The chain index of committed batches
    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    /// Hash of the latest committed block, if any
    pub fn tip_hash(&self) -> Option<Hash> {
        self.tip.lock().as_ref().map(|node| *node.hash())
    }

    /// Serve incoming 2PC requests until the fabric closes
    pub async fn serve(&self) {
        info!(node = %self.node_id, "chain node serving");
        while let Some(request) = self.transport.recv().await {
            debug!(
                node = %self.node_id,
                origin = %request.origin(),
                method = request.method(),
                "handling request"
            );
            let response = self.handle(request.method(), request.payload()).await;
            request.respond(Ok(response));
        }
    }

    async fn handle(&self, method: &str, call: &WorkerCall) -> PhaseResponse {
        let ctx = CancellationToken::new();
        match (method, call) {
            (METHOD_PREPARE, WorkerCall::Prepare(req)) => {
                let batch = ExecLog::new(req.tx_id, req.queries.clone());
                match self.storage.prepare(&ctx, &batch).await {
                    Ok(()) => PhaseResponse::ok(),
                    Err(err) => phase_error(err),
                }
            }
            (METHOD_COMMIT, WorkerCall::Commit(req)) => {
                let batch = ExecLog::new(req.tx_id, Vec::new());
                match self.storage.commit(&ctx, &batch).await {
                    Ok(()) => {
                        self.extend_chain(&batch);
                        PhaseResponse::ok()
                    }
                    Err(err) => phase_error(err),
                }
            }
            (METHOD_ROLLBACK, WorkerCall::Rollback(req)) => {
                let batch = ExecLog::new(req.tx_id, Vec::new());
                match self.storage.rollback(&ctx, &batch).await {
                    Ok(()) => PhaseResponse::ok(),
                    Err(err) => phase_error(err),
                }
            }
            _ => {
                warn!(node = %self.node_id, method, "batch type does not match method");
                PhaseResponse::error(1, NodeError::UnexpectedBatchType(method.to_string()).to_string())
            }
        }
    }

    /// Append a signed header for the committed batch to the chain index
    fn extend_chain(&self, batch: &ExecLog) {
        let mut tip = self.tip.lock();
        let parent_hash = tip.as_ref().map(|node| *node.hash()).unwrap_or([0u8; 32]);

        let mut data = parent_hash.to_vec();
        data.extend_from_slice(&batch.tx_id.connection_id.to_be_bytes());
        data.extend_from_slice(&batch.tx_id.seq_no.to_be_bytes());
        data.extend_from_slice(&batch.tx_id.timestamp.to_be_bytes());
        let block_hash = compute_hash(&data);

        let header = SignedHeader {
            block_hash,
            parent: parent_hash,
            height: tip.as_ref().map(|node| node.height() + 1).unwrap_or(0),
            signature: self.keypair.sign(&block_hash),
        };

        let node = Arc::new(BlockNode::new(&header, tip.clone()));
        self.index.add_block(node.clone());
        *tip = Some(node);
    }
}

/// 2PC worker that forwards each phase to a named replica over the fabric.
///
/// A non-zero `err_code` in the response is surfaced as an error carrying
/// the remote reason.
pub struct RemoteWorker {
    target: NodeId,
    transport: ChainTransport,
}

impl RemoteWorker {
    pub fn new(target: NodeId, transport: ChainTransport) -> Self {
        Self { target, transport }
    }

    async fn call(
        &self,
        ctx: &CancellationToken,
        method: &str,
        call: WorkerCall,
    ) -> Result<(), BoxError> {
        let response = self.transport.request(ctx, &self.target, method, call).await?;
        if response.is_ok() {
            Ok(())
        } else {
            Err(NodeError::Remote {
                code: response.err_code,
                message: response.err_string,
            }
            .into())
        }
    }
}

#[async_trait]
impl Worker<ExecLog> for RemoteWorker {
    async fn prepare(&self, ctx: &CancellationToken, batch: &ExecLog) -> Result<(), BoxError> {
        self.call(
            ctx,
            METHOD_PREPARE,
            WorkerCall::Prepare(PrepareRequest {
                tx_id: batch.tx_id,
                queries: batch.queries.clone(),
            }),
        )
        .await
    }

    async fn commit(&self, ctx: &CancellationToken, batch: &ExecLog) -> Result<(), BoxError> {
        self.call(
            ctx,
            METHOD_COMMIT,
            WorkerCall::Commit(CommitRequest { tx_id: batch.tx_id }),
        )
        .await
    }

    async fn rollback(&self, ctx: &CancellationToken, batch: &ExecLog) -> Result<(), BoxError> {
        self.call(
            ctx,
            METHOD_ROLLBACK,
            WorkerCall::Rollback(RollbackRequest { tx_id: batch.tx_id }),
        )
        .await
    }
}

/// Map a storage failure onto the wire error taxonomy: state errors are
/// code 1, execution and engine errors are code 2
fn phase_error(err: BoxError) -> PhaseResponse {
    match err.downcast_ref::<StorageError>() {
        Some(StorageError::InconsistentState(_)) | Some(StorageError::TxNotPrepared) => {
            PhaseResponse::error(1, err.to_string())
        }
        _ => PhaseResponse::error(2, err.to_string()),
    }
}
