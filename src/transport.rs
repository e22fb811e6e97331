use crate::types::NodeId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Queued requests and pending responses per endpoint; overflow suspends
/// the sender
const QUEUE_CAPACITY: usize = 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request cancelled before a response arrived")]
    Cancelled,
    #[error("Endpoint {0} is closed")]
    EndpointClosed(NodeId),
    #[error("Remote error: {0}")]
    Remote(String),
}

/// Pending one-shot response slots keyed by request ID. A caller that gives
/// up removes its slot, so a late response finds nothing and is discarded.
type Waiters<R> = Mutex<HashMap<u64, oneshot::Sender<Result<R, TransportError>>>>;

struct Endpoint<Q, R> {
    node_id: NodeId,
    queue_tx: mpsc::Sender<IncomingRequest<Q, R>>,
    queue_rx: tokio::sync::Mutex<mpsc::Receiver<IncomingRequest<Q, R>>>,
    waiters: Arc<Waiters<R>>,
}

impl<Q, R> Endpoint<Q, R> {
    fn new(node_id: NodeId) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            node_id,
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            waiters: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

struct RouterInner<Q, R> {
    req_seq: AtomicU64,
    endpoints: Mutex<HashMap<NodeId, Arc<Endpoint<Q, R>>>>,
}

impl<Q, R> RouterInner<Q, R> {
    fn endpoint(&self, node_id: &NodeId) -> Arc<Endpoint<Q, R>> {
        let mut endpoints = self.endpoints.lock();
        endpoints
            .entry(node_id.clone())
            .or_insert_with(|| Arc::new(Endpoint::new(node_id.clone())))
            .clone()
    }

    fn next_request_id(&self) -> u64 {
        self.req_seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Addressable in-process message bus keyed by node ID.
///
/// Hands out per-node [`Transport`] handles that exchange typed
/// request/response pairs with per-request IDs and cancellation.
pub struct Router<Q, R> {
    inner: Arc<RouterInner<Q, R>>,
}

impl<Q, R> Router<Q, R> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RouterInner {
                req_seq: AtomicU64::new(0),
                endpoints: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get (or create) the transport bound to `node_id`
    pub fn transport(&self, node_id: impl Into<NodeId>) -> Transport<Q, R> {
        let node_id = node_id.into();
        let endpoint = self.inner.endpoint(&node_id);
        Transport {
            router: self.inner.clone(),
            endpoint,
        }
    }
}

impl<Q, R> Default for Router<Q, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q, R> Clone for Router<Q, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Per-node handle on the fabric: sends requests to named peers and
/// receives the requests addressed to this node
pub struct Transport<Q, R> {
    router: Arc<RouterInner<Q, R>>,
    endpoint: Arc<Endpoint<Q, R>>,
}

impl<Q, R> Clone for Transport<Q, R> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

impl<Q: Send + 'static, R: Send + 'static> Transport<Q, R> {
    /// The node ID this transport is bound to
    pub fn node_id(&self) -> &NodeId {
        &self.endpoint.node_id
    }

    /// Send one request to `target` and suspend until the matched response
    /// arrives or `ctx` fires.
    ///
    /// On cancellation the request ID is abandoned: its response slot is
    /// removed, so a late response is discarded rather than redelivered.
    pub async fn request(
        &self,
        ctx: &tokio_util::sync::CancellationToken,
        target: &NodeId,
        method: &str,
        payload: Q,
    ) -> Result<R, TransportError> {
        let target_ep = self.router.endpoint(target);
        let request_id = self.router.next_request_id();

        let (response_tx, response_rx) = oneshot::channel();
        target_ep.waiters.lock().insert(request_id, response_tx);

        let request = IncomingRequest {
            request_id,
            origin: self.endpoint.node_id.clone(),
            method: method.to_string(),
            payload,
            waiters: target_ep.waiters.clone(),
        };

        debug!(
            "[{}] [{}] -> [{}] request {}",
            request_id, self.endpoint.node_id, target, method
        );

        if target_ep.queue_tx.send(request).await.is_err() {
            target_ep.waiters.lock().remove(&request_id);
            return Err(TransportError::EndpointClosed(target.clone()));
        }

        tokio::select! {
            _ = ctx.cancelled() => {
                // Mark abandoned before returning the cancellation cause
                target_ep.waiters.lock().remove(&request_id);
                debug!(
                    "[{}] [{}] -> [{}] request cancelled",
                    request_id, self.endpoint.node_id, target
                );
                Err(TransportError::Cancelled)
            }
            response = response_rx => match response {
                Ok(result) => result,
                Err(_) => Err(TransportError::EndpointClosed(target.clone())),
            }
        }
    }

    /// Receive the next request addressed to this node.
    ///
    /// The receive side is restartable: call in a loop for the server's
    /// lifetime.
    pub async fn recv(&self) -> Option<IncomingRequest<Q, R>> {
        self.endpoint.queue_rx.lock().await.recv().await
    }
}

/// An incoming request handle: origin, method, payload, and a one-shot
/// response channel
pub struct IncomingRequest<Q, R> {
    request_id: u64,
    origin: NodeId,
    method: String,
    payload: Q,
    waiters: Arc<Waiters<R>>,
}

impl<Q, R> IncomingRequest<Q, R> {
    pub fn origin(&self) -> &NodeId {
        &self.origin
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn payload(&self) -> &Q {
        &self.payload
    }

    /// Send the response for this request. Consumes the handle; a response
    /// to an abandoned request is discarded.
    pub fn respond(self, result: Result<R, TransportError>) {
        let waiter = self.waiters.lock().remove(&self.request_id);
        match waiter {
            Some(response_tx) => {
                let _ = response_tx.send(result);
            }
            None => {
                debug!(
                    "[{}] response from [{}] discarded, caller gave up",
                    self.request_id, self.origin
                );
            }
        }
    }
}
