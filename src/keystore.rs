use crate::crypto::{self, Nonce};
use crate::types::{Node, NodeId};
use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::info;

/// Name of the bucket holding node records
const BUCKET_NODES: &str = "nodes";

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("Node is nil")]
    NilNode,
    #[error("Node id is not valid")]
    NotValidNodeId,
    #[error("Node id, public key and nonce do not match")]
    NodeIdKeyNonceNotMatch,
    #[error("Bucket not initialized")]
    BucketNotInitialized,
    #[error("Key not found")]
    KeyNotFound,
    #[error("Database error: {0}")]
    Database(#[from] rocksdb::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

struct StoreInner {
    db: DB,
    bucket: bool,
}

/// Persistent directory from node ID to (public key, PoW nonce), backed by
/// a single bucket in a local on-disk store.
///
/// The bucket can be administratively removed; every read or write on a
/// removed bucket fails with `BucketNotInitialized` until it is reset.
pub struct PublicKeyStore {
    inner: Mutex<StoreInner>,
}

impl PublicKeyStore {
    /// Open the store at `path`. If the bucket is fresh, `seed` is inserted.
    pub fn open<P: AsRef<Path>>(path: P, seed: Option<&Node>) -> Result<Self, KeystoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = vec![ColumnFamilyDescriptor::new(BUCKET_NODES, Options::default())];
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        let store = Self {
            inner: Mutex::new(StoreInner { db, bucket: true }),
        };

        if let Some(seed) = seed {
            if store.get_all_node_ids()?.is_empty() {
                info!(id = %seed.id, "seeding fresh public key bucket");
                store.store_node(seed)?;
            }
        }

        Ok(store)
    }

    /// Look up the full node record for `id`
    pub fn get_node_info(&self, id: &NodeId) -> Result<Node, KeystoreError> {
        let inner = self.inner.lock();
        let cf = bucket(&inner)?;
        match inner.db.get_cf(cf, id.as_bytes())? {
            Some(data) => Ok(bincode::deserialize(&data)?),
            None => Err(KeystoreError::KeyNotFound),
        }
    }

    /// Look up the public key registered for `id`
    pub fn get_public_key(&self, id: &NodeId) -> Result<[u8; 32], KeystoreError> {
        self.get_node_info(id)?
            .public_key
            .ok_or(KeystoreError::KeyNotFound)
    }

    /// Store a node record without derivation checks; `None` is rejected
    pub fn set_node(&self, node: Option<&Node>) -> Result<(), KeystoreError> {
        let node = node.ok_or(KeystoreError::NilNode)?;
        self.store_node(node)
    }

    /// Register a public key under `id`, validating that the ID is
    /// derivable from the key and nonce
    pub fn set_public_key(
        &self,
        id: NodeId,
        nonce: Nonce,
        public_key: [u8; 32],
    ) -> Result<(), KeystoreError> {
        if !crypto::is_valid_node_id(&id) {
            return Err(KeystoreError::NotValidNodeId);
        }
        if crypto::derive_node_id(&public_key, &nonce) != id {
            return Err(KeystoreError::NodeIdKeyNonceNotMatch);
        }

        self.store_node(&Node::new(id, String::new(), Some(public_key), nonce))
    }

    /// Delete the record for `id`; deleting a missing ID is not an error
    pub fn del_node(&self, id: &NodeId) -> Result<(), KeystoreError> {
        let inner = self.inner.lock();
        let cf = bucket(&inner)?;
        inner.db.delete_cf(cf, id.as_bytes())?;
        Ok(())
    }

    /// List every registered node ID; an empty bucket yields an empty list
    pub fn get_all_node_ids(&self) -> Result<Vec<NodeId>, KeystoreError> {
        let inner = self.inner.lock();
        let cf = bucket(&inner)?;

        let mut ids = Vec::new();
        for entry in inner.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = entry?;
            ids.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(ids)
    }

    /// Drop the backing bucket; subsequent operations fail with
    /// `BucketNotInitialized` until `reset_bucket`
    pub fn remove_bucket(&self) -> Result<(), KeystoreError> {
        let mut inner = self.inner.lock();
        if inner.bucket {
            inner.db.drop_cf(BUCKET_NODES)?;
            inner.bucket = false;
        }
        Ok(())
    }

    /// Recreate an empty bucket
    pub fn reset_bucket(&self) -> Result<(), KeystoreError> {
        let mut inner = self.inner.lock();
        if inner.bucket {
            inner.db.drop_cf(BUCKET_NODES)?;
        }
        inner.db.create_cf(BUCKET_NODES, &Options::default())?;
        inner.bucket = true;
        Ok(())
    }

    fn store_node(&self, node: &Node) -> Result<(), KeystoreError> {
        let inner = self.inner.lock();
        let cf = bucket(&inner)?;
        let data = bincode::serialize(node)?;
        inner.db.put_cf(cf, node.id.as_bytes(), data)?;
        Ok(())
    }
}

fn bucket(inner: &StoreInner) -> Result<&rocksdb::ColumnFamily, KeystoreError> {
    if !inner.bucket {
        return Err(KeystoreError::BucketNotInitialized);
    }
    inner
        .db
        .cf_handle(BUCKET_NODES)
        .ok_or(KeystoreError::BucketNotInitialized)
}

// ==================== Process-Scoped Accessor ====================

static STORE: OnceLock<Mutex<Option<Arc<PublicKeyStore>>>> = OnceLock::new();

fn store_slot() -> &'static Mutex<Option<Arc<PublicKeyStore>>> {
    STORE.get_or_init(|| Mutex::new(None))
}

/// One-shot idempotent initializer for the process-wide store. A failure
/// to open leaves the store unset.
pub fn init_public_key_store<P: AsRef<Path>>(
    path: P,
    seed: Option<&Node>,
) -> Result<(), KeystoreError> {
    let mut slot = store_slot().lock();
    if slot.is_some() {
        return Ok(());
    }
    let store = PublicKeyStore::open(path, seed)?;
    *slot = Some(Arc::new(store));
    Ok(())
}

/// The process-wide store handle; `BucketNotInitialized` until a
/// successful `init_public_key_store`
pub fn public_key_store() -> Result<Arc<PublicKeyStore>, KeystoreError> {
    store_slot()
        .lock()
        .clone()
        .ok_or(KeystoreError::BucketNotInitialized)
}

/// Process-scoped lookup of a node record
pub fn get_node_info(id: &NodeId) -> Result<Node, KeystoreError> {
    public_key_store()?.get_node_info(id)
}

/// Process-scoped lookup of a public key
pub fn get_public_key(id: &NodeId) -> Result<[u8; 32], KeystoreError> {
    public_key_store()?.get_public_key(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn seed_node() -> (KeyPair, Node) {
        let keypair = KeyPair::from_seed(&[42u8; 32]);
        let nonce = Nonce([1, 2, 3, 4]);
        let node = Node::new(
            keypair.node_id(&nonce),
            String::new(),
            Some(keypair.public_key_bytes()),
            nonce,
        );
        (keypair, node)
    }

    fn plain_node(id: &str, seed: u8) -> Node {
        let keypair = KeyPair::from_seed(&[seed; 32]);
        Node::new(
            id.to_string(),
            String::new(),
            Some(keypair.public_key_bytes()),
            Nonce::default(),
        )
    }

    #[test]
    fn test_store_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let (_, bp_node) = seed_node();
        let store = PublicKeyStore::open(dir.path(), Some(&bp_node)).unwrap();

        // The seed node is present
        let info = store.get_node_info(&bp_node.id).unwrap();
        assert_eq!(info, bp_node);
        assert_eq!(
            store.get_public_key(&bp_node.id).unwrap(),
            bp_node.public_key.unwrap()
        );

        assert!(matches!(
            store.get_public_key(&"not exist".to_string()),
            Err(KeystoreError::KeyNotFound)
        ));

        assert!(matches!(
            store.set_node(None),
            Err(KeystoreError::NilNode)
        ));

        let node1 = plain_node("node1", 1);
        let node2 = plain_node("node2", 2);
        store.set_node(Some(&node1)).unwrap();
        store.set_node(Some(&node2)).unwrap();

        // Valid derivation is accepted, mismatches are rejected
        store
            .set_public_key(
                bp_node.id.clone(),
                bp_node.nonce,
                bp_node.public_key.unwrap(),
            )
            .unwrap();
        assert!(matches!(
            store.set_public_key(
                bp_node.id.clone(),
                Nonce::default(),
                bp_node.public_key.unwrap()
            ),
            Err(KeystoreError::NodeIdKeyNonceNotMatch)
        ));
        assert!(matches!(
            store.set_public_key(
                format!("0{}", bp_node.id),
                bp_node.nonce,
                bp_node.public_key.unwrap()
            ),
            Err(KeystoreError::NotValidNodeId)
        ));

        let mut ids = store.get_all_node_ids().unwrap();
        ids.sort();
        let mut expected = vec![bp_node.id.clone(), "node1".to_string(), "node2".to_string()];
        expected.sort();
        assert_eq!(ids, expected);

        // Deleting is idempotent
        store.del_node(&"node2".to_string()).unwrap();
        store.del_node(&"node2".to_string()).unwrap();
        assert!(matches!(
            store.get_public_key(&"node2".to_string()),
            Err(KeystoreError::KeyNotFound)
        ));

        // A removed bucket rejects every operation
        store.remove_bucket().unwrap();
        assert!(matches!(
            store.get_public_key(&"not exist".to_string()),
            Err(KeystoreError::BucketNotInitialized)
        ));
        assert!(matches!(
            store.set_node(Some(&node1)),
            Err(KeystoreError::BucketNotInitialized)
        ));
        assert!(matches!(
            store.del_node(&"node2".to_string()),
            Err(KeystoreError::BucketNotInitialized)
        ));
        assert!(matches!(
            store.get_all_node_ids(),
            Err(KeystoreError::BucketNotInitialized)
        ));

        // Reset restores an empty bucket
        store.reset_bucket().unwrap();
        assert!(matches!(
            store.get_public_key(&"node2".to_string()),
            Err(KeystoreError::KeyNotFound)
        ));
        assert!(store.get_all_node_ids().unwrap().is_empty());
    }

    #[test]
    fn test_record_round_trip_with_nil_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = PublicKeyStore::open(dir.path(), None).unwrap();

        let node = Node::new(
            "abc".to_string(),
            "addr".to_string(),
            None,
            Nonce([1, 2, 3, 4]),
        );
        store.set_node(Some(&node)).unwrap();

        let decoded = store.get_node_info(&"abc".to_string()).unwrap();
        assert_eq!(decoded, node);
        assert!(matches!(
            store.get_public_key(&"abc".to_string()),
            Err(KeystoreError::KeyNotFound)
        ));
    }

    #[test]
    fn test_process_scoped_store() {
        // The singleton lives for the whole test process, so the entire
        // error-then-success path stays inside this one test.
        assert!(matches!(
            public_key_store(),
            Err(KeystoreError::BucketNotInitialized)
        ));
        assert!(init_public_key_store("/path/not/exist/keystore", None).is_err());
        assert!(matches!(
            public_key_store(),
            Err(KeystoreError::BucketNotInitialized)
        ));

        let dir = tempfile::tempdir().unwrap();
        let (_, bp_node) = seed_node();
        init_public_key_store(dir.path(), Some(&bp_node)).unwrap();
        // Idempotent re-init
        init_public_key_store(dir.path(), None).unwrap();

        assert_eq!(get_node_info(&bp_node.id).unwrap(), bp_node);
        assert_eq!(
            get_public_key(&bp_node.id).unwrap(),
            bp_node.public_key.unwrap()
        );
    }
}
