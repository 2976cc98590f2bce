use crate::domain::node::{Node, NodeId};
use crate::domain::ports::NodeStore;
use crate::error::{NodeError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for node records, keyed by big-endian node id.
pub const CF_NODES: &str = "nodes";
/// Column Family for engine metadata such as the id counter.
pub const CF_META: &str = "meta";

const NEXT_ID_KEY: &[u8] = b"next_node_id";

/// A persistent node store using RocksDB.
///
/// Big-endian keys make RocksDB's lexicographic order match id order, so
/// `get_all` needs no sorting. The id counter lives in its own column family
/// and is written before an id is handed out, so ids survive restarts without
/// being reused.
#[derive(Clone)]
pub struct RocksDBNodeStore {
    db: Arc<DB>,
    allocation: Arc<Mutex<()>>,
}

fn internal(message: impl Into<String>) -> NodeError {
    NodeError::InternalError(Box::new(std::io::Error::other(message.into())))
}

fn db_error(e: rocksdb::Error) -> NodeError {
    NodeError::InternalError(Box::new(e))
}

impl RocksDBNodeStore {
    /// Opens or creates a RocksDB instance at `path` with the required column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_nodes = ColumnFamilyDescriptor::new(CF_NODES, Options::default());
        let cf_meta = ColumnFamilyDescriptor::new(CF_META, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_nodes, cf_meta]).map_err(db_error)?;

        Ok(Self {
            db: Arc::new(db),
            allocation: Arc::new(Mutex::new(())),
        })
    }

    fn next_id(&self) -> Result<u32> {
        let cf = self
            .db
            .cf_handle(CF_META)
            .ok_or_else(|| internal("Meta column family not found"))?;
        match self.db.get_cf(&cf, NEXT_ID_KEY).map_err(db_error)? {
            Some(bytes) => {
                let array: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| internal("Corrupt node id counter"))?;
                Ok(u32::from_be_bytes(array))
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl NodeStore for RocksDBNodeStore {
    async fn allocate_id(&self) -> Result<NodeId> {
        let _guard = self.allocation.lock().await;
        let id = self.next_id()?;
        let next = id
            .checked_add(1)
            .ok_or_else(|| internal("node id space exhausted"))?;

        let cf = self
            .db
            .cf_handle(CF_META)
            .ok_or_else(|| internal("Meta column family not found"))?;
        self.db
            .put_cf(&cf, NEXT_ID_KEY, next.to_be_bytes())
            .map_err(db_error)?;

        Ok(NodeId::new(id))
    }

    async fn store(&self, node: Node) -> Result<()> {
        let cf = self
            .db
            .cf_handle(CF_NODES)
            .ok_or_else(|| internal("Nodes column family not found"))?;

        let key = node.id.value().to_be_bytes();
        let value = serde_json::to_vec(&node)?;
        self.db.put_cf(&cf, key, value).map_err(db_error)?;

        Ok(())
    }

    async fn get(&self, id: NodeId) -> Result<Option<Node>> {
        let cf = self
            .db
            .cf_handle(CF_NODES)
            .ok_or_else(|| internal("Nodes column family not found"))?;

        match self.db.get_cf(&cf, id.value().to_be_bytes()).map_err(db_error)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_all(&self) -> Result<Vec<Node>> {
        let cf = self
            .db
            .cf_handle(CF_NODES)
            .ok_or_else(|| internal("Nodes column family not found"))?;

        let mut nodes = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_key, value) = item.map_err(db_error)?;
            nodes.push(serde_json::from_slice(&value)?);
        }
        Ok(nodes)
    }
}
