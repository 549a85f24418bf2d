use crate::{
    LATEST_IDS_KEY, POSTED_IDS_KEY,
    errors::{NotifierError, Result},
};
use async_trait::async_trait;
use redis::AsyncCommands;
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io::ErrorKind,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing::{debug, info, instrument};
use utils::errors::{STORE_CONNECTION_FAILED, STORE_READ_FAILED, STORE_WRITE_FAILED};

/// Minimal persistent key-value seam. Values are whole JSON documents and `set`
/// replaces the previous value.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self.get(key).await?.unwrap_or(default))
    }
}

/// Picks a backend from a store url: `redis://` and `rediss://` go to Redis,
/// anything else is a JSON file path.
pub fn open_store(store_url: &str) -> Result<Arc<dyn KeyValueStore>> {
    if store_url.starts_with("redis://") || store_url.starts_with("rediss://") {
        info!("Using Redis store");
        Ok(Arc::new(RedisStore::new(store_url)?))
    } else {
        info!(path = %store_url, "Using file store");
        Ok(Arc::new(FileStore::new(store_url)))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self
            .values
            .lock()
            .map_err(|e| NotifierError::Persistence(format!("{STORE_READ_FAILED}: {e}")))?;
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| NotifierError::Persistence(format!("{STORE_WRITE_FAILED}: {e}")))?;
        values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Keeps every key in one JSON object on disk. Writes land in a sibling temp file
/// and are renamed over the previous file.
pub struct FileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn read_document(&self) -> Result<Map<String, Value>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(NotifierError::Persistence(format!(
                    "{STORE_READ_FAILED} {}: {e}",
                    self.path.display()
                )));
            }
        };

        if contents.trim().is_empty() {
            return Ok(Map::new());
        }

        serde_json::from_str(&contents).map_err(|e| {
            NotifierError::Persistence(format!("{STORE_READ_FAILED} {}: {e}", self.path.display()))
        })
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_document().await?.remove(key))
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut document = self.read_document().await?;
        document.insert(key.to_string(), value);

        let serialized = serde_json::to_vec_pretty(&document)
            .map_err(|e| NotifierError::Persistence(format!("{STORE_WRITE_FAILED}: {e}")))?;

        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let write_err = |e: std::io::Error| {
            NotifierError::Persistence(format!("{STORE_WRITE_FAILED} {}: {e}", self.path.display()))
        };
        tokio::fs::write(&tmp_path, serialized).await.map_err(write_err)?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(write_err)?;

        debug!(path = %self.path.display(), "Store file replaced");
        Ok(())
    }
}

const REDIS_KEY_PREFIX: &str = "teratail:";

/// Stores each value as a JSON string under `teratail:{key}`.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| NotifierError::Persistence(format!("{STORE_CONNECTION_FAILED}: {e}")))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| NotifierError::Persistence(format!("{STORE_CONNECTION_FAILED}: {e}")))
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut con = self.connection().await?;
        let raw: Option<String> = con.get(redis_key(key)).await?;
        raw.as_deref().map(decode_redis_value).transpose()
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut con = self.connection().await?;
        let data = encode_redis_value(&value)?;
        con.set::<_, _, ()>(redis_key(key), data).await?;
        Ok(())
    }
}

fn redis_key(key: &str) -> String {
    format!("{REDIS_KEY_PREFIX}{key}")
}

fn encode_redis_value(value: &Value) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| NotifierError::Persistence(format!("{STORE_WRITE_FAILED}: {e}")))
}

fn decode_redis_value(data: &str) -> Result<Value> {
    serde_json::from_str(data)
        .map_err(|e| NotifierError::Persistence(format!("{STORE_READ_FAILED}: {e}")))
}

/// Highest notified question id per tag. Ids only ever move up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Watermarks(BTreeMap<String, i64>);

impl Watermarks {
    pub fn get(&self, tag: &str) -> i64 {
        self.0.get(tag).copied().unwrap_or(0)
    }

    /// Raises the watermark for `tag` to `id`; lower ids are ignored. Returns
    /// whether the value changed.
    pub fn advance(&mut self, tag: &str, id: i64) -> bool {
        let current = self.get(tag);
        if id > current {
            self.0.insert(tag.to_string(), id);
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(tag, id)| (tag.as_str(), *id))
    }
}

impl FromIterator<(String, i64)> for Watermarks {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Reads and writes the whole watermark map under `latest_ids`.
#[derive(Clone)]
pub struct WatermarkStore {
    store: Arc<dyn KeyValueStore>,
}

impl WatermarkStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Result<Watermarks> {
        let value = self
            .store
            .get_or(LATEST_IDS_KEY, Value::Object(Map::new()))
            .await?;

        let map: BTreeMap<String, i64> = serde_json::from_value(value).map_err(|e| {
            NotifierError::Persistence(format!("corrupt {LATEST_IDS_KEY} value: {e}"))
        })?;
        Ok(Watermarks(map))
    }

    pub async fn save(&self, watermarks: &Watermarks) -> Result<()> {
        let value = serde_json::to_value(&watermarks.0)
            .map_err(|e| NotifierError::Persistence(format!("{STORE_WRITE_FAILED}: {e}")))?;
        self.store.set(LATEST_IDS_KEY, value).await
    }

    /// Question ids already announced under the across-tags policy, kept under
    /// `posted_ids`.
    pub async fn load_posted(&self) -> Result<BTreeSet<i64>> {
        let value = self
            .store
            .get_or(POSTED_IDS_KEY, Value::Array(Vec::new()))
            .await?;

        serde_json::from_value(value).map_err(|e| {
            NotifierError::Persistence(format!("corrupt {POSTED_IDS_KEY} value: {e}"))
        })
    }

    pub async fn save_posted(&self, posted: &BTreeSet<i64>) -> Result<()> {
        let value = serde_json::to_value(posted)
            .map_err(|e| NotifierError::Persistence(format!("{STORE_WRITE_FAILED}: {e}")))?;
        self.store.set(POSTED_IDS_KEY, value).await
    }
}
