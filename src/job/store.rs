//! In-memory store for the tiles of one job.
//!
//! A [`JobStore`] holds two independent key → PNG maps: the raw tiles cut
//! from the source image and the result tiles fetched back from the remote
//! host. It also carries the job identifier, which doubles as the name of
//! the remote working directory, and the [`TileGeometry`] snapshot needed to
//! stitch the results.
//!
//! # Thread Safety
//!
//! Both maps sit behind their own lock, so transfer workers may insert
//! concurrently under distinct keys.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use bytes::Bytes;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::TileError;
use crate::tile::{TileGeometry, TileKey};

/// Prefix of every generated job identifier.
pub const JOB_ID_PREFIX: &str = "widu-";

/// Tiles and metadata of one segmentation job.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use widu::job::JobStore;
/// use widu::tile::TileKey;
///
/// let store = JobStore::new();
/// assert!(store.id().starts_with("widu-"));
///
/// let key = TileKey::new(1, 0, 224).unwrap();
/// store.put_raw(key, Bytes::from_static(b"png bytes"));
/// assert_eq!(store.raw_len(), 1);
/// assert!(store.get_result(&key).is_none());
/// ```
#[derive(Debug)]
pub struct JobStore {
    /// Unique job identifier, also the remote directory name
    id: String,

    /// Tiles cut from the source image
    raw: RwLock<BTreeMap<TileKey, Bytes>>,

    /// Tiles returned by the remote program
    results: RwLock<BTreeMap<TileKey, Bytes>>,

    /// Set once by the tiler
    geometry: OnceLock<TileGeometry>,
}

impl JobStore {
    /// Create an empty store with a fresh job identifier.
    pub fn new() -> Self {
        Self {
            id: format!("{}{}", JOB_ID_PREFIX, Uuid::new_v4()),
            raw: RwLock::new(BTreeMap::new()),
            results: RwLock::new(BTreeMap::new()),
            geometry: OnceLock::new(),
        }
    }

    /// The job identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    // =========================================================================
    // Raw tiles
    // =========================================================================

    /// Store a raw tile, returning the previous data under that key.
    pub fn put_raw(&self, key: TileKey, data: Bytes) -> Option<Bytes> {
        self.raw.write().insert(key, data)
    }

    pub fn get_raw(&self, key: &TileKey) -> Option<Bytes> {
        self.raw.read().get(key).cloned()
    }

    /// Raw tile keys in tiling order.
    pub fn raw_keys(&self) -> Vec<TileKey> {
        self.raw.read().keys().copied().collect()
    }

    pub fn raw_len(&self) -> usize {
        self.raw.read().len()
    }

    /// Total size of the raw tiles in bytes.
    pub fn raw_size(&self) -> usize {
        self.raw.read().values().map(Bytes::len).sum()
    }

    // =========================================================================
    // Result tiles
    // =========================================================================

    /// Store a result tile, returning the previous data under that key.
    pub fn put_result(&self, key: TileKey, data: Bytes) -> Option<Bytes> {
        self.results.write().insert(key, data)
    }

    pub fn get_result(&self, key: &TileKey) -> Option<Bytes> {
        self.results.read().get(key).cloned()
    }

    /// Result tile keys in tiling order.
    pub fn result_keys(&self) -> Vec<TileKey> {
        self.results.read().keys().copied().collect()
    }

    pub fn result_len(&self) -> usize {
        self.results.read().len()
    }

    /// Total size of the result tiles in bytes.
    pub fn result_size(&self) -> usize {
        self.results.read().values().map(Bytes::len).sum()
    }

    /// Raw keys that have no result tile yet.
    pub fn missing_results(&self) -> Vec<TileKey> {
        let raw = self.raw.read();
        let results = self.results.read();
        raw.keys()
            .filter(|key| !results.contains_key(key))
            .copied()
            .collect()
    }

    /// Drop all result tiles, keeping the raw tiles and geometry.
    pub fn clear_results(&self) {
        self.results.write().clear();
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    /// Record the geometry snapshot. Only the first call succeeds.
    pub fn set_geometry(&self, geometry: TileGeometry) -> Result<(), TileError> {
        self.geometry
            .set(geometry)
            .map_err(|_| TileError::GeometryAlreadySet)
    }

    pub fn geometry(&self) -> Option<&TileGeometry> {
        self.geometry.get()
    }

    /// The geometry snapshot, or [`TileError::GeometryNotSet`].
    pub fn require_geometry(&self) -> Result<&TileGeometry, TileError> {
        self.geometry.get().ok_or(TileError::GeometryNotSet)
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}
