use std::{
    collections::{HashMap, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
    path::Path,
    sync::{
        PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use anyhow::{Context, Result, anyhow};
use aya::maps::{HashMap as BpfHashMap, Map, MapData, MapError};

use xdp_redirect_common::{RedirectKey, RedirectTarget, TargetLookup};

use crate::error::TableError;

pub const TABLE_SHARDS: usize = 16;

/// Control-plane view of the redirect table.
///
/// Capacity is fixed when the table is created. Inserting a new key into a
/// full table fails with `CapacityExceeded`; replacing an existing key always
/// succeeds. Removing an absent key is not an error.
pub trait TargetTable {
    fn upsert(&mut self, key: RedirectKey, target: RedirectTarget) -> Result<(), TableError>;
    fn remove(&mut self, key: &RedirectKey) -> Result<(), TableError>;
    fn lookup(&self, key: &RedirectKey) -> Result<Option<RedirectTarget>, TableError>;
    fn clear(&mut self) -> Result<(), TableError>;
    fn entries(&self) -> Result<Vec<(RedirectKey, RedirectTarget)>, TableError>;
    fn capacity(&self) -> u32;
}

type Shard = RwLock<HashMap<RedirectKey, AtomicU64>>;

/// In-memory table with the kernel map's semantics, used by the host
/// dataplane.
///
/// Each entry holds its target in one `AtomicU64`, so replacing the target of
/// an existing key only needs shared access to the shard and lookups never
/// wait on it. Inserting a new key or removing one takes a single shard
/// exclusively.
pub struct FixedTargetTable {
    shards: Vec<Shard>,
    len: AtomicUsize,
    capacity: u32,
}

impl FixedTargetTable {
    pub fn with_capacity(capacity: u32) -> Self {
        let per_shard = (capacity as usize).div_ceil(TABLE_SHARDS);
        let mut shards = Vec::with_capacity(TABLE_SHARDS);
        for _ in 0..TABLE_SHARDS {
            shards.push(RwLock::new(HashMap::with_capacity(per_shard)));
        }
        Self {
            shards,
            len: AtomicUsize::new(0),
            capacity,
        }
    }

    fn shard(&self, key: &RedirectKey) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    pub fn upsert(&self, key: RedirectKey, target: RedirectTarget) -> Result<(), TableError> {
        let shard = self.shard(&key);
        if let Some(cell) = read(shard).get(&key) {
            cell.store(pack(target), Ordering::Release);
            return Ok(());
        }

        let mut entries = write(shard);
        // another writer may have inserted the key in between
        if let Some(cell) = entries.get(&key) {
            cell.store(pack(target), Ordering::Release);
            return Ok(());
        }
        let capacity = self.capacity as usize;
        self.len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                (len < capacity).then_some(len + 1)
            })
            .map_err(|_| TableError::CapacityExceeded {
                capacity: self.capacity,
            })?;
        entries.insert(key, AtomicU64::new(pack(target)));
        Ok(())
    }

    pub fn remove(&self, key: &RedirectKey) {
        let mut entries = write(self.shard(key));
        if entries.remove(key).is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub fn get(&self, key: &RedirectKey) -> Option<RedirectTarget> {
        read(self.shard(key))
            .get(key)
            .map(|cell| unpack(cell.load(Ordering::Acquire)))
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            let mut entries = write(shard);
            self.len.fetch_sub(entries.len(), Ordering::AcqRel);
            entries.clear();
        }
    }

    pub fn snapshot(&self) -> Vec<(RedirectKey, RedirectTarget)> {
        let mut entries = Vec::with_capacity(self.len());
        for shard in &self.shards {
            entries.extend(
                read(shard)
                    .iter()
                    .map(|(k, cell)| (*k, unpack(cell.load(Ordering::Acquire)))),
            );
        }
        entries
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TargetLookup for FixedTargetTable {
    #[inline]
    fn lookup(&self, key: &RedirectKey) -> Option<RedirectTarget> {
        self.get(key)
    }
}

impl TargetTable for FixedTargetTable {
    fn upsert(&mut self, key: RedirectKey, target: RedirectTarget) -> Result<(), TableError> {
        FixedTargetTable::upsert(self, key, target)
    }

    fn remove(&mut self, key: &RedirectKey) -> Result<(), TableError> {
        FixedTargetTable::remove(self, key);
        Ok(())
    }

    fn lookup(&self, key: &RedirectKey) -> Result<Option<RedirectTarget>, TableError> {
        Ok(self.get(key))
    }

    fn clear(&mut self) -> Result<(), TableError> {
        FixedTargetTable::clear(self);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(RedirectKey, RedirectTarget)>, TableError> {
        Ok(self.snapshot())
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }
}

fn pack(target: RedirectTarget) -> u64 {
    (u64::from(target.kind) << 32) | u64::from(target.index)
}

fn unpack(raw: u64) -> RedirectTarget {
    RedirectTarget {
        kind: (raw >> 32) as u32,
        index: raw as u32,
    }
}

// A panicking writer leaves a map that is still structurally valid.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// The kernel `redir_targets` map, opened through its bpffs pin.
pub struct PinnedTargetTable {
    map: BpfHashMap<MapData, RedirectKey, RedirectTarget>,
    capacity: u32,
}

impl PinnedTargetTable {
    pub fn open<P: AsRef<Path>>(pin_path: P) -> Result<Self> {
        let pin = pin_path.as_ref();
        let map_data = MapData::from_pin(pin)
            .map_err(|e| anyhow!("failed to open pinned map {}: {}", pin.display(), e))?;
        let capacity = map_data
            .info()
            .with_context(|| format!("failed to query {}", pin.display()))?
            .max_entries();
        let map_enum =
            Map::from_map_data(map_data).map_err(|e| anyhow!("invalid map type: {}", e))?;
        let map = BpfHashMap::try_from(map_enum)
            .map_err(|e| anyhow!("failed to convert to HashMap: {}", e))?;
        Ok(Self { map, capacity })
    }
}

impl TargetTable for PinnedTargetTable {
    fn upsert(&mut self, key: RedirectKey, target: RedirectTarget) -> Result<(), TableError> {
        upsert_result(self.map.insert(key, target, 0), self.capacity)
    }

    fn remove(&mut self, key: &RedirectKey) -> Result<(), TableError> {
        remove_result(self.map.remove(key))
    }

    fn lookup(&self, key: &RedirectKey) -> Result<Option<RedirectTarget>, TableError> {
        lookup_result(self.map.get(key, 0))
    }

    fn clear(&mut self) -> Result<(), TableError> {
        let keys = self.map.keys().collect::<Result<Vec<_>, _>>()?;
        for key in keys {
            TargetTable::remove(self, &key)?;
        }
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(RedirectKey, RedirectTarget)>, TableError> {
        Ok(self.map.iter().collect::<Result<Vec<_>, _>>()?)
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// The kernel refuses a new key in a full hash map with `E2BIG`.
fn upsert_result(res: Result<(), MapError>, capacity: u32) -> Result<(), TableError> {
    match res {
        Ok(()) => Ok(()),
        Err(err) if has_errno(&err, libc::E2BIG) => Err(TableError::CapacityExceeded { capacity }),
        Err(err) => Err(err.into()),
    }
}

fn remove_result(res: Result<(), MapError>) -> Result<(), TableError> {
    match res {
        Ok(()) | Err(MapError::KeyNotFound) => Ok(()),
        Err(err) if has_errno(&err, libc::ENOENT) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn lookup_result(
    res: Result<RedirectTarget, MapError>,
) -> Result<Option<RedirectTarget>, TableError> {
    match res {
        Ok(target) => Ok(Some(target)),
        Err(MapError::KeyNotFound) => Ok(None),
        Err(err) if has_errno(&err, libc::ENOENT) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn has_errno(err: &MapError, errno: i32) -> bool {
    match err {
        MapError::SyscallError(err) => err.io_error.raw_os_error() == Some(errno),
        _ => false,
    }
}
