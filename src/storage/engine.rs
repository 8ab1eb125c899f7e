//! Concurrent Expiring Key-Value Store
//!
//! A single table of keys to [`Entry`] values guarded by one reader/writer lock.
//! Read-only operations take the lock shared; everything that mutates the table
//! takes it exclusively. There is no per-key locking.
//!
//! ## Expiry
//!
//! An entry is live until its `expires_at` instant passes. Expired entries are
//! removed in two ways:
//! 1. **Lazy**: `get` notices the expired entry and deletes it
//! 2. **Active**: the [`Janitor`](crate::storage::Janitor) sweeps the whole table periodically
//!
//! `exists` and `count` look at raw table presence, so an expired entry that
//! neither path has removed yet is still reported. The window is bounded by one
//! janitor interval.
//!
//! ## Memory Accounting
//!
//! `total_bytes` is the sum of value lengths of every entry physically in the
//! table, expired or not. Each mutation adjusts it inside the same critical
//! section that changes the table. The budget (`max_memory`) is only enforced by
//! the `try_set` family.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors returned by store operations.
///
/// The `Display` text is the reply message that follows the `ERR ` prefix.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The stored value is not a base-10 signed 64-bit integer
    #[error("value is not an integer or out of range")]
    NotAnInteger,

    /// The increment does not fit in a signed 64-bit integer
    #[error("increment or decrement would overflow")]
    Overflow,

    /// The write would push memory usage over the configured budget
    #[error("max memory reached")]
    OutOfMemory,
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A stored value with its optional expiry instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates an entry that never expires.
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates an entry that expires `ttl` from now.
    pub fn with_ttl(value: Bytes, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: deadline(Instant::now(), Some(ttl)),
        }
    }

    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Time left before expiry, `None` when the entry never expires.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .map(|exp| exp.saturating_duration_since(now))
    }
}

/// Turns a relative TTL into an absolute deadline.
///
/// A TTL too large to represent as an `Instant` never expires.
fn deadline(now: Instant, ttl: Option<Duration>) -> Option<Instant> {
    ttl.and_then(|ttl| now.checked_add(ttl))
}

fn parse_integer(value: &[u8]) -> StoreResult<i64> {
    if value.is_empty() {
        return Ok(0);
    }
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(StoreError::NotAnInteger)
}

/// Everything behind the lock.
#[derive(Debug, Default)]
struct Table {
    entries: HashMap<Bytes, Entry>,
    total_bytes: usize,
    max_memory: usize,
}

impl Table {
    fn insert(&mut self, key: Bytes, entry: Entry) -> Option<Entry> {
        self.total_bytes += entry.value.len();
        let previous = self.entries.insert(key, entry);
        if let Some(old) = &previous {
            self.total_bytes -= old.value.len();
        }
        previous
    }

    fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.value.len();
        Some(entry)
    }

    /// Whether replacing `key`'s value with `new_len` bytes stays within budget.
    ///
    /// Writes that do not grow the table are always allowed.
    fn fits(&self, key: &[u8], new_len: usize) -> bool {
        if self.max_memory == 0 {
            return true;
        }
        let old_len = self.entries.get(key).map_or(0, |e| e.value.len());
        new_len <= old_len || self.total_bytes - old_len + new_len <= self.max_memory
    }
}

/// The shared key-value store.
///
/// Wrap it in an `Arc` and hand clones to every connection and to the janitor.
///
/// # Example
///
/// ```
/// use ferrokv::storage::Store;
/// use bytes::Bytes;
///
/// let store = Store::new();
///
/// store.set(Bytes::from("name"), Bytes::from("Ariz"), 0);
/// assert_eq!(store.get(b"name"), Some(Bytes::from("Ariz")));
/// assert_eq!(store.ttl(b"name"), -1);
///
/// assert_eq!(store.incr_by(Bytes::from("hits"), 5), Ok(5));
/// assert_eq!(store.memory_usage(), 5);
/// ```
pub struct Store {
    table: RwLock<Table>,

    /// Entries removed because they expired (lazy or swept)
    expired_count: AtomicU64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.read();
        f.debug_struct("Store")
            .field("keys", &table.entries.len())
            .field("total_bytes", &table.total_bytes)
            .field("max_memory", &table.max_memory)
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates an empty store with no memory budget.
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Table::default()),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Creates an empty store with a memory budget in bytes (0 = unlimited).
    pub fn with_max_memory(max_memory: usize) -> Self {
        let store = Self::new();
        store.set_max_memory(max_memory);
        store
    }

    /// Returns the live value for `key`.
    ///
    /// An entry found expired is deleted before returning `None`. Two readers
    /// racing on the same expired key both re-check under the write lock, so
    /// only one of them removes it and adjusts the accounting.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        {
            let table = self.table.read();
            match table.entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired_at(Instant::now()) => {
                    return Some(entry.value.clone())
                }
                Some(_) => {}
            }
        }

        let mut table = self.table.write();
        match table.entries.get(key) {
            // Another reader already removed it
            None => return None,
            // Rewritten between the two lock acquisitions
            Some(entry) if !entry.is_expired_at(Instant::now()) => {
                return Some(entry.value.clone())
            }
            Some(_) => {}
        }

        self.remove_expired(&mut table, key);
        None
    }

    /// Removes an entry already known to be expired, under the write lock.
    fn remove_expired(&self, table: &mut Table, key: &[u8]) {
        if table.remove(key).is_some() {
            self.expired_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Stores `value`, expiring after `ttl_secs` seconds (0 = never).
    pub fn set(&self, key: Bytes, value: Bytes, ttl_secs: u64) {
        self.put(key, value, secs(ttl_secs));
    }

    /// Stores `value`, expiring after `ttl_ms` milliseconds (0 = never).
    pub fn set_ms(&self, key: Bytes, value: Bytes, ttl_ms: u64) {
        self.put(key, value, millis(ttl_ms));
    }

    /// Like [`set`](Self::set), but fails with [`StoreError::OutOfMemory`]
    /// instead of exceeding the memory budget. The table is untouched on failure.
    pub fn try_set(&self, key: Bytes, value: Bytes, ttl_secs: u64) -> StoreResult<()> {
        self.try_put(key, value, secs(ttl_secs))
    }

    /// Millisecond variant of [`try_set`](Self::try_set).
    pub fn try_set_ms(&self, key: Bytes, value: Bytes, ttl_ms: u64) -> StoreResult<()> {
        self.try_put(key, value, millis(ttl_ms))
    }

    fn put(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) {
        let mut table = self.table.write();
        let expires_at = deadline(Instant::now(), ttl);
        table.insert(key, Entry { value, expires_at });
    }

    fn try_put(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> StoreResult<()> {
        let mut table = self.table.write();
        if !table.fits(&key, value.len()) {
            return Err(StoreError::OutOfMemory);
        }
        let expires_at = deadline(Instant::now(), ttl);
        table.insert(key, Entry { value, expires_at });
        Ok(())
    }

    /// Removes `key` whether live or expired.
    ///
    /// Returns `true` if an entry was removed.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.table.write().remove(key).is_some()
    }

    /// Whether `key` is present in the table.
    ///
    /// This does not consult expiry: an expired entry not yet removed by a
    /// `get` or a janitor sweep still counts.
    pub fn exists(&self, key: &[u8]) -> bool {
        self.table.read().entries.contains_key(key)
    }

    /// Adds `delta` to the integer stored at `key` and returns the new value.
    ///
    /// A missing or expired key counts as `0` and the result never expires;
    /// otherwise the existing expiry is kept. On error nothing is changed.
    pub fn incr_by(&self, key: Bytes, delta: i64) -> StoreResult<i64> {
        let mut table = self.table.write();
        let now = Instant::now();

        let (current, expires_at) = match table.entries.get(&key) {
            Some(entry) if !entry.is_expired_at(now) => {
                (parse_integer(&entry.value)?, entry.expires_at)
            }
            _ => (0, None),
        };

        let next = current.checked_add(delta).ok_or(StoreError::Overflow)?;
        let value = Bytes::from(next.to_string());
        table.insert(key, Entry { value, expires_at });

        Ok(next)
    }

    /// Removes the expiry from `key`.
    ///
    /// Returns `true` only if the key was live and had an expiry.
    pub fn persist(&self, key: &[u8]) -> bool {
        let mut table = self.table.write();
        let now = Instant::now();

        match table.entries.get_mut(key) {
            None => return false,
            Some(entry) if !entry.is_expired_at(now) => return entry.expires_at.take().is_some(),
            Some(_) => {}
        }

        self.remove_expired(&mut table, key);
        false
    }

    /// Sets `key` to expire in `ttl_secs` seconds, or clears its expiry if `ttl_secs <= 0`.
    ///
    /// Returns `true` if the key exists.
    pub fn expire(&self, key: &[u8], ttl_secs: i64) -> bool {
        let ttl = (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs as u64));
        self.set_expiry(key, ttl)
    }

    /// Millisecond variant of [`expire`](Self::expire).
    pub fn pexpire(&self, key: &[u8], ttl_ms: i64) -> bool {
        let ttl = (ttl_ms > 0).then(|| Duration::from_millis(ttl_ms as u64));
        self.set_expiry(key, ttl)
    }

    fn set_expiry(&self, key: &[u8], ttl: Option<Duration>) -> bool {
        let mut table = self.table.write();
        let now = Instant::now();

        match table.entries.get_mut(key) {
            None => return false,
            Some(entry) if !entry.is_expired_at(now) => {
                entry.expires_at = deadline(now, ttl);
                return true;
            }
            Some(_) => {}
        }

        self.remove_expired(&mut table, key);
        false
    }

    /// Remaining time to live in seconds, rounded up.
    ///
    /// `-2` if the key is absent or already expired, `-1` if it never expires.
    pub fn ttl(&self, key: &[u8]) -> i64 {
        self.remaining_ms(key)
            .map(|ms| if ms < 0 { ms } else { (ms + 999) / 1000 })
            .unwrap_or(-2)
    }

    /// Remaining time to live in milliseconds, rounded up.
    ///
    /// `-2` if the key is absent or already expired, `-1` if it never expires.
    pub fn pttl(&self, key: &[u8]) -> i64 {
        self.remaining_ms(key).unwrap_or(-2)
    }

    /// `None` for absent or expired, `Some(-1)` for persistent, otherwise ms left.
    fn remaining_ms(&self, key: &[u8]) -> Option<i64> {
        let table = self.table.read();
        let now = Instant::now();
        let entry = table.entries.get(key)?;
        if entry.is_expired_at(now) {
            return None;
        }
        Some(match entry.remaining(now) {
            None => -1,
            Some(left) => {
                let micros = left.as_micros();
                i64::try_from((micros + 999) / 1000).unwrap_or(i64::MAX)
            }
        })
    }

    /// Number of entries in the table, including expired ones not yet removed.
    pub fn count(&self) -> usize {
        self.table.read().entries.len()
    }

    /// Returns true if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Sets the memory budget in bytes (0 = unlimited).
    ///
    /// Lowering the budget below current usage evicts nothing; it only makes
    /// growing `try_set` calls fail.
    pub fn set_max_memory(&self, bytes: usize) {
        self.table.write().max_memory = bytes;
    }

    /// The memory budget in bytes (0 = unlimited).
    pub fn max_memory(&self) -> usize {
        self.table.read().max_memory
    }

    /// Sum of value lengths currently held, including expired entries not yet removed.
    pub fn memory_usage(&self) -> usize {
        self.table.read().total_bytes
    }

    /// Removes every expired entry in one exclusive critical section.
    ///
    /// This is O(entries); called by the janitor. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let mut guard = self.table.write();
        let table = &mut *guard;
        let now = Instant::now();
        let before = table.entries.len();
        let mut freed = 0usize;

        table.entries.retain(|_, entry| {
            if entry.is_expired_at(now) {
                freed += entry.value.len();
                false
            } else {
                true
            }
        });
        table.total_bytes -= freed;

        let removed = before - table.entries.len();
        if removed > 0 {
            self.expired_count
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Returns a snapshot of store statistics.
    pub fn stats(&self) -> StoreStats {
        let table = self.table.read();
        StoreStats {
            keys: table.entries.len(),
            used_memory: table.total_bytes,
            max_memory: table.max_memory,
            expired_keys: self.expired_count.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn physical_bytes(&self) -> usize {
        self.table
            .read()
            .entries
            .values()
            .map(|e| e.value.len())
            .sum()
    }
}

fn secs(ttl: u64) -> Option<Duration> {
    (ttl > 0).then(|| Duration::from_secs(ttl))
}

fn millis(ttl: u64) -> Option<Duration> {
    (ttl > 0).then(|| Duration::from_millis(ttl))
}

/// Store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Entries in the table, including expired ones not yet removed
    pub keys: usize,
    /// Current byte accounting value
    pub used_memory: usize,
    /// Memory budget (0 = unlimited)
    pub max_memory: usize,
    /// Total entries removed because they expired
    pub expired_keys: u64,
}
