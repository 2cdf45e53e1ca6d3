//! Versioned TTL cache shared by every fetch and resolution step.
//!
//! Entries are JSON envelopes (`version`, `timestamp_ms`, `payload`) kept in a
//! scoped key/value store. An entry is either valid or evicted on read; there
//! is no stale-but-usable state, and store failures read as misses.

mod store;
mod ttl;

pub use store::{KvStore, LayeredStore, MemoryStore, SqliteStore};
pub use ttl::{digest_key, CacheFamilies, CacheFamily, CacheStats, Clock, ManualClock, SystemClock, TtlCache};
