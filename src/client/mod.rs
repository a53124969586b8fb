//! Offline-first sync client — local cache, synced resources, and the
//! work session that drives the fetch → work → submit cycle.

pub mod cache;
pub mod jobs;
pub mod queue;
pub mod results;
pub mod session;
pub mod synced;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{KeyedCache, LibSqlCache, MemoryCache};
pub use jobs::JobsList;
pub use queue::TaskQueue;
pub use results::ResultsBuffer;
pub use session::{SessionHandle, WorkHandler, WorkSession};
pub use synced::{SyncEvent, SyncedResource};
pub use transport::{HttpTransport, Transport};
