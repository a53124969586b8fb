//! Task assignment — which tasks a requesting worker may work on.
//!
//! Assignment is a soft lease, not mutual exclusion: pass 3 can hand a
//! task to a second worker, and the first submitted result wins, closing
//! the task for everyone. Leases carry no TTL; staleness is implicit in
//! "still unresolved and another worker wants it".

use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::Store;

/// Build the set of task ids assigned to `worker` for `job`, up to
/// `capacity`, in three ordered passes:
///
/// 1. tasks already leased to this worker with no results (re-serve
///    in-progress work, e.g. after a client crash);
/// 2. fresh claims of unleased, unresolved tasks;
/// 3. re-leases of unresolved tasks held by other workers.
///
/// Later passes run only while capacity remains, so earlier passes always
/// appear first in the response.
pub async fn assign_tasks(
    store: &dyn Store,
    job: Uuid,
    worker: &str,
    capacity: usize,
) -> Result<Vec<Uuid>, DatabaseError> {
    let mut tasks = store.tasks_assigned_to(job, worker).await?;
    tasks.truncate(capacity);

    if tasks.len() < capacity {
        let claimed = store
            .claim_unassigned(job, worker, capacity - tasks.len())
            .await?;
        tasks.extend(claimed);
    }

    if tasks.len() < capacity {
        let reassigned = store
            .reassign_stale(job, worker, capacity - tasks.len())
            .await?;
        tasks.extend(reassigned);
    }

    tracing::debug!(%job, worker, count = tasks.len(), "Assigned tasks");
    Ok(tasks)
}
