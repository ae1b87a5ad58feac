use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::catalog::DumpId;
use crate::error::{ErrorKind, RestoreError, RestoreResult};
use crate::restore_error;
use crate::workers::entry::EntryOutcome;

/// A worker that left the pool.
#[derive(Debug)]
pub enum WorkerExit {
    /// The worker ran to completion, successfully or not. A panic is reported as an
    /// [`ErrorKind::EntryWorkerPanic`] error of its entry.
    Finished {
        dump_id: DumpId,
        result: RestoreResult<EntryOutcome>,
    },
    /// The worker's task was canceled before it could report which entry it restored.
    Lost(RestoreError),
}

/// Tasks of the entry workers currently running.
#[derive(Debug, Default)]
pub struct RestoreWorkerPool {
    join_set: JoinSet<(DumpId, RestoreResult<EntryOutcome>)>,
}

impl RestoreWorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the worker restoring `dump_id`.
    pub fn spawn<F>(&mut self, dump_id: DumpId, future: F)
    where
        F: Future<Output = RestoreResult<EntryOutcome>> + Send + 'static,
    {
        self.join_set.spawn(async move {
            let result = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(restore_error!(
                    ErrorKind::EntryWorkerPanic,
                    "Entry worker panicked",
                    format!("dump id {dump_id}: {}", panic_message(panic.as_ref()))
                )),
            };

            (dump_id, result)
        });

        debug!(%dump_id, active = self.join_set.len(), "spawned entry worker");
    }

    pub fn len(&self) -> usize {
        self.join_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.join_set.is_empty()
    }

    /// Waits for the next worker to exit. Returns `None` when the pool is empty.
    pub async fn join_next(&mut self) -> Option<WorkerExit> {
        let exit = match self.join_set.join_next().await? {
            Ok((dump_id, result)) => WorkerExit::Finished { dump_id, result },
            Err(join_err) => {
                error!(error = %join_err, "entry worker task was lost");
                WorkerExit::Lost(join_err.into())
            }
        };

        Some(exit)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        return *message;
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message;
    }

    "unknown panic payload"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bail;

    #[tokio::test(flavor = "multi_thread")]
    async fn reports_results_with_their_dump_id() {
        let mut pool = RestoreWorkerPool::new();
        pool.spawn(DumpId(1), async {
            Ok(EntryOutcome {
                rows_loaded: 3,
                rows_skipped: 0,
            })
        });
        pool.spawn(DumpId(2), async {
            bail!(ErrorKind::InvalidData, "Broken entry");
        });
        assert_eq!(pool.len(), 2);

        let mut exits = Vec::new();
        while let Some(exit) = pool.join_next().await {
            let WorkerExit::Finished { dump_id, result } = exit else {
                panic!("worker lost");
            };
            exits.push((dump_id, result.map(|outcome| outcome.rows_loaded)));
        }
        exits.sort_by_key(|(dump_id, _)| *dump_id);

        assert_eq!(exits[0], (DumpId(1), Ok(3)));
        assert_eq!(exits[1].1.as_ref().unwrap_err().kind(), ErrorKind::InvalidData);
        assert!(pool.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panics_are_attributed_to_their_entry() {
        let mut pool = RestoreWorkerPool::new();
        pool.spawn(DumpId(5), async {
            if DumpId(5).0 == 5 {
                panic!("decoder exploded");
            }
            Ok(EntryOutcome::default())
        });

        let Some(WorkerExit::Finished { dump_id, result }) = pool.join_next().await else {
            panic!("expected a finished worker");
        };

        assert_eq!(dump_id, DumpId(5));
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntryWorkerPanic);
        assert!(err.detail().unwrap().contains("decoder exploded"));
    }
}
