//! Background record writer.
//!
//! `PersistenceWriter` implements `MatchStore` by queueing each write for a
//! blocking writer task, so the session never waits on disk. Failures in the
//! writer task are logged there; the session only sees a failure when the
//! writer is gone.

use kingside_record::{Completion, MatchHandle, MatchStore, StoreError};
use kingside_wire::{Identity, RecordedMove};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

enum StoreOp {
    Create {
        handle: MatchHandle,
        white: Identity,
        black: Identity,
        created_at_ms: u64,
    },
    AppendMove {
        handle: MatchHandle,
        entry: RecordedMove,
    },
    Complete {
        handle: MatchHandle,
        completion: Completion,
    },
}

impl StoreOp {
    fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create_match",
            Self::AppendMove { .. } => "append_move",
            Self::Complete { .. } => "complete",
        }
    }

    fn handle(&self) -> MatchHandle {
        match self {
            Self::Create { handle, .. }
            | Self::AppendMove { handle, .. }
            | Self::Complete { handle, .. } => *handle,
        }
    }

    fn apply(self, store: &mut dyn MatchStore) -> Result<(), StoreError> {
        match self {
            Self::Create {
                handle,
                white,
                black,
                created_at_ms,
            } => store.create_match(handle, &white, &black, created_at_ms),
            Self::AppendMove { handle, entry } => store.append_move(handle, entry),
            Self::Complete { handle, completion } => store.complete(handle, completion),
        }
    }
}

/// Queueing front of a store owned by the writer task.
#[derive(Clone)]
pub struct PersistenceWriter {
    tx: mpsc::UnboundedSender<StoreOp>,
}

impl PersistenceWriter {
    fn enqueue(&self, op: StoreOp) -> Result<(), StoreError> {
        self.tx.send(op).map_err(|_| StoreError::WriterClosed)
    }
}

impl MatchStore for PersistenceWriter {
    fn create_match(
        &mut self,
        handle: MatchHandle,
        white: &Identity,
        black: &Identity,
        created_at_ms: u64,
    ) -> Result<(), StoreError> {
        self.enqueue(StoreOp::Create {
            handle,
            white: white.clone(),
            black: black.clone(),
            created_at_ms,
        })
    }

    fn append_move(&mut self, handle: MatchHandle, entry: RecordedMove) -> Result<(), StoreError> {
        self.enqueue(StoreOp::AppendMove { handle, entry })
    }

    fn complete(&mut self, handle: MatchHandle, completion: Completion) -> Result<(), StoreError> {
        self.enqueue(StoreOp::Complete { handle, completion })
    }
}

/// Move `store` onto a blocking writer task.
///
/// The task exits once every `PersistenceWriter` clone is dropped and the
/// queue is drained, handing the store back.
pub fn spawn_writer<S>(mut store: S) -> (PersistenceWriter, JoinHandle<S>)
where
    S: MatchStore + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<StoreOp>();
    let task = tokio::task::spawn_blocking(move || {
        let mut failures = 0u64;
        while let Some(op) = rx.blocking_recv() {
            let (name, handle) = (op.name(), op.handle());
            match op.apply(&mut store) {
                Ok(()) => tracing::trace!(%handle, op = name, "record write applied"),
                Err(err) => {
                    failures += 1;
                    tracing::error!(%handle, op = name, error = %err, failures, "record write failed");
                }
            }
        }
        tracing::debug!(failures, "record writer stopped");
        store
    });
    (PersistenceWriter { tx }, task)
}

#[cfg(test)]
mod tests {
    use kingside_record::{EndReason, FileStore, MatchResult, MemoryStore};

    use super::*;

    fn alice() -> Identity {
        Identity::new("u-alice", "alice")
    }

    fn bob() -> Identity {
        Identity::new("u-bob", "bob")
    }

    #[tokio::test]
    async fn test_writes_reach_store_in_order() {
        let (mut writer, task) = spawn_writer(MemoryStore::new());
        let handle = MatchHandle::generate();

        writer.create_match(handle, &alice(), &bob(), 1).unwrap();
        writer
            .complete(
                handle,
                Completion {
                    result: MatchResult::Abandoned,
                    winner: None,
                    reason: EndReason::Abandoned,
                    final_fen: "fen".to_string(),
                    completed_at_ms: 2,
                },
            )
            .unwrap();
        drop(writer);

        let store = task.await.unwrap();
        let record = store.load(handle).unwrap();
        assert_eq!(record.status, "abandoned");
        assert_eq!(record.completed_at_ms, Some(2));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_writer_alive() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let (mut writer, task) = spawn_writer(store);
        let missing = MatchHandle::generate();
        let handle = MatchHandle::generate();

        // Unknown match: logged by the writer, not returned here
        writer
            .append_move(missing, RecordedMove::default())
            .unwrap();
        writer.create_match(handle, &alice(), &bob(), 0).unwrap();
        drop(writer);

        let store = task.await.unwrap();
        assert!(store.load(handle).is_ok());
        assert!(store.load(missing).is_err());
    }

    #[test]
    fn test_closed_writer_reports_failure() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut writer = PersistenceWriter { tx };

        let result = writer.create_match(MatchHandle::generate(), &alice(), &bob(), 0);
        assert!(matches!(result, Err(StoreError::WriterClosed)));
    }
}
