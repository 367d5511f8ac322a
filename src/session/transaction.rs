use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::backend::StorageBackend;

/// Engine transaction scoped to the current thread's session.
///
/// Sets the session's transaction flag while alive. Dropping without
/// [`commit`](Transaction::commit) rolls back.
pub struct Transaction {
    backend: Arc<dyn StorageBackend>,
    finished: bool,
    _thread: PhantomData<Rc<()>>,
}

impl Transaction {
    /// Starts a transaction on `backend`.
    pub fn begin(backend: &Arc<dyn StorageBackend>) -> Result<Self> {
        backend.begin_transaction()?;
        super::set_in_transaction(true);
        debug!(backend = backend.kind(), "session.tx.begin");
        Ok(Self {
            backend: Arc::clone(backend),
            finished: false,
            _thread: PhantomData,
        })
    }

    /// Commits.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        super::set_in_transaction(false);
        self.backend.commit_transaction()
    }

    /// Rolls back.
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        super::set_in_transaction(false);
        self.backend.abort_transaction()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        super::set_in_transaction(false);
        if let Err(err) = self.backend.abort_transaction() {
            warn!(error = %err, "session.tx.drop_abort_failed");
        }
    }
}
