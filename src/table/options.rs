use std::fmt;
use std::sync::Arc;

use tracing::error;

use super::diag;
use crate::error::EngineStatus;
use crate::session;
use crate::storage::backend::StorageBackend;

/// Receives the resolved file name and engine status of a failed open.
///
/// Called exactly once per failed [`RecordTable::open`](super::RecordTable::open).
pub trait OpenFailureHandler: Send + Sync {
    /// Reports one failure.
    fn on_open_failure(&self, file_name: &str, status: EngineStatus);
}

impl<F> OpenFailureHandler for F
where
    F: Fn(&str, EngineStatus) + Send + Sync,
{
    fn on_open_failure(&self, file_name: &str, status: EngineStatus) {
        self(file_name, status)
    }
}

/// Appends open failures to the session error log.
#[derive(Copy, Clone, Debug, Default)]
pub struct ErrLogReporter;

impl OpenFailureHandler for ErrLogReporter {
    fn on_open_failure(&self, file_name: &str, status: EngineStatus) {
        error!(file = file_name, %status, "table.open.failed");
        if let Some(path) = session::init_err_file_name() {
            let line = format!(
                "{}\topen failed: {} (status {})",
                diag::timestamp(),
                file_name,
                status
            );
            diag::append_line_or_warn(&path, &line);
        }
    }
}

/// Construction-time settings of a [`RecordTable`](super::RecordTable).
#[derive(Clone)]
pub struct TableOptions {
    /// Backend every call is routed to.
    pub backend: Arc<dyn StorageBackend>,
    /// Open-failure handler.
    pub on_open_failure: Option<Arc<dyn OpenFailureHandler>>,
    /// Open materializes a fresh temporary file, removed on close.
    pub temporary: bool,
    /// Table belongs to the schema dictionary itself.
    pub schema_table: bool,
    /// Skip out-of-transaction reporting for this table.
    pub suppress_tx_log: bool,
}

impl TableOptions {
    /// Options routed to `backend` with nothing else set.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            on_open_failure: None,
            temporary: false,
            schema_table: false,
            suppress_tx_log: false,
        }
    }

    /// Installs an open-failure handler.
    pub fn with_open_failure_handler(mut self, handler: Arc<dyn OpenFailureHandler>) -> Self {
        self.on_open_failure = Some(handler);
        self
    }

    /// Marks the table temporary.
    pub fn temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    /// Marks the table as a schema table.
    pub fn schema_table(mut self, schema_table: bool) -> Self {
        self.schema_table = schema_table;
        self
    }

    /// Turns out-of-transaction reporting off.
    pub fn suppress_tx_log(mut self, suppress: bool) -> Self {
        self.suppress_tx_log = suppress;
        self
    }
}

impl fmt::Debug for TableOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableOptions")
            .field("backend", &self.backend.kind())
            .field("on_open_failure", &self.on_open_failure.is_some())
            .field("temporary", &self.temporary)
            .field("schema_table", &self.schema_table)
            .field("suppress_tx_log", &self.suppress_tx_log)
            .finish()
    }
}
