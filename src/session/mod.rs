#![forbid(unsafe_code)]
//! Thread-local session area.
//!
//! Each thread owns one area holding the open-table registry, the error log
//! name, the transaction flag, the last engine status and the installed
//! [`SessionConfig`]. Tables opened on a thread are registered here and must
//! be used from that thread.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::trace;

use crate::error::EngineStatus;
use crate::types::TableHandle;

mod config;
mod transaction;

pub use config::{ConfigError, SessionConfig, RECORD_LOCK_DISABLED};
pub use transaction::Transaction;

/// Registry record for one open table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableEntry {
    /// Handle handed to the table.
    #[serde(serialize_with = "ser_handle")]
    pub handle: TableHandle,
    /// Logical table name.
    pub table_name: String,
    /// Physical file name.
    pub file_name: String,
    /// Backend kind the table is bound to.
    pub backend: &'static str,
}

fn ser_handle<S: serde::Serializer>(h: &TableHandle, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u32(h.get())
}

/// Snapshot of session flags.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    /// A transaction is active on this thread.
    pub in_transaction: bool,
    /// Number of registered tables.
    pub open_tables: usize,
    /// Status of the last engine call.
    pub last_status: EngineStatus,
}

#[derive(Default)]
struct SessionArea {
    tables: BTreeMap<u32, TableEntry>,
    next_handle: u32,
    err_file_name: Option<PathBuf>,
    in_transaction: bool,
    last_status: EngineStatus,
    config: Arc<SessionConfig>,
    access_guard: Vec<u8>,
}

thread_local! {
    static AREA: RefCell<SessionArea> = RefCell::new(SessionArea::default());
}

fn with_area<T>(f: impl FnOnce(&mut SessionArea) -> T) -> T {
    AREA.with(|area| f(&mut area.borrow_mut()))
}

/// Registers an open table and returns its fresh non-zero handle.
pub fn add_table_entry(table_name: &str, file_name: &str, backend: &'static str) -> TableHandle {
    with_area(|a| loop {
        a.next_handle = a.next_handle.wrapping_add(1);
        let Some(raw) = NonZeroU32::new(a.next_handle) else {
            continue;
        };
        if a.tables.contains_key(&raw.get()) {
            continue;
        }
        let handle = TableHandle(raw);
        a.tables.insert(
            raw.get(),
            TableEntry {
                handle,
                table_name: table_name.to_string(),
                file_name: file_name.to_string(),
                backend,
            },
        );
        trace!(handle = raw.get(), table = table_name, "session.table.add");
        return handle;
    })
}

/// Drops a registration; returns false when the handle was unknown.
pub fn free_table_entry(handle: TableHandle) -> bool {
    with_area(|a| a.tables.remove(&handle.get()).is_some())
}

/// Registration for `handle`.
pub fn get_table_entry(handle: TableHandle) -> Option<TableEntry> {
    with_area(|a| a.tables.get(&handle.get()).cloned())
}

/// Every registration, in handle order.
pub fn open_tables() -> Vec<TableEntry> {
    with_area(|a| a.tables.values().cloned().collect())
}

/// Derives the error log name from the installed config unless one is set.
pub fn init_err_file_name() -> Option<PathBuf> {
    with_area(|a| {
        if a.err_file_name.is_none() {
            a.err_file_name = a.config.err_log_path();
        }
        a.err_file_name.clone()
    })
}

/// Overrides the error log name.
pub fn set_err_file_name(path: Option<PathBuf>) {
    with_area(|a| a.err_file_name = path);
}

/// Current error log name.
pub fn err_file_name() -> Option<PathBuf> {
    with_area(|a| a.err_file_name.clone())
}

/// Session flags.
pub fn state() -> SessionState {
    with_area(|a| SessionState {
        in_transaction: a.in_transaction,
        open_tables: a.tables.len(),
        last_status: a.last_status,
    })
}

/// Marks whether a transaction is active on this thread.
pub fn set_in_transaction(active: bool) {
    with_area(|a| a.in_transaction = active);
}

/// Records the status of the last engine call.
pub fn record_status(status: EngineStatus) {
    with_area(|a| a.last_status = status);
}

/// Status of the last engine call.
pub fn last_status() -> EngineStatus {
    with_area(|a| a.last_status)
}

/// Installed config.
pub fn config() -> Arc<SessionConfig> {
    with_area(|a| Arc::clone(&a.config))
}

/// Installs `config` for this thread and forgets the derived error log name.
pub fn set_config(config: SessionConfig) {
    with_area(|a| {
        a.config = Arc::new(config);
        a.err_file_name = None;
    });
}

/// Sets the access-guard bytes presented on open.
pub fn set_access_guard(guard: Vec<u8>) {
    with_area(|a| a.access_guard = guard);
}

/// Access-guard bytes presented on open.
pub fn access_guard() -> Vec<u8> {
    with_area(|a| a.access_guard.clone())
}

/// Clears the area back to its initial state.
pub fn reset() {
    with_area(|a| *a = SessionArea::default());
}
