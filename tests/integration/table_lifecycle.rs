#![allow(missing_docs)]

use std::fs;
use std::sync::Arc;

use dbtable::{
    error::{EngineStatus, Result},
    schema::{FieldKind, TableSpec},
    session::{self, SessionConfig, Transaction, RECORD_LOCK_DISABLED},
    storage::{DirectBackend, IsamEngine, OpenMode, SearchMode, StatItems, StorageBackend},
    table::{ErrLogReporter, OpenFailureHandler, RecordTable, TableOptions},
    DbError, RowId,
};
use parking_lot::Mutex;
use tempfile::tempdir;

fn spec() -> TableSpec {
    TableSpec::new("Orders")
        .field("id", FieldKind::Int, 4)
        .field("customer", FieldKind::Char, 12)
        .field("qty", FieldKind::UInt, 2)
        .index(&["id"], false)
        .index(&["customer"], true)
}

fn setup() -> Result<(Arc<IsamEngine>, Arc<dyn StorageBackend>)> {
    session::reset();
    let engine = Arc::new(IsamEngine::new());
    let direct = DirectBackend::new(Arc::clone(&engine));
    direct.create_file("orders.btr", &spec())?;
    Ok((engine, Arc::new(direct)))
}

fn open(backend: &Arc<dyn StorageBackend>) -> Result<RecordTable> {
    RecordTable::open_new(
        "Orders",
        Some("orders.btr"),
        OpenMode::Normal,
        TableOptions::new(Arc::clone(backend)),
    )
}

fn put(table: &mut RecordTable, id: i32, customer: &str, qty: u16) -> Result<RowId> {
    table.clear_data_buf();
    table.set_field_value(0, &id.to_le_bytes())?;
    table.set_field_value(1, customer.as_bytes())?;
    table.set_field_value(2, &qty.to_le_bytes())?;
    table.insert_rec()
}

#[test]
fn open_and_close_are_idempotent() -> Result<()> {
    let (_engine, backend) = setup()?;
    let mut table = open(&backend)?;
    let handle = table.handle().expect("open table has a handle");
    assert_eq!(table.open("Orders", Some("orders.btr"), OpenMode::Normal)?, handle);
    assert_eq!(session::open_tables().len(), 1);
    assert_eq!(session::get_table_entry(handle).unwrap().table_name, "Orders");

    table.close()?;
    assert!(table.handle().is_none());
    assert!(!table.is_open());
    assert!(table.table_name().is_empty());
    assert!(session::open_tables().is_empty());
    table.close()?;
    assert!(session::get_table_entry(handle).is_none());
    Ok(())
}

#[test]
fn failed_open_reports_once_with_resolved_name() -> Result<()> {
    let (_engine, backend) = setup()?;
    let seen: Arc<Mutex<Vec<(String, EngineStatus)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let handler: Arc<dyn OpenFailureHandler> = Arc::new(move |file: &str, status: EngineStatus| {
        sink.lock().push((file.to_string(), status))
    });
    let options = TableOptions::new(backend).with_open_failure_handler(handler);
    let mut table = RecordTable::new(options);

    let err = table
        .open("Missing", Some("missing.btr"), OpenMode::Normal)
        .unwrap_err();
    assert_eq!(err.status(), Some(EngineStatus::FILE_NOT_FOUND));
    assert!(table.handle().is_none());
    assert_eq!(
        seen.lock().as_slice(),
        &[("missing.btr".to_string(), EngineStatus::FILE_NOT_FOUND)]
    );
    assert_eq!(session::last_status(), EngineStatus::FILE_NOT_FOUND);
    Ok(())
}

#[test]
fn err_log_reporter_appends_to_session_error_log() -> Result<()> {
    let (_engine, backend) = setup()?;
    let dir = tempdir()?;
    session::set_config(SessionConfig {
        log_dir: Some(dir.path().to_path_buf()),
        ..SessionConfig::default()
    });
    let options = TableOptions::new(backend).with_open_failure_handler(Arc::new(ErrLogReporter));
    let mut table = RecordTable::new(options);
    assert!(table.open("Gone", None, OpenMode::Normal).is_err());
    let path = table.last_error_file_name().expect("error log initialised");
    assert_eq!(path, dir.path().join("dberr.log"));
    let log = fs::read_to_string(path)?;
    assert!(log.contains("open failed: Gone (status 12)"), "{log}");
    Ok(())
}

#[test]
fn writes_outside_transactions_are_logged_not_blocked() -> Result<()> {
    let (_engine, backend) = setup()?;
    let dir = tempdir()?;
    session::set_config(SessionConfig {
        log_dir: Some(dir.path().to_path_buf()),
        ..SessionConfig::default()
    });
    let mut table = open(&backend)?;
    put(&mut table, 1, "acme", 3)?;
    let log_path = dir.path().join("dbwarn.log");
    let log = fs::read_to_string(&log_path)?;
    assert_eq!(log.lines().count(), 1);
    assert!(log.contains("\tinsert executed out of transaction: Orders(orders.btr)"));

    let tx = Transaction::begin(table.backend())?;
    put(&mut table, 2, "acme", 4)?;
    tx.commit()?;
    assert_eq!(fs::read_to_string(&log_path)?.lines().count(), 1);
    assert_eq!(table.file_stat(StatItems::RECORDS)?.records, 2);
    Ok(())
}

#[test]
fn suppressed_and_temporary_tables_skip_the_warning_log() -> Result<()> {
    let (engine, backend) = setup()?;
    let dir = tempdir()?;
    session::set_config(SessionConfig {
        log_dir: Some(dir.path().to_path_buf()),
        temp_dir: dir.path().to_path_buf(),
        ..SessionConfig::default()
    });
    let options = TableOptions::new(Arc::clone(&backend)).temporary(true);
    let mut temp = RecordTable::open_new("Orders", Some("orders.btr"), OpenMode::Normal, options)?;
    let temp_file = temp.file_name().to_string();
    assert_ne!(temp_file, "orders.btr");
    assert!(temp_file.ends_with(".tmp"));
    put(&mut temp, 1, "scratch", 1)?;
    assert!(!dir.path().join("dbwarn.log").exists());

    temp.close()?;
    assert!(!engine.btr_exists(&temp_file), "temporary file removed on close");
    assert!(engine.btr_exists("orders.btr"));
    Ok(())
}

#[test]
fn search_update_delete_cycle() -> Result<()> {
    let (_engine, backend) = setup()?;
    let mut table = open(&backend)?;
    for (id, customer) in [(3, "carol"), (1, "alice"), (2, "bob")] {
        put(&mut table, id, customer, 1)?;
    }

    let mut key = [0u8; 4];
    table.search(0, &mut key, SearchMode::First)?;
    assert_eq!(table.field_value(0), Some(&1i32.to_le_bytes()[..]));
    table.search_current(&mut key, SearchMode::Next)?;
    assert_eq!(&key, &2i32.to_le_bytes());
    assert_eq!(table.rec_to_string(true), "id=2; customer=bob; qty=1; ");

    table.set_field_value(2, &9u16.to_le_bytes())?;
    table.update_rec()?;
    let pos = table.get_position()?;
    assert_eq!(pos, table.position());

    table.clear_data_buf();
    let mut key = 2i32.to_le_bytes();
    table.get_direct(0, &mut key, pos)?;
    assert_eq!(table.field_value_by_name("qty"), Some(&9u16.to_le_bytes()[..]));

    table.delete_rec()?;
    let mut key = 2i32.to_le_bytes();
    let err = table.search(0, &mut key, SearchMode::Equal).unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(table.file_stat(StatItems::RECORDS)?.records, 2);
    Ok(())
}

#[test]
fn insert_with_key_and_buffer_variants() -> Result<()> {
    let (_engine, backend) = setup()?;
    let mut table = open(&backend)?;
    let mut rec = vec![0u8; table.rec_size()];
    rec[..4].copy_from_slice(&8i32.to_le_bytes());
    rec[4..8].copy_from_slice(b"dave");
    table.insert_rec_buf(&rec)?;

    table.set_field_value(0, &9i32.to_le_bytes())?;
    let mut key = [0u8; 12];
    table.insert_rec_with_key(1, &mut key)?;
    assert_eq!(&key[..4], b"dave");

    let err = table.insert_rec().unwrap_err();
    assert_eq!(err.status(), Some(EngineStatus::DUPLICATE_KEY));
    assert!(table.insert_rec_buf(&rec[..3]).is_err());
    Ok(())
}

#[test]
fn delete_by_query_runs_in_its_own_transaction() -> Result<()> {
    let (_engine, backend) = setup()?;
    let mut table = open(&backend)?;
    for id in 1..=6 {
        put(&mut table, id, if id % 2 == 0 { "even" } else { "odd" }, 1)?;
    }
    let deleted = table.delete_by_query(true, |rec| &rec[4..8] == b"even")?;
    assert_eq!(deleted, 3);
    assert_eq!(table.file_stat(StatItems::RECORDS)?.records, 3);
    // no transaction left open
    backend.begin_transaction()?;
    backend.abort_transaction()?;
    Ok(())
}

#[test]
fn dropped_transaction_rolls_back() -> Result<()> {
    let (_engine, backend) = setup()?;
    let mut table = open(&backend)?;
    put(&mut table, 1, "keep", 1)?;
    {
        let _tx = Transaction::begin(&backend)?;
        assert!(session::state().in_transaction);
        put(&mut table, 2, "lose", 1)?;
    }
    assert!(!session::state().in_transaction);
    assert_eq!(table.file_stat(StatItems::RECORDS)?.records, 1);
    Ok(())
}

#[test]
fn reread_for_update_honours_lock_sentinel() -> Result<()> {
    let (_engine, backend) = setup()?;
    let mut table = open(&backend)?;
    put(&mut table, 1, "alice", 1)?;
    let mut key = 1i32.to_le_bytes();
    table.search(0, &mut key, SearchMode::Equal)?;
    assert!(table.reread_for_update(0, &mut key)?);
    table.unlock()?;

    session::set_config(SessionConfig {
        wait_lock_tries: RECORD_LOCK_DISABLED,
        ..SessionConfig::default()
    });
    assert!(!table.reread_for_update(0, &mut key)?);
    Ok(())
}

#[test]
fn locked_rows_block_other_tables() -> Result<()> {
    let (_engine, backend) = setup()?;
    let mut first = open(&backend)?;
    let mut second = open(&backend)?;
    put(&mut first, 1, "alice", 1)?;

    let mut key = 1i32.to_le_bytes();
    first.search_for_update(0, &mut key, SearchMode::Equal)?;
    let err = second
        .search_for_update(0, &mut key, SearchMode::Equal)
        .unwrap_err();
    assert_eq!(err.status(), Some(EngineStatus::RECORD_LOCKED));
    first.unlock()?;
    second.search_for_update(0, &mut key, SearchMode::Equal)?;
    Ok(())
}

#[test]
fn read_only_open_rejects_writes() -> Result<()> {
    let (_engine, backend) = setup()?;
    let mut table = RecordTable::open_new(
        "Orders",
        Some("orders.btr"),
        OpenMode::ReadOnly,
        TableOptions::new(backend).suppress_tx_log(true),
    )?;
    let err = table.insert_rec().unwrap_err();
    assert_eq!(err.status(), Some(EngineStatus::ACCESS_DENIED));
    Ok(())
}

#[test]
fn guarded_file_opens_only_with_session_guard() -> Result<()> {
    let (engine, backend) = setup()?;
    engine.btr_set_owner("orders.btr", b"night-shift")?;

    let err = open(&backend).unwrap_err();
    assert_eq!(err.status(), Some(EngineStatus::INVALID_OWNER));
    assert_eq!(session::last_status(), EngineStatus::INVALID_OWNER);

    session::set_access_guard(b"night-shift".to_vec());
    let table = open(&backend)?;
    assert!(table.is_open());
    Ok(())
}

#[test]
fn operations_on_closed_table_fail_cleanly() -> Result<()> {
    let (_engine, backend) = setup()?;
    let mut table = RecordTable::new(TableOptions::new(backend));
    let mut key = [0u8; 4];
    assert!(matches!(
        table.search(0, &mut key, SearchMode::First),
        Err(DbError::NotOpen)
    ));
    assert!(matches!(table.get_position(), Err(DbError::NotOpen)));
    Ok(())
}

#[test]
fn open_bound_resolves_field_refs() -> Result<()> {
    let (_engine, backend) = setup()?;
    let (table, refs) = RecordTable::open_bound(
        "Orders",
        Some("orders.btr"),
        OpenMode::Normal,
        TableOptions::new(Arc::clone(&backend)),
        &["qty", "id"],
    )?;
    let handle = table.handle().unwrap();
    assert_eq!(refs.len(), 2);
    assert_eq!((refs[0].table, refs[0].field), (handle, 2));
    assert_eq!(refs[1].field, 0);
    assert_eq!(table.buf_len(), 18);

    let err = RecordTable::open_bound(
        "Orders",
        Some("orders.btr"),
        OpenMode::Normal,
        TableOptions::new(backend),
        &["nope"],
    )
    .unwrap_err();
    assert!(matches!(err, DbError::Invalid(_)));
    Ok(())
}
