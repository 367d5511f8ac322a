#![allow(missing_docs)]

use std::sync::Arc;

use dbtable::{
    error::{EngineStatus, Result},
    schema::{FieldKind, TableSpec},
    session,
    storage::{
        DictProvider, DirectBackend, IsamEngine, OpenMode, SearchMode, StatItems, StorageBackend,
    },
    table::{RecordTable, TableOptions},
    RowId,
};

fn spec() -> TableSpec {
    TableSpec::new("Stock")
        .field("sku", FieldKind::Int, 4)
        .field("bin", FieldKind::Char, 6)
        .field("qty", FieldKind::Int, 4)
        .field("serial", FieldKind::AutoInc, 4)
        .index(&["sku"], false)
        .index(&["bin", "qty"], true)
}

fn direct_table() -> Result<RecordTable> {
    let direct = DirectBackend::new(Arc::new(IsamEngine::new()));
    direct.create_file("stock.btr", &spec())?;
    RecordTable::open_new(
        "Stock",
        Some("stock.btr"),
        OpenMode::Normal,
        TableOptions::new(Arc::new(direct)).suppress_tx_log(true),
    )
}

fn provider_table() -> Result<RecordTable> {
    let provider = DictProvider::new(Arc::new(IsamEngine::new()), "/srv/data");
    provider.register(spec())?;
    RecordTable::open_new(
        "Stock",
        None,
        OpenMode::Normal,
        TableOptions::new(Arc::new(provider)).suppress_tx_log(true),
    )
}

fn outcome<T: std::fmt::Display>(res: Result<T>, table: &RecordTable) -> String {
    match res {
        Ok(v) => format!("ok {v} | {}", table.rec_to_string(true)),
        Err(err) => format!("err {}", err.status().unwrap_or(EngineStatus(-1))),
    }
}

fn put(table: &mut RecordTable, sku: i32, bin: &str, qty: i32) -> String {
    table.clear_data_buf();
    let res = table
        .set_field_value(0, &sku.to_le_bytes())
        .and_then(|()| table.set_field_value(1, bin.as_bytes()))
        .and_then(|()| table.set_field_value(2, &qty.to_le_bytes()))
        .and_then(|()| table.insert_rec());
    outcome(res, table)
}

fn seek(table: &mut RecordTable, idx: usize, key: &[u8], mode: SearchMode) -> String {
    let mut key = key.to_vec();
    key.resize(table.key_size(idx), 0);
    let res = table.search(idx, &mut key, mode);
    outcome(res, table)
}

fn script(table: &mut RecordTable) -> Vec<String> {
    let mut log = Vec::new();
    log.push(put(table, 30, "A1", 5));
    log.push(put(table, 10, "B2", 7));
    log.push(put(table, 20, "A1", 2));
    log.push(put(table, 40, "C3", 1));
    log.push(put(table, 10, "Z9", 9));

    log.push(seek(table, 0, &20i32.to_le_bytes(), SearchMode::Equal));
    log.push(seek(table, 0, &25i32.to_le_bytes(), SearchMode::Equal));
    log.push(seek(table, 0, &25i32.to_le_bytes(), SearchMode::GreaterOrEqual));
    log.push(seek(table, 0, &30i32.to_le_bytes(), SearchMode::Greater));
    log.push(seek(table, 0, &30i32.to_le_bytes(), SearchMode::Less));
    log.push(seek(table, 0, &30i32.to_le_bytes(), SearchMode::LessOrEqual));
    log.push(seek(table, 0, &[], SearchMode::Last));
    log.push(seek(table, 0, &[], SearchMode::Next));
    log.push(seek(table, 1, b"A1", SearchMode::GreaterOrEqual));
    log.push(seek(table, 1, &[], SearchMode::Next));
    log.push(seek(table, 1, &[], SearchMode::Next));
    log.push(seek(table, 5, &[], SearchMode::First));

    let res = table
        .set_field_value(2, &11i32.to_le_bytes())
        .and_then(|()| table.update_rec());
    log.push(outcome(res.map(|()| "updated"), table));
    log.push(seek(table, 1, &[], SearchMode::Prev));
    let res = table.delete_rec().map(|()| "deleted");
    log.push(outcome(res, table));
    let res = table.get_position();
    log.push(outcome(res, table));

    let res = table.delete_by_query(true, |rec| rec[4] == b'C');
    log.push(outcome(res, table));
    let stat = table
        .file_stat(StatItems::RECORDS | StatItems::KEYS | StatItems::REC_SIZE | StatItems::FLAGS);
    log.push(format!("{:?}", stat.map(|s| (s.records, s.keys, s.rec_size, s.flags)).ok()));

    let mut key = [0u8; 4];
    let res = table.get_direct(0, &mut key, RowId::from_record_number(2));
    log.push(outcome(res.map(|()| "direct"), table));
    log.push(format!("{key:?}"));
    log
}

#[test]
fn direct_and_dictionary_paths_agree() -> Result<()> {
    session::reset();
    let mut direct = direct_table()?;
    let mut provider = provider_table()?;
    assert_eq!(direct.backend().kind(), "direct");
    assert_eq!(provider.backend().kind(), "dictionary");
    assert_eq!(provider.file_name(), "/srv/data/stock.btr");

    let a = script(&mut direct);
    let b = script(&mut provider);
    for (n, (x, y)) in a.iter().zip(&b).enumerate() {
        assert_eq!(x, y, "step {n} diverged");
    }
    assert_eq!(a.len(), b.len());

    assert!(a[0].starts_with("ok 1 | sku=30; bin=A1; qty=5; serial=1;"), "{}", a[0]);
    assert_eq!(a[4], format!("err {}", EngineStatus::DUPLICATE_KEY));
    assert_eq!(a[6], format!("err {}", EngineStatus::KEY_NOT_FOUND));
    assert_eq!(a[12], format!("err {}", EngineStatus::END_OF_FILE));
    assert_eq!(a[16], format!("err {}", EngineStatus::INVALID_KEY_NUMBER));
    Ok(())
}

#[test]
fn dictionary_toml_drives_open() -> Result<()> {
    session::reset();
    let provider = Arc::new(DictProvider::new(Arc::new(IsamEngine::new()), "/srv/data"));
    let loaded = provider.load_dictionary(
        r#"
[[tables]]
name = "Notes"
file_name = "notes.dat"
[[tables.fields]]
name = "id"
kind = "autoinc"
size = 4
[[tables.fields]]
name = "text"
kind = "note"
size = 40
[[tables.indexes]]
segments = ["id"]
"#,
    )?;
    assert_eq!(loaded, 1);
    let backend: Arc<dyn StorageBackend> = provider;
    let mut table = RecordTable::open_new(
        "Notes",
        None,
        OpenMode::Normal,
        TableOptions::new(Arc::clone(&backend)).schema_table(true),
    )?;
    assert_eq!(table.file_name(), "/srv/data/notes.dat");
    assert!(table.has_note(true));
    assert!(!table.has_lob(false));

    table.set_field_value(1, b"first")?;
    assert_eq!(table.insert_rec()?, RowId::from_record_number(1));
    assert_eq!(table.field_value(0), Some(&1u32.to_le_bytes()[..]));
    Ok(())
}

#[test]
fn provider_rejects_unknown_tables_and_names_temp_files() -> Result<()> {
    session::reset();
    let provider = DictProvider::new(Arc::new(IsamEngine::new()), "/srv/data");
    provider.register(spec())?;
    let backend: Arc<dyn StorageBackend> = Arc::new(provider);

    let err = RecordTable::open_new(
        "Nope",
        None,
        OpenMode::Normal,
        TableOptions::new(Arc::clone(&backend)),
    )
    .unwrap_err();
    assert_eq!(err.status(), Some(EngineStatus::FILE_NOT_FOUND));

    let temp = RecordTable::open_new(
        "Stock",
        None,
        OpenMode::Normal,
        TableOptions::new(backend).temporary(true),
    )?;
    assert!(temp.file_name().starts_with("/srv/data/~Stock"));
    let stat = temp.file_stat(StatItems::FLAGS)?;
    assert_eq!(stat.flags & dbtable::storage::backend::FILE_FLAG_TEMPORARY, 1);
    Ok(())
}

#[test]
fn exclusive_open_excludes_other_openers() -> Result<()> {
    session::reset();
    let engine = Arc::new(IsamEngine::new());
    let direct = DirectBackend::new(Arc::clone(&engine));
    direct.create_file("stock.btr", &spec())?;
    let backend: Arc<dyn StorageBackend> = Arc::new(direct);
    let _held = RecordTable::open_new(
        "Stock",
        Some("stock.btr"),
        OpenMode::Exclusive,
        TableOptions::new(Arc::clone(&backend)),
    )?;
    let err = RecordTable::open_new(
        "Stock",
        Some("stock.btr"),
        OpenMode::Normal,
        TableOptions::new(backend),
    )
    .unwrap_err();
    assert_eq!(err.status(), Some(EngineStatus::FILE_IN_USE));
    Ok(())
}
