#![allow(missing_docs)]

use std::sync::{Arc, Once};

use dbtable::{
    error::Result,
    primitives::bytes::ByteStream,
    schema::{FieldKind, TableSpec},
    storage::{DirectBackend, IsamEngine, LobTag, LobTransfer, OpenMode, SearchMode},
    table::{RecordTable, TableOptions},
    DbError,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("dbtable=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn open_docs(spec: TableSpec) -> Result<RecordTable> {
    init_tracing();
    let direct = DirectBackend::new(Arc::new(IsamEngine::new()));
    direct.create_file("docs.btr", &spec)?;
    let options = TableOptions::new(Arc::new(direct)).suppress_tx_log(true);
    RecordTable::open_new(&spec.name, Some("docs.btr"), OpenMode::Normal, options)
}

fn one_blob() -> TableSpec {
    TableSpec::new("docs")
        .field("id", FieldKind::Int, 4)
        .field("body", FieldKind::Blob, 64)
        .index(&["id"], false)
}

#[test]
fn small_payload_spills_and_restores() -> Result<()> {
    let mut table = open_docs(one_blob())?;
    let payload = b"0123456789";
    table.write_lob_data(1, payload, false)?;
    assert!(!table.lobs().cell(1).unwrap().is_ptr());

    assert_eq!(table.store_and_trim_lob()?, LobTransfer::Moved);
    assert!(table.read_lob_data(1)?.is_empty(), "in-record cell emptied");
    assert_eq!(table.lob_size(1), Some(0));
    assert!(table.buffer()[4..68].iter().all(|b| *b == 0));
    let storage = table.lob_storage().as_bytes();
    assert_eq!(storage.len(), 4 + 1 + 64, "size, format byte, flat region");
    assert_eq!(&storage[..4], &10u32.to_le_bytes());
    assert_eq!(storage[4], LobTag::Flat.to_byte());
    assert_eq!(&storage[5..15], payload);

    assert_eq!(table.restore_lob()?, LobTransfer::Moved);
    assert_eq!(table.read_lob_data(1)?, payload);
    assert!(table.lob_storage().is_empty());
    Ok(())
}

#[test]
fn large_payload_becomes_pointer_and_survives() -> Result<()> {
    let mut table = open_docs(one_blob())?;
    let payload: Vec<u8> = (0..200u32).map(|n| (n * 7) as u8).collect();
    table.write_lob_data(1, &payload, false)?;
    let cell = table.lobs().cell(1).unwrap();
    assert!(cell.is_ptr());
    assert_eq!(cell.ptr_size(), 200);

    table.store_and_trim_lob()?;
    assert!(!table.lobs().cell(1).unwrap().is_ptr());
    let storage = table.lob_storage().as_bytes();
    assert_eq!(storage.len(), 4 + 1 + 4 + 200);
    assert_eq!(storage[4], LobTag::Pointer.to_byte());

    table.restore_lob()?;
    assert!(table.lobs().cell(1).unwrap().is_ptr());
    assert_eq!(table.read_lob_data(1)?, payload.as_slice());
    Ok(())
}

#[test]
fn mixed_fields_round_trip_including_empty() -> Result<()> {
    let spec = TableSpec::new("docs")
        .field("a", FieldKind::Blob, 16)
        .field("n", FieldKind::Int, 4)
        .field("b", FieldKind::Clob, 16)
        .field("c", FieldKind::Blob, 16);
    let mut table = open_docs(spec)?;
    let long = vec![b'z'; 50];
    table.write_lob_data(0, b"head", false)?;
    table.write_lob_data(3, &long, false)?;
    table.set_field_value(1, &42i32.to_le_bytes())?;

    assert_eq!(table.store_and_trim_lob()?, LobTransfer::Moved);
    table.restore_lob()?;

    assert_eq!(table.read_lob_data(0)?, b"head");
    assert!(table.read_lob_data(2)?.is_empty());
    assert_eq!(table.read_lob_data(3)?, long.as_slice());
    assert_eq!(table.field_value(1), Some(&42i32.to_le_bytes()[..]));
    Ok(())
}

#[test]
fn spill_with_every_field_empty_moves_nothing() -> Result<()> {
    let mut table = open_docs(one_blob())?;
    assert_eq!(table.store_and_trim_lob()?, LobTransfer::Nothing);
    assert_eq!(table.lob_storage().len(), 4);
    assert_eq!(table.restore_lob()?, LobTransfer::Nothing);
    Ok(())
}

#[test]
fn restore_without_spill_is_rejected() -> Result<()> {
    let mut table = open_docs(one_blob())?;
    let err = table.restore_lob().unwrap_err();
    assert!(matches!(err, DbError::Invalid(_)));
    Ok(())
}

#[test]
fn tables_without_lobs_report_not_applicable() -> Result<()> {
    let spec = TableSpec::new("docs").field("id", FieldKind::Int, 4);
    let mut table = open_docs(spec)?;
    assert!(!table.has_lob(false));
    assert_eq!(table.store_and_trim_lob()?, LobTransfer::NotApplicable);
    assert_eq!(table.restore_lob()?, LobTransfer::NotApplicable);
    Ok(())
}

#[test]
fn payload_travels_beside_the_stored_record() -> Result<()> {
    let mut table = open_docs(one_blob())?;
    let payload = vec![0xab; 300];
    table.set_field_value(0, &5i32.to_le_bytes())?;
    table.write_lob_data(1, &payload, false)?;

    table.store_and_trim_lob()?;
    let carried = table.take_lob_storage();
    table.insert_rec()?;

    table.clear_data_buf();
    let mut key = 5i32.to_le_bytes();
    table.search(0, &mut key, SearchMode::Equal)?;
    assert!(table.read_lob_data(1)?.is_empty());

    table.set_lob_storage(carried);
    table.restore_lob()?;
    assert_eq!(table.read_lob_data(1)?, payload.as_slice());
    Ok(())
}

#[test]
fn forced_canonical_write_allocates_even_when_small() -> Result<()> {
    let mut table = open_docs(one_blob())?;
    table.write_lob_data(1, b"abc", true)?;
    assert!(table.lobs().cell(1).unwrap().is_ptr());
    assert_eq!(table.read_lob_data(1)?, b"abc");
    assert!(table.buffer()[4..68].iter().all(|b| *b == 0));

    table.write_lob_data(1, b"", true)?;
    assert!(!table.lobs().cell(1).unwrap().is_ptr());
    assert!(table.read_lob_data(1)?.is_empty());
    Ok(())
}

#[test]
fn spill_stream_restores_into_a_freshly_opened_table() -> Result<()> {
    let spec = TableSpec::new("docs")
        .field("id", FieldKind::Int, 4)
        .field("body", FieldKind::Blob, 64)
        .field("note", FieldKind::Clob, 16);
    let mut source = open_docs(spec.clone())?;
    let body: Vec<u8> = (0..250u32).map(|n| (n % 251) as u8).collect();
    source.write_lob_data(1, &body, false)?;
    source.write_lob_data(2, b"short", false)?;
    source.store_and_trim_lob()?;
    let carried = source.take_lob_storage();
    drop(source);

    let mut target = open_docs(spec)?;
    target.set_lob_storage(carried);
    assert_eq!(target.restore_lob()?, LobTransfer::Moved);
    assert!(target.lobs().cell(1).unwrap().is_ptr());
    assert_eq!(target.read_lob_data(1)?, body.as_slice());
    assert_eq!(target.read_lob_data(2)?, b"short");
    assert_eq!(target.lob_size(1), Some(250));
    Ok(())
}

#[test]
fn truncated_pointer_stream_fails_without_allocating() -> Result<()> {
    let mut table = open_docs(one_blob())?;
    let mut stream = ByteStream::new();
    stream.write_u32(1000);
    stream.write_u8(LobTag::Pointer.to_byte());
    stream.write_u32(1_000_000);
    stream.write(&[0x11; 10]);
    table.set_lob_storage(stream);

    let err = table.restore_lob().unwrap_err();
    assert!(matches!(err, DbError::Corruption(_)));
    let cell = table.lobs().cell(1).unwrap();
    assert!(!cell.is_ptr());
    assert_eq!(cell.ptr_size(), 0);
    assert_eq!(table.lob_size(1), Some(0));
    assert!(table.lob_storage().is_empty());
    Ok(())
}

#[test]
fn stream_with_leftover_bytes_is_rejected() -> Result<()> {
    let mut table = open_docs(one_blob())?;
    table.write_lob_data(1, b"tail", false)?;
    table.store_and_trim_lob()?;
    let mut bytes = table.take_lob_storage().into_bytes();
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    table.set_lob_storage(ByteStream::from_bytes(bytes));

    let err = table.restore_lob().unwrap_err();
    assert!(matches!(err, DbError::Corruption(_)));
    Ok(())
}
