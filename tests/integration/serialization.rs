#![allow(missing_docs)]

use std::sync::Arc;

use dbtable::{
    error::Result,
    primitives::bytes::ByteStream,
    schema::{FieldKind, FieldList, TableSpec},
    storage::{Dir, DirectBackend, IsamEngine, OpenMode, SerializeContext},
    table::{RecordTable, TableOptions},
    DbError,
};

fn spec() -> TableSpec {
    TableSpec::new("Parts")
        .field("id", FieldKind::Int, 4)
        .field("name", FieldKind::Char, 10)
        .field("drawing", FieldKind::Blob, 8)
        .index(&["id"], false)
        .index(&["name", "id"], true)
}

fn options() -> TableOptions {
    let direct = DirectBackend::new(Arc::new(IsamEngine::new()));
    TableOptions::new(Arc::new(direct)).suppress_tx_log(true)
}

fn open_parts() -> Result<RecordTable> {
    let direct = DirectBackend::new(Arc::new(IsamEngine::new()));
    direct.create_file("parts.btr", &spec())?;
    RecordTable::open_new(
        "Parts",
        Some("parts.btr"),
        OpenMode::Normal,
        TableOptions::new(Arc::new(direct)).suppress_tx_log(true),
    )
}

#[test]
fn spec_rebuilds_layout_and_lob_registry() -> Result<()> {
    let mut src = open_parts()?;
    let ctx = SerializeContext::new();
    let mut stream = ByteStream::new();
    src.serialize_spec(Dir::Write, &ctx, &mut stream)?;

    let mut dst = RecordTable::new(options());
    dst.serialize_spec(Dir::Read, &ctx, &mut stream)?;
    assert_eq!(stream.available(), 0);
    assert_eq!(dst.table_name(), "Parts");
    assert_eq!(dst.rec_size(), 22);
    assert_eq!(dst.indexes().num_keys(), 2);
    assert_eq!(dst.key_size(1), 14);
    assert!(dst.has_lob(true));
    assert_eq!(dst.lob_field(0), Some(2));
    Ok(())
}

#[test]
fn truncated_spec_leaves_table_untouched() -> Result<()> {
    let mut src = open_parts()?;
    let ctx = SerializeContext::new();
    let mut stream = ByteStream::new();
    src.serialize_spec(Dir::Write, &ctx, &mut stream)?;
    let bytes = stream.as_bytes();
    let mut cut = ByteStream::from_bytes(bytes[..bytes.len() - 3].to_vec());

    let mut dst = RecordTable::new(options());
    let err = dst.serialize_spec(Dir::Read, &ctx, &mut cut).unwrap_err();
    assert!(matches!(err, DbError::Corruption(_)));
    assert!(dst.table_name().is_empty());
    assert!(dst.fields().is_empty());
    Ok(())
}

#[test]
fn record_with_lob_travels_with_its_spill_stream() -> Result<()> {
    let mut src = open_parts()?;
    src.set_field_value(0, &77i32.to_le_bytes())?;
    src.set_field_value(1, b"bracket")?;
    let drawing: Vec<u8> = (1..=40).collect();
    src.write_lob_data(2, &drawing, false)?;

    let mut ctx = SerializeContext::new();
    let mut stream = ByteStream::new();
    src.store_and_trim_lob()?;
    let lob_stream = src.take_lob_storage();
    src.serialize_record(Dir::Write, &mut ctx, &mut stream)?;
    assert_eq!(ctx.struct_count(), 1);

    let mut dst = open_parts()?;
    dst.serialize_record(Dir::Read, &mut ctx, &mut stream)?;
    dst.set_lob_storage(lob_stream);
    dst.restore_lob()?;
    assert_eq!(dst.rec_to_string(true), "id=77; name=bracket; drawing=lob(flat=8); ");
    assert_eq!(dst.read_lob_data(2)?, drawing.as_slice());
    Ok(())
}

#[test]
fn record_count_mismatch_is_corruption() -> Result<()> {
    let mut ctx = SerializeContext::new();
    let narrow = FieldList::new().with("id", FieldKind::Int, 4)?;
    let mut stream = ByteStream::new();
    ctx.write_record("Parts", &narrow, &[1, 0, 0, 0], &mut stream)?;

    let mut dst = open_parts()?;
    let err = dst
        .serialize_record(Dir::Read, &mut ctx, &mut stream)
        .unwrap_err();
    assert!(matches!(err, DbError::Corruption(_)));
    Ok(())
}

#[test]
fn array_read_clears_destination_and_trims_headroom() -> Result<()> {
    let table = open_parts()?;
    let mut rows = Vec::new();
    for id in 0..5i32 {
        let mut row = vec![0u8; table.rec_size()];
        row[..4].copy_from_slice(&id.to_le_bytes());
        row[4..4 + 3].copy_from_slice(b"bol");
        rows.push(row);
    }
    let mut ctx = SerializeContext::new();
    let mut stream = ByteStream::new();
    table.serialize_array(Dir::Write, &mut ctx, &mut stream, &mut rows)?;

    let mut out = vec![vec![1u8; 2]; 9];
    table.serialize_array(Dir::Read, &mut ctx, &mut stream, &mut out)?;
    assert_eq!(out.len(), 5);
    assert!(out.iter().all(|r| r.len() == table.rec_size()));
    assert_eq!(out, rows);
    Ok(())
}

#[test]
fn array_read_keeps_elements_before_a_bad_one() -> Result<()> {
    let table = open_parts()?;
    let mut ctx = SerializeContext::new();
    let mut stream = ByteStream::new();
    stream.write_var(3);
    ctx.write_record("Parts", table.fields(), &[0u8; 22], &mut stream)?;
    ctx.write_record("Parts", table.fields(), &[0u8; 22], &mut stream)?;

    let mut out = Vec::new();
    let err = table
        .serialize_array(Dir::Read, &mut ctx, &mut stream, &mut out)
        .unwrap_err();
    assert!(matches!(err, DbError::Corruption(_)));
    assert_eq!(out.len(), 2);
    Ok(())
}

#[test]
fn scalars_follow_direction() -> Result<()> {
    let ctx = SerializeContext::new();
    let mut stream = ByteStream::new();
    let mut n = -12;
    let mut s = String::from("dbtable");
    ctx.serialize_i32(Dir::from_sign(1).unwrap(), &mut n, &mut stream)?;
    ctx.serialize_str(Dir::Write, &mut s, &mut stream)?;

    let (mut n2, mut s2) = (0, String::new());
    ctx.serialize_i32(Dir::from_sign(-1).unwrap(), &mut n2, &mut stream)?;
    ctx.serialize_str(Dir::Read, &mut s2, &mut stream)?;
    assert_eq!((n2, s2.as_str()), (-12, "dbtable"));
    assert!(Dir::from_sign(0).is_none());
    Ok(())
}
