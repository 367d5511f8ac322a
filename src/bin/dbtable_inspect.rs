//! Inspection tool for row addresses, table specs and LOB spilling.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use dbtable::schema::{FieldKind, TableSpec};
use dbtable::session::{self, SessionConfig};
use dbtable::storage::{DirectBackend, IsamEngine, OpenMode};
use dbtable::table::{RecordTable, TableOptions};
use dbtable::types::{RowId, RowIdParse};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "dbtable-inspect",
    version,
    about = "Inspect row addresses, table specs and LOB spill streams"
)]
struct Cli {
    #[arg(long, global = true, value_name = "FILE", help = "Session config (TOML)")]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        env = "DBTABLE_LOG",
        default_value = "warn",
        help = "Tracing filter directive"
    )]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify a row address and print it back.
    Rowid {
        #[arg(value_name = "TEXT")]
        text: String,
    },
    /// Open a table described by a TOML spec and dump it.
    Spec {
        #[arg(value_name = "TOML")]
        path: PathBuf,
    },
    /// Spill and restore a synthetic record with two BLOB fields.
    LobDemo {
        #[arg(long, default_value_t = 10, help = "Payload size of the first field")]
        small: usize,
        #[arg(long, default_value_t = 200, help = "Payload size of the second field")]
        large: usize,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log)?)
        .with_writer(std::io::stderr)
        .try_init();
    if let Some(path) = &cli.config {
        session::set_config(SessionConfig::load(path)?);
    }
    match cli.command {
        Command::Rowid { text } => cmd_rowid(cli.format, &text),
        Command::Spec { path } => cmd_spec(&path),
        Command::LobDemo { small, large } => cmd_lob_demo(cli.format, small, large),
    }
}

fn cmd_rowid(format: OutputFormat, text: &str) -> Result<(), Box<dyn Error>> {
    let (id, kind) = RowId::parse(text);
    let kind = match kind {
        RowIdParse::Empty => "empty",
        RowIdParse::Numeric => "numeric",
        RowIdParse::Opaque => "opaque",
    };
    match format {
        OutputFormat::Json => {
            let value = json!({
                "input": text,
                "kind": kind,
                "long": id.is_long(),
                "text": id.to_string(),
                "bytes": hex::encode(id.as_bytes()),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("kind   {kind}");
            println!("long   {}", id.is_long());
            println!("text   {id}");
            println!("bytes  {}", hex::encode(id.as_bytes()));
        }
    }
    Ok(())
}

fn cmd_spec(path: &Path) -> Result<(), Box<dyn Error>> {
    let spec = TableSpec::from_toml_str(&fs::read_to_string(path)?)?;
    let direct = DirectBackend::new(Arc::new(IsamEngine::new()));
    let file = spec
        .file_name
        .clone()
        .unwrap_or_else(|| format!("{}.btr", spec.name.to_lowercase()));
    direct.create_file(&file, &spec)?;
    let options = TableOptions::new(Arc::new(direct)).suppress_tx_log(true);
    let table = RecordTable::open_new(&spec.name, Some(&file), OpenMode::ReadOnly, options)?;
    println!("{}", serde_json::to_string_pretty(&table.debug_output())?);
    Ok(())
}

fn cmd_lob_demo(format: OutputFormat, small: usize, large: usize) -> Result<(), Box<dyn Error>> {
    let spec = TableSpec::new("lob_demo")
        .field("id", FieldKind::Int, 4)
        .field("a", FieldKind::Blob, 64)
        .field("b", FieldKind::Clob, 64);
    let direct = DirectBackend::new(Arc::new(IsamEngine::new()));
    direct.create_file("lob_demo.btr", &spec)?;
    let options = TableOptions::new(Arc::new(direct)).temporary(true);
    let mut table =
        RecordTable::open_new("lob_demo", Some("lob_demo.btr"), OpenMode::Normal, options)?;

    let first: Vec<u8> = (0..small).map(|n| n as u8).collect();
    let second: Vec<u8> = (0..large).map(|n| b'a' + (n % 26) as u8).collect();
    table.write_lob_data(1, &first, false)?;
    table.write_lob_data(2, &second, false)?;
    let pointers = [
        table.lobs().cell(1).is_some_and(|c| c.is_ptr()),
        table.lobs().cell(2).is_some_and(|c| c.is_ptr()),
    ];

    let spilled = table.store_and_trim_lob()?;
    let stream = table.lob_storage().as_bytes().to_vec();
    let trimmed = table.buffer().iter().all(|b| *b == 0);
    let restored = table.restore_lob()?;
    let intact = table.read_lob_data(1)? == first.as_slice()
        && table.read_lob_data(2)? == second.as_slice();

    match format {
        OutputFormat::Json => {
            let value = json!({
                "pointer_cells": pointers,
                "spill": format!("{spilled:?}"),
                "stream_len": stream.len(),
                "stream": hex::encode(&stream),
                "record_trimmed": trimmed,
                "restore": format!("{restored:?}"),
                "intact": intact,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("pointer cells   a={} b={}", pointers[0], pointers[1]);
            println!("spill           {spilled:?}, {} bytes", stream.len());
            println!("record trimmed  {trimmed}");
            println!("restore         {restored:?}");
            println!("payloads intact {intact}");
            for chunk in stream.chunks(32) {
                println!("  {}", hex::encode(chunk));
            }
        }
    }
    table.close()?;
    Ok(())
}
