//! Append-only diagnostic log files.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use time::macros::format_description;
use time::OffsetDateTime;
use tracing::warn;

use crate::session::SessionConfig;

pub(crate) fn timestamp() -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::now_utc()
        .format(format)
        .unwrap_or_else(|_| String::from("-"))
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

pub(crate) fn append_line_or_warn(path: &Path, line: &str) {
    if let Err(err) = append_line(path, line) {
        warn!(path = %path.display(), error = %err, "diag.append_failed");
    }
}

/// Reports a write made while no transaction is active. Never fails.
pub(crate) fn out_of_transaction(config: &SessionConfig, op: &str, table: &str, file: &str) {
    warn!(op, table, file, "table.write.out_of_transaction");
    if let Some(path) = config.warn_log_path() {
        let line = format!(
            "{}\t{op} executed out of transaction: {table}({file})",
            timestamp()
        );
        append_line_or_warn(&path, &line);
    }
}
