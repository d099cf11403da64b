//! Shared fixtures for table tests.

use crate::TableConfig;
use crate::cursor::Row;
use crate::table::{ColumnDef, GroupTable};
use crate::value::Value;
use std::path::Path;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 4 KiB blocks, 4 rows per segment, small growth steps.
pub fn small_config() -> TableConfig {
    TableConfig {
        block_size: 4096,
        segment_rows: 4,
        enlarge_blocks: 2,
        ..TableConfig::default()
    }
}

/// `(id: Int key, amount: Long value)` table.
pub fn create_id_table(path: &Path, config: &TableConfig) -> GroupTable {
    GroupTable::create(
        path,
        &[ColumnDef::key("id"), ColumnDef::value("amount")],
        config,
    )
    .unwrap()
}

/// Rows `[Int(k), Long(k * 10)]` for every `k` in `range`.
pub fn id_rows(range: std::ops::Range<i32>) -> Vec<Row> {
    range
        .map(|k| vec![Value::Int(k), Value::Long(i64::from(k) * 10)])
        .collect()
}
