//! Dimension fixtures for join tests.

use crate::cursor::{MemoryCursor, Row};
use crate::join::{FieldExpr, JoinItem, JoinItemSpec, JoinKind};
use crate::value::Value;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `(k, v)` dimension rows from `(key, value)` pairs.
pub fn kv(pairs: &[(i32, i64)]) -> MemoryCursor {
    let rows: Vec<Row> = pairs
        .iter()
        .map(|(k, v)| vec![Value::Int(*k), Value::Long(*v)])
        .collect();
    MemoryCursor::new(["k", "v"], rows)
}

/// Equality join item over `kv(pairs)` returning `v`.
pub fn kv_item(pairs: &[(i32, i64)], kind: JoinKind) -> JoinItem {
    let spec = JoinItemSpec::new(["k"], vec![FieldExpr::column("v")]).with_kind(kind);
    JoinItem::new(spec, kv(pairs)).unwrap()
}

/// `(sym, ts, px)` dimension rows.
pub fn ticks(rows: &[(&str, i64, f64)]) -> MemoryCursor {
    let rows: Vec<Row> = rows
        .iter()
        .map(|(s, t, p)| vec![Value::from(*s), Value::Date(*t), Value::Double(*p)])
        .collect();
    MemoryCursor::new(["sym", "ts", "px"], rows)
}

/// Probes `item` once per key and returns `(kept, fields)` per probe.
pub fn probe_all(item: &mut JoinItem, probes: &[Vec<Value>]) -> Vec<(bool, Vec<Value>)> {
    probes
        .iter()
        .map(|keys| {
            let mut out = vec![Value::Null; item.field_count()];
            let kept = item.probe(keys, &mut out).unwrap();
            (kept, out)
        })
        .collect()
}

pub fn int_probes(keys: &[i32]) -> Vec<Vec<Value>> {
    keys.iter().map(|k| vec![Value::Int(*k)]).collect()
}
