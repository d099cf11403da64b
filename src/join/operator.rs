//! The join operator: a driver cursor probing one or more join items.

use crate::cursor::{CancelToken, CursorError, Row, RowCursor};
use crate::value::Value;

use super::{JoinError, JoinItem};

/// A [`RowCursor`] that appends the fields of every [`JoinItem`] to each
/// driver row and keeps the row only if every item keeps it.
///
/// The driver must be sorted by the key columns each item is probed with.
pub struct PrimaryJoin<D: RowCursor> {
    driver: D,
    items: Vec<(Vec<usize>, JoinItem)>,
    columns: Vec<String>,
    cancel: Option<CancelToken>,
}

impl<D: RowCursor> PrimaryJoin<D> {
    /// `items` pairs each join item with the driver columns that form its
    /// probe key.
    pub fn new<S: AsRef<str>>(driver: D, items: Vec<(Vec<S>, JoinItem)>) -> Result<Self, JoinError> {
        let mut columns = driver.columns().to_vec();
        let mut resolved = Vec::with_capacity(items.len());
        for (keys, item) in items {
            if keys.len() != item.key_count() {
                return Err(JoinError::Config(format!(
                    "{} driver keys for a join item with {} keys",
                    keys.len(),
                    item.key_count()
                )));
            }
            let idx = keys
                .iter()
                .map(|k| {
                    let k = k.as_ref();
                    driver
                        .columns()
                        .iter()
                        .position(|c| c == k)
                        .ok_or_else(|| JoinError::Config(format!("driver has no column '{k}'")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            columns.extend(item.field_names());
            resolved.push((idx, item));
        }
        Ok(Self {
            driver,
            items: resolved,
            columns,
            cancel: None,
        })
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Probes every item with `row`; `None` if any item drops it.
    fn extend_row(&mut self, mut row: Row) -> Result<Option<Row>, JoinError> {
        let mut keep = true;
        for (idx, item) in &mut self.items {
            let keys: Vec<Value> = idx.iter().map(|i| row[*i].clone()).collect();
            let mut out = vec![Value::Null; item.field_count()];
            keep &= item.probe(&keys, &mut out)?;
            row.extend(out);
        }
        Ok(keep.then_some(row))
    }
}

impl<D: RowCursor> RowCursor for PrimaryJoin<D> {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn fetch(&mut self, max: usize) -> Result<Option<Vec<Row>>, CursorError> {
        loop {
            if let Some(token) = &self.cancel {
                token.check()?;
            }
            let Some(batch) = self.driver.fetch(max)? else {
                return Ok(None);
            };
            let mut out = Vec::with_capacity(batch.len());
            for row in batch {
                if let Some(row) = self.extend_row(row)? {
                    out.push(row);
                }
            }
            if !out.is_empty() {
                return Ok(Some(out));
            }
        }
    }
}
