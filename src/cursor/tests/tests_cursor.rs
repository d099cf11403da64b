#[cfg(test)]
mod tests {
    use crate::cursor::{
        CancelToken, CursorError, MemoryCursor, Row, RowCursor, collect_rows, run_paths,
    };
    use crate::value::Value;

    fn rows(range: std::ops::Range<i32>) -> Vec<Row> {
        range.map(|i| vec![Value::Int(i)]).collect()
    }

    #[test]
    fn memory_cursor_respects_batch_bound() {
        let mut cursor = MemoryCursor::new(["k"], rows(0..5));
        assert_eq!(cursor.columns(), &["k".to_string()]);

        let first = cursor.fetch(2).unwrap().unwrap();
        assert_eq!(first, rows(0..2));
        let rest = cursor.fetch(10).unwrap().unwrap();
        assert_eq!(rest, rows(2..5));
        assert!(cursor.fetch(10).unwrap().is_none());
    }

    #[test]
    fn zero_max_yields_nothing() {
        let mut cursor = MemoryCursor::new(["k"], rows(0..3));
        assert!(cursor.fetch(0).unwrap().is_none());
        assert_eq!(cursor.remaining(), 3);
    }

    #[test]
    fn boxed_cursor_forwards() {
        let mut boxed: Box<dyn RowCursor> = Box::new(MemoryCursor::new(["k"], rows(0..3)));
        assert_eq!(collect_rows(&mut boxed).unwrap(), rows(0..3));
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(matches!(token.check(), Err(CursorError::Interrupted)));
    }

    /// # Scenario
    /// Four paths run on four threads.
    ///
    /// # Starting environment
    /// Four memory cursors with disjoint row ranges.
    ///
    /// # Actions
    /// Sum each path's rows in `run_paths`.
    ///
    /// # Expected behavior
    /// Results come back in path order regardless of completion order.
    #[test]
    fn run_paths_preserves_path_order() {
        let paths: Vec<MemoryCursor> = (0..4)
            .map(|p| MemoryCursor::new(["k"], rows(p * 10..p * 10 + 10)))
            .collect();

        let sums = run_paths(paths, |index, mut cursor| {
            if index == 0 {
                std::thread::sleep(std::time::Duration::from_millis(20));
            }
            let mut sum = 0i64;
            for row in collect_rows(&mut cursor)? {
                sum += row[0].as_i64().unwrap_or_default();
            }
            Ok(sum)
        })
        .unwrap();

        assert_eq!(sums, vec![45, 145, 245, 345]);
    }

    #[test]
    fn run_paths_reports_failure() {
        let paths = vec![MemoryCursor::new(["k"], rows(0..1)); 3];
        let result = run_paths(paths, |index, _| {
            if index == 1 {
                Err(CursorError::Interrupted)
            } else {
                Ok(index)
            }
        });
        assert!(matches!(result, Err(CursorError::Interrupted)));
    }

    #[test]
    fn run_paths_reports_panicked_worker() {
        let paths = vec![MemoryCursor::new(["k"], rows(0..1)); 2];
        let result = run_paths(paths, |index, _| {
            if index == 1 {
                panic!("boom");
            }
            Ok(index)
        });
        assert!(matches!(result, Err(CursorError::Worker(_))));
    }
}
