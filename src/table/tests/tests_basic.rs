//! Create, append, reopen and metadata tests.

#[cfg(test)]
mod tests {
    use crate::TableConfig;
    use crate::cursor::collect_rows;
    use crate::table::tests::helpers::{create_id_table, id_rows, init_tracing, small_config};
    use crate::table::{ColumnDef, GroupTable, TableError};
    use crate::value::{Value, ValueKind};
    use tempfile::TempDir;

    #[test]
    fn empty_table_has_no_rows() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let table = create_id_table(&temp.path().join("t.grp"), &small_config());
        assert_eq!(table.row_count(), 0);
        assert_eq!(table.segment_count(), 0);
        assert!(table.segments().unwrap().is_empty());
        assert!(collect_rows(&mut table.cursor().unwrap()).unwrap().is_empty());
        assert_eq!(table.key_columns(), vec!["id".to_string()]);
    }

    /// # Scenario
    /// Rows written across several appends survive close and reopen.
    ///
    /// # Starting environment
    /// Table with 4 rows per segment.
    ///
    /// # Actions
    /// Append 10 rows, then 3 rows; drop the handle and reopen.
    ///
    /// # Expected behavior
    /// 13 rows read back identically. Segments are 4,4,2 then 3 (each
    /// append closes its own segments) with matching last keys.
    #[test]
    fn round_trip_across_reopen() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rt.grp");
        let mut table = create_id_table(&path, &small_config());
        table.append(&id_rows(0..10)).unwrap();
        table.append(&id_rows(10..13)).unwrap();
        let segments = table.segments().unwrap();
        drop(table);

        let table = GroupTable::open(&path).unwrap();
        assert_eq!(table.row_count(), 13);
        assert_eq!(table.segments().unwrap(), segments);

        let rows: Vec<u32> = segments.iter().map(|s| s.rows).collect();
        assert_eq!(rows, vec![4, 4, 2, 3]);
        let firsts: Vec<u64> = segments.iter().map(|s| s.first_row).collect();
        assert_eq!(firsts, vec![1, 5, 9, 11]);
        assert_eq!(segments[1].last_key, vec![Value::Int(7)]);

        let read = collect_rows(&mut table.cursor().unwrap()).unwrap();
        assert_eq!(read, id_rows(0..13));
        assert_eq!(table.column_kind("amount").unwrap(), Some(ValueKind::Long));
    }

    #[test]
    fn values_of_every_kind_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kinds.grp");
        let mut table = GroupTable::create(
            &path,
            &[
                ColumnDef::key("k"),
                ColumnDef::value("s"),
                ColumnDef::value("d"),
                ColumnDef::value("b"),
                ColumnDef::value("t"),
            ],
            &small_config(),
        )
        .unwrap();
        let rows = vec![
            vec![
                Value::Long(1),
                Value::from("alpha"),
                Value::Double(0.5),
                Value::Bool(true),
                Value::Date(1_700_000_000_000),
            ],
            vec![Value::Long(2), Value::Null, Value::Double(-1.25), Value::Null, Value::Null],
            vec![
                Value::Long(3),
                Value::from("ünïcödé"),
                Value::Null,
                Value::Bool(false),
                Value::Date(0),
            ],
        ];
        table.append(&rows).unwrap();
        drop(table);

        let table = GroupTable::open(&path).unwrap();
        assert_eq!(collect_rows(&mut table.cursor().unwrap()).unwrap(), rows);
    }

    #[test]
    fn header_carries_config_and_schema() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cfg.grp");
        let config = TableConfig {
            distribute: Some("id % 8".into()),
            write_password_hash: Some("w".into()),
            block_size: 5000,
            ..small_config()
        };
        let table = create_id_table(&path, &config);
        let header = table.header();
        assert_eq!(header.block_size, 8192, "block size rounds up to 4 KiB multiple");
        assert_eq!(header.distribute.as_deref(), Some("id % 8"));
        assert_eq!(header.write_password_hash.as_deref(), Some("w"));
        assert_eq!(header.read_password_hash, None);
        assert_eq!(header.schemas, vec![vec!["id".to_string(), "amount".to_string()]]);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let temp = TempDir::new().unwrap();
        let cols = [ColumnDef::key("id")];
        let bad = [
            TableConfig {
                segment_rows: 0,
                ..TableConfig::default()
            },
            TableConfig {
                enlarge_blocks: 0,
                ..TableConfig::default()
            },
            TableConfig {
                block_size: 1024,
                ..TableConfig::default()
            },
            TableConfig {
                block_size: u32::MAX,
                ..TableConfig::default()
            },
        ];
        for (i, config) in bad.iter().enumerate() {
            let path = temp.path().join(format!("bad{i}.grp"));
            let err = GroupTable::create(&path, &cols, config).unwrap_err();
            assert!(matches!(err, TableError::InvalidConfig(_)), "{err}");
            assert!(!path.exists());
        }
    }

    #[test]
    fn invalid_columns_are_rejected() {
        let temp = TempDir::new().unwrap();
        let cases: Vec<Vec<ColumnDef>> = vec![
            vec![],
            vec![ColumnDef::key("a"), ColumnDef::value("a")],
            vec![ColumnDef::value("v"), ColumnDef::key("k")],
            vec![ColumnDef::key("_guide")],
            vec![ColumnDef::value("")],
        ];
        for (i, cols) in cases.iter().enumerate() {
            let path = temp.path().join(format!("c{i}.grp"));
            assert!(matches!(
                GroupTable::create(&path, cols, &small_config()),
                Err(TableError::InvalidConfig(_))
            ));
        }

        let path = temp.path().join("time.grp");
        let config = TableConfig {
            time_key: true,
            ..small_config()
        };
        assert!(matches!(
            GroupTable::create(&path, &[ColumnDef::value("v")], &config),
            Err(TableError::InvalidConfig(_))
        ));
    }

    /// # Scenario
    /// `create_like` copies structure and settings but not rows.
    ///
    /// # Starting environment
    /// A populated table with a distribution expression, a time-key flag
    /// and a custom segment size.
    ///
    /// # Actions
    /// `create_like` into a new path; reopen it.
    ///
    /// # Expected behavior
    /// Same columns, flags, segment size, block size and distribution;
    /// zero rows.
    #[test]
    fn create_like_copies_structure_only() {
        let temp = TempDir::new().unwrap();
        let config = TableConfig {
            time_key: true,
            distribute: Some("region".into()),
            segment_rows: 7,
            ..small_config()
        };
        let mut src = GroupTable::create(
            temp.path().join("src.grp"),
            &[ColumnDef::key("sym"), ColumnDef::key("ts"), ColumnDef::value("px")],
            &config,
        )
        .unwrap();
        src.append(&[vec![Value::from("A"), Value::Long(1), Value::Double(1.0)]])
            .unwrap();

        let path = temp.path().join("like.grp");
        GroupTable::create_like(&path, &src).unwrap();
        let like = GroupTable::open(&path).unwrap();

        assert_eq!(like.columns(), src.columns());
        assert_eq!(like.flags(), src.flags());
        assert_eq!(like.segment_rows(), 7);
        assert_eq!(like.header().block_size, src.header().block_size);
        assert_eq!(like.header().distribute.as_deref(), Some("region"));
        assert_eq!(like.row_count(), 0);
        assert_eq!(like.column_kind("px").unwrap(), None);
    }

    #[test]
    fn block_link_info_lists_every_chain() {
        let temp = TempDir::new().unwrap();
        let mut table = create_id_table(&temp.path().join("info.grp"), &small_config());
        table.append(&id_rows(0..6)).unwrap();

        let info = table.block_link_info();
        let names: Vec<&str> = info.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "segments",
                "id.data",
                "id.segments",
                "amount.data",
                "amount.segments"
            ]
        );
        for (name, link) in &info {
            assert_eq!(link.block_count, 1, "{name}");
            assert!(link.free_index > 0, "{name}");
            assert_eq!(link.first, link.last, "{name}");
        }
        let mut firsts: Vec<u64> = info.iter().map(|(_, l)| l.first).collect();
        firsts.sort_unstable();
        firsts.dedup();
        assert_eq!(firsts.len(), info.len(), "chains never share blocks");
    }

    /// # Scenario
    /// A second handle sees appends only after `reload`.
    ///
    /// # Starting environment
    /// Two handles on the same file.
    ///
    /// # Actions
    /// Append through the writer; query the reader before and after
    /// reloading.
    ///
    /// # Expected behavior
    /// Row count is stale until reload, then current.
    #[test]
    fn reload_sees_appends_from_other_handle() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("shared.grp");
        let mut writer = create_id_table(&path, &small_config());
        let mut reader = GroupTable::open(&path).unwrap();

        writer.append(&id_rows(0..5)).unwrap();
        assert_eq!(reader.row_count(), 0);
        reader.reload().unwrap();
        assert_eq!(reader.row_count(), 5);
        assert_eq!(collect_rows(&mut reader.cursor().unwrap()).unwrap(), id_rows(0..5));
    }

    #[test]
    fn snapshot_ignores_later_appends() {
        let temp = TempDir::new().unwrap();
        let mut table = create_id_table(&temp.path().join("snap.grp"), &small_config());
        table.append(&id_rows(0..3)).unwrap();
        let snapshot = table.snapshot().unwrap();
        table.append(&id_rows(3..6)).unwrap();
        assert_eq!(snapshot.row_count(), 3);
        assert_eq!(table.row_count(), 6);
    }

    /// # Scenario
    /// Many small appends keep the file small.
    ///
    /// # Starting environment
    /// Table with 4 KiB blocks.
    ///
    /// # Actions
    /// 200 one-row appends (one commit each), then reopen.
    ///
    /// # Expected behavior
    /// Every commit recycles the previous header chain, so the file stays
    /// within a few dozen blocks and the persisted free list stays short.
    #[test]
    fn small_appends_do_not_grow_file_per_commit() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("grow.grp");
        let mut table = create_id_table(&path, &small_config());
        for k in 0..200 {
            table.append(&id_rows(k..k + 1)).unwrap();
        }

        let size = std::fs::metadata(&path).unwrap().len();
        assert!(size <= 32 * 4096, "file grew to {size} bytes");
        assert!(table.header().free_blocks.len() <= 2);

        let reopened = GroupTable::open(&path).unwrap();
        assert_eq!(reopened.row_count(), 200);
        assert!(reopened.header().free_blocks.len() <= 2);
    }

    #[test]
    fn delete_removes_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gone.grp");
        let mut table = create_id_table(&path, &small_config());
        table.append(&id_rows(0..3)).unwrap();
        table.delete().unwrap();
        assert!(!path.exists());
        assert!(GroupTable::open(&path).is_err());
    }
}
