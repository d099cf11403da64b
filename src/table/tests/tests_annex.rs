//! Annex tests: attach, append with guides, scan and delete.

#[cfg(test)]
mod tests {
    use crate::TableConfig;
    use crate::cursor::collect_rows;
    use crate::table::tests::helpers::{create_id_table, id_rows, init_tracing, small_config};
    use crate::table::{ColumnDef, GUIDE_COLUMN, GroupTable, TableError};
    use crate::value::Value;
    use tempfile::TempDir;

    fn with_base(temp: &TempDir, rows: i32) -> GroupTable {
        let mut table = create_id_table(&temp.path().join("base.grp"), &small_config());
        table.append(&id_rows(0..rows)).unwrap();
        table
    }

    /// # Scenario
    /// Annex rows carry their guide as the first key column and survive
    /// reopen.
    ///
    /// # Starting environment
    /// Base table with 6 rows.
    ///
    /// # Actions
    /// Attach annex `notes(seq key, text)`, append three rows for base rows
    /// 2, 2 and 5, reopen and scan.
    ///
    /// # Expected behavior
    /// Rows read back as `[guide, seq, text]`; the base table is untouched.
    #[test]
    fn attach_append_and_scan() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("base.grp");
        let mut table = with_base(&temp, 6);
        table
            .attach("notes", &[ColumnDef::key("seq"), ColumnDef::value("text")])
            .unwrap();

        let mut annex = table.annex("notes").unwrap();
        assert_eq!(
            annex.columns(),
            vec![GUIDE_COLUMN.to_string(), "seq".into(), "text".into()]
        );
        annex
            .append(&[
                (2, vec![Value::Int(1), Value::from("a")]),
                (2, vec![Value::Int(2), Value::from("b")]),
                (5, vec![Value::Int(1), Value::from("c")]),
            ])
            .unwrap();
        assert_eq!(annex.row_count(), 3);
        drop(table);

        let mut table = GroupTable::open(&path).unwrap();
        assert_eq!(table.annex_names(), vec!["notes".to_string()]);
        assert_eq!(table.row_count(), 6);
        let annex = table.annex("notes").unwrap();
        let rows = collect_rows(&mut annex.cursor().unwrap()).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Long(2), Value::Int(1), Value::from("a")],
                vec![Value::Long(2), Value::Int(2), Value::from("b")],
                vec![Value::Long(5), Value::Int(1), Value::from("c")],
            ]
        );
    }

    #[test]
    fn guide_must_point_into_base() {
        let temp = TempDir::new().unwrap();
        let mut table = with_base(&temp, 3);
        table.attach("a", &[ColumnDef::value("v")]).unwrap();
        let mut annex = table.annex("a").unwrap();
        for guide in [0, 4] {
            assert!(matches!(
                annex.append(&[(guide, vec![Value::Int(1)])]),
                Err(TableError::GuideOutOfRange { rows: 3, .. })
            ));
        }
        annex.append(&[(3, vec![Value::Int(1)])]).unwrap();
    }

    #[test]
    fn guides_must_not_decrease() {
        let temp = TempDir::new().unwrap();
        let mut table = with_base(&temp, 5);
        table.attach("a", &[ColumnDef::value("v")]).unwrap();
        let mut annex = table.annex("a").unwrap();
        annex.append(&[(4, vec![Value::Int(1)])]).unwrap();
        assert!(matches!(
            annex.append(&[(2, vec![Value::Int(1)])]),
            Err(TableError::Unsorted { row: 2 })
        ));
        assert_eq!(annex.row_count(), 1);
    }

    #[test]
    fn attach_rejects_bad_requests() {
        let temp = TempDir::new().unwrap();
        let mut table = with_base(&temp, 1);
        table.attach("a", &[ColumnDef::value("v")]).unwrap();
        assert!(matches!(
            table.attach("a", &[ColumnDef::value("v")]),
            Err(TableError::InvalidConfig(_))
        ));
        assert!(matches!(
            table.attach("b", &[ColumnDef::value(GUIDE_COLUMN)]),
            Err(TableError::InvalidConfig(_))
        ));
        assert!(matches!(table.annex("zzz"), Err(TableError::UnknownAnnex(_))));
        assert!(matches!(table.delete_annex("zzz"), Err(TableError::UnknownAnnex(_))));

        let config = TableConfig {
            time_key: true,
            ..small_config()
        };
        let mut timed = GroupTable::create(
            temp.path().join("timed.grp"),
            &[ColumnDef::key("sym"), ColumnDef::key("ts")],
            &config,
        )
        .unwrap();
        assert!(matches!(
            timed.attach("a", &[ColumnDef::value("v")]),
            Err(TableError::TimeKeyAnnex)
        ));
    }

    /// # Scenario
    /// Deleting an annex frees its blocks for later writes.
    ///
    /// # Starting environment
    /// Base table plus an annex with data in every chain.
    ///
    /// # Actions
    /// Record the annex chains from `block_link_info`, delete the annex,
    /// then attach and fill a second annex.
    ///
    /// # Expected behavior
    /// The first annex disappears from the listing and the second annex's
    /// chains start in blocks the first one used to own.
    #[test]
    fn delete_annex_recycles_blocks() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let mut table = with_base(&temp, 4);
        table.attach("a", &[ColumnDef::value("v")]).unwrap();
        table
            .annex("a")
            .unwrap()
            .append(&[(1, vec![Value::Int(7)])])
            .unwrap();

        let annex_blocks: Vec<u64> = table
            .block_link_info()
            .into_iter()
            .filter(|(name, _)| name.starts_with("a/"))
            .map(|(_, link)| link.first)
            .collect();
        assert_eq!(annex_blocks.len(), 5, "segments, _guide x2, v x2");

        table.delete_annex("a").unwrap();
        assert!(table.annex_names().is_empty());
        assert!(table.block_link_info().iter().all(|(n, _)| !n.starts_with("a/")));

        table.attach("b", &[ColumnDef::value("v")]).unwrap();
        table
            .annex("b")
            .unwrap()
            .append(&[(2, vec![Value::Int(8)])])
            .unwrap();
        let reused = table
            .block_link_info()
            .iter()
            .filter(|(name, _)| name.starts_with("b/"))
            .any(|(_, link)| annex_blocks.contains(&link.first));
        assert!(reused);
    }
}
