//! Randomized searcher checks against a binary search over the same keys.

#[cfg(test)]
mod tests {
    use crate::TableConfig;
    use crate::table::{ColumnDef, GroupTable};
    use crate::value::Value;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::TempDir;

    /// Expected result for `probe`: a matching row, or the negated
    /// insertion row.
    fn check(keys: &[i64], probe: i64, got: i64) {
        let below = keys.partition_point(|k| *k < probe);
        if keys.get(below) == Some(&probe) {
            assert!(got > 0, "probe {probe} should hit, got {got}");
            assert_eq!(keys[(got - 1) as usize], probe);
        } else {
            assert_eq!(got, -(below as i64) - 1, "probe {probe}");
        }
    }

    /// # Scenario
    /// Sorted random probes over sorted random keys with duplicates.
    ///
    /// # Starting environment
    /// 500 keys drawn from 0..300, sorted, in segments of 7 rows.
    ///
    /// # Actions
    /// Run 400 sorted probes from -5..310 through one searcher, for
    /// several seeds.
    ///
    /// # Expected behavior
    /// Every result agrees with a binary search over the key list, and
    /// absolute positions never decrease.
    #[test]
    fn agrees_with_binary_search() {
        for seed in [1u64, 7, 42] {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut keys: Vec<i64> = (0..500).map(|_| rng.random_range(0..300)).collect();
            keys.sort_unstable();
            let mut probes: Vec<i64> = (0..400).map(|_| rng.random_range(-5..310)).collect();
            probes.sort_unstable();

            let temp = TempDir::new().unwrap();
            let config = TableConfig {
                block_size: 4096,
                segment_rows: 7,
                ..TableConfig::default()
            };
            let mut table = GroupTable::create(
                temp.path().join("rnd.grp"),
                &[ColumnDef::key("k")],
                &config,
            )
            .unwrap();
            let rows: Vec<_> = keys.iter().map(|k| vec![Value::Long(*k)]).collect();
            table.append(&rows).unwrap();

            let mut searcher = table.searcher().unwrap();
            let mut last = 0;
            for probe in probes {
                let got = searcher.find_next_one(&Value::Long(probe)).unwrap();
                check(&keys, probe, got);
                assert!(got.abs() >= last, "positions went backwards at {probe}");
                last = got.abs();
            }
        }
    }
}
