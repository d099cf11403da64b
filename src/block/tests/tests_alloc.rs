//! Allocator tests: free-pointer growth, file enlargement and free-list
//! reuse rules.

#[cfg(test)]
mod tests {
    use crate::block::{Allocator, BlockFile, BlockSource, MAX_BLOCK_SIZE, normalize_block_size};
    use tempfile::TempDir;
    use tracing_subscriber::EnvFilter;

    const BS: u32 = 4096;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn new_file(temp: &TempDir) -> BlockFile {
        let file = BlockFile::create(temp.path().join("t.grp")).unwrap();
        file.set_len(u64::from(BS)).unwrap();
        file
    }

    // -----------------------------------------
    // Test: block size normalisation
    // -----------------------------------------
    #[test]
    fn block_size_rounds_up_to_4k_multiple() {
        assert_eq!(normalize_block_size(0), 4096);
        assert_eq!(normalize_block_size(4096), 4096);
        assert_eq!(normalize_block_size(4097), 8192);
        assert_eq!(normalize_block_size(65536), 65536);
        assert_eq!(normalize_block_size(u32::MAX), MAX_BLOCK_SIZE);
        assert_eq!(MAX_BLOCK_SIZE % 4096, 0);
    }

    /// # Scenario
    /// Fresh allocator extends the file by `enlarge_blocks` blocks at once.
    ///
    /// # Starting environment
    /// File holding only the prologue block; `enlarge_blocks = 4`.
    ///
    /// # Actions
    /// Allocate five blocks.
    ///
    /// # Expected behavior
    /// Blocks are consecutive from `block_size`; the file grows once to
    /// 5 blocks, then again to 9 blocks on the fifth allocation.
    #[test]
    fn allocation_grows_file_in_enlarge_steps() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let file = new_file(&temp);
        let mut alloc = Allocator::new(BS, 4);

        let first = alloc.allocate(&file).unwrap();
        assert_eq!(first, u64::from(BS));
        assert_eq!(alloc.file_size(), 5 * u64::from(BS));
        assert_eq!(file.size().unwrap(), alloc.file_size());

        for k in 2..=4u64 {
            assert_eq!(alloc.allocate(&file).unwrap(), k * u64::from(BS));
        }
        assert_eq!(alloc.file_size(), 5 * u64::from(BS));

        assert_eq!(alloc.allocate(&file).unwrap(), 5 * u64::from(BS));
        assert_eq!(alloc.file_size(), 9 * u64::from(BS));
        assert_eq!(alloc.free_pos(), 6 * u64::from(BS));
    }

    /// # Scenario
    /// Released blocks become reusable only after promotion.
    ///
    /// # Starting environment
    /// Two allocated blocks.
    ///
    /// # Actions
    /// Release one, allocate, promote, allocate again.
    ///
    /// # Expected behavior
    /// The pending block is not handed out before `promote_pending`, but
    /// it is listed as free for persistence; afterwards it is reused.
    #[test]
    fn pending_release_is_reused_after_promotion() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let file = new_file(&temp);
        let mut alloc = Allocator::new(BS, 16);

        let a = alloc.allocate(&file).unwrap();
        let _b = alloc.allocate(&file).unwrap();
        alloc.release(a);
        assert_eq!(alloc.persisted_free_blocks(), vec![a]);
        assert_eq!(alloc.free_count(), 0);

        let c = alloc.allocate(&file).unwrap();
        assert_ne!(c, a, "pending block must not be reused");

        alloc.promote_pending();
        assert_eq!(alloc.allocate(&file).unwrap(), a);
    }

    #[test]
    fn fresh_allocation_skips_free_list() {
        let temp = TempDir::new().unwrap();
        let file = new_file(&temp);
        let mut alloc = Allocator::new(BS, 16);

        let a = alloc.allocate(&file).unwrap();
        alloc.release_now(a);
        let fresh = alloc.allocate_fresh(&file).unwrap();
        assert_ne!(fresh, a);
        assert_eq!(alloc.allocate(&file).unwrap(), a);
    }

    #[test]
    fn restore_keeps_persisted_state() {
        let alloc = Allocator::restore(BS, 8, 3 * u64::from(BS), 9 * u64::from(BS), vec![4096]);
        assert_eq!(alloc.free_pos(), 3 * u64::from(BS));
        assert_eq!(alloc.file_size(), 9 * u64::from(BS));
        assert_eq!(alloc.free_count(), 1);
        assert_eq!(alloc.enlarge_blocks(), 8);
    }
}
