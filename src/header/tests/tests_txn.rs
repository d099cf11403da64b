//! Transaction state machine and crash-atomicity tests.

#[cfg(test)]
mod tests {
    use crate::block::{BlockLink, BlockLinkReader, BlockLinkWriter};
    use crate::header::{Header, HeaderManager, TxnState};
    use tempfile::TempDir;
    use tracing_subscriber::EnvFilter;

    const BS: u32 = 4096;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn states_progress_through_commit() {
        let temp = TempDir::new().unwrap();
        let mut mgr = HeaderManager::create(temp.path().join("s.grp"), Header::new(BS, 4)).unwrap();
        let txn = mgr.begin();
        assert_eq!(txn.state(), TxnState::Mutating);
        txn.commit().unwrap();
    }

    /// # Scenario
    /// Dropping a transaction restores header and allocator.
    ///
    /// # Starting environment
    /// Fresh file.
    ///
    /// # Actions
    /// Begin, change the distribution text, write a data chain, drop.
    ///
    /// # Expected behavior
    /// In-memory header and free pointer equal their pre-transaction
    /// values; the file on disk still opens with the old header.
    #[test]
    fn drop_aborts_and_restores() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.grp");
        let mut mgr = HeaderManager::create(&path, Header::new(BS, 4)).unwrap();
        let before = mgr.header().clone();
        let free_pos = mgr.allocator().free_pos();

        {
            let mut txn = mgr.begin();
            txn.header_mut().distribute = Some("x".into());
            let mut link = BlockLink::default();
            let (file, alloc) = txn.io();
            BlockLinkWriter::new(file, alloc, &mut link)
                .append(&[9u8; 5000])
                .unwrap();
        }

        assert_eq!(mgr.header(), &before);
        assert_eq!(mgr.allocator().free_pos(), free_pos);
        assert_eq!(HeaderManager::open(&path).unwrap().header(), &before);
    }

    #[test]
    fn explicit_abort_matches_drop() {
        let temp = TempDir::new().unwrap();
        let mut mgr = HeaderManager::create(temp.path().join("e.grp"), Header::new(BS, 4)).unwrap();
        let before = mgr.header().clone();
        let mut txn = mgr.begin();
        txn.header_mut().schemas.push(vec!["k".into()]);
        txn.abort();
        assert_eq!(mgr.header(), &before);
    }

    /// # Scenario
    /// Crash after the new header chain is written but before the
    /// prologue is overwritten.
    ///
    /// # Starting environment
    /// File with one committed header carrying metadata `[1]`.
    ///
    /// # Actions
    /// Begin, set metadata `[2]`, run only the shadow-write stage, then
    /// drop the handle without publishing.
    ///
    /// # Expected behavior
    /// Reopening yields the previous header (metadata `[1]`) and root.
    #[test]
    fn crash_after_shadow_write_keeps_previous_header() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("crash.grp");
        let mut mgr = HeaderManager::create(&path, Header::new(BS, 4)).unwrap();
        let mut txn = mgr.begin();
        txn.header_mut().metadata = vec![1];
        txn.commit().unwrap();
        let committed = mgr.header().clone();

        {
            let mut txn = mgr.begin();
            txn.header_mut().metadata = vec![2];
            let shadow = txn.write_shadow().unwrap();
            assert_ne!(shadow, committed.root);
        }
        drop(mgr);

        let reopened = HeaderManager::open(&path).unwrap();
        assert_eq!(reopened.header().metadata, vec![1]);
        assert_eq!(reopened.header().root, committed.root);
    }

    /// # Scenario
    /// Blocks released inside a transaction are not reused before commit.
    ///
    /// # Starting environment
    /// A committed data chain of one block.
    ///
    /// # Actions
    /// Release the block, allocate another chain in the same transaction,
    /// commit, then allocate again.
    ///
    /// # Expected behavior
    /// The in-transaction allocation gets a different block; after commit
    /// the released block is reused.
    #[test]
    fn released_blocks_wait_for_commit() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let mut mgr = HeaderManager::create(temp.path().join("rel.grp"), Header::new(BS, 4)).unwrap();

        let mut data = BlockLink::default();
        let mut txn = mgr.begin();
        let (file, alloc) = txn.io();
        BlockLinkWriter::new(file, alloc, &mut data).append(b"a").unwrap();
        txn.commit().unwrap();

        let mut txn = mgr.begin();
        let (file, alloc) = txn.io();
        alloc.release(data.first);
        let mut other = BlockLink::default();
        BlockLinkWriter::new(file, alloc, &mut other).append(b"b").unwrap();
        assert_ne!(other.first, data.first);
        txn.commit().unwrap();
        assert!(mgr.header().free_blocks.contains(&data.first));

        let mut txn = mgr.begin();
        let mut third = BlockLink::default();
        let (file, alloc) = txn.io();
        BlockLinkWriter::new(file, alloc, &mut third).append(b"c").unwrap();
        assert_eq!(third.first, data.first);
        txn.commit().unwrap();
    }

    /// # Scenario
    /// Back-to-back commits with nothing else allocating.
    ///
    /// # Starting environment
    /// Fresh file (header in block 1).
    ///
    /// # Actions
    /// Commit 100 times, changing the metadata each time.
    ///
    /// # Expected behavior
    /// The two header chains alternate between the same blocks: the free
    /// pointer stops at block 3 and one block stays on the free list.
    #[test]
    fn repeated_commits_reuse_header_blocks() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cycle.grp");
        let mut mgr = HeaderManager::create(&path, Header::new(BS, 4)).unwrap();

        for k in 0..100u8 {
            let mut txn = mgr.begin();
            txn.header_mut().metadata = vec![k];
            txn.commit().unwrap();
        }

        assert_eq!(mgr.allocator().free_pos(), 3 * u64::from(BS));
        assert_eq!(mgr.allocator().free_count(), 1);
        let reopened = HeaderManager::open(&path).unwrap();
        assert_eq!(reopened.header().metadata, vec![99]);
    }

    /// # Scenario
    /// The barrier after the prologue write fails.
    ///
    /// # Starting environment
    /// File with one committed header carrying metadata `[1]`.
    ///
    /// # Actions
    /// Begin, set metadata `[2]`, write the shadow chain and the prologue,
    /// then drop the transaction as a failed commit does. Begin again,
    /// set metadata `[3]` and write only its shadow chain.
    ///
    /// # Expected behavior
    /// The in-memory header stays at `[2]` with the new root, the second
    /// shadow chain shares no block with the root on disk, and reopening
    /// yields metadata `[2]`.
    #[test]
    fn failure_after_prologue_write_keeps_new_header() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("barrier.grp");
        let mut mgr = HeaderManager::create(&path, Header::new(BS, 4)).unwrap();
        let mut txn = mgr.begin();
        txn.header_mut().metadata = vec![1];
        txn.commit().unwrap();

        let durable = {
            let mut txn = mgr.begin();
            txn.header_mut().metadata = vec![2];
            let root = txn.write_shadow().unwrap();
            txn.write_prologue(root).unwrap();
            root
        };
        assert_eq!(mgr.header().metadata, vec![2]);
        assert_eq!(mgr.header().root, durable);
        let durable_blocks = BlockLinkReader::new(mgr.file(), BS, durable)
            .unwrap()
            .block_positions()
            .to_vec();

        {
            let mut txn = mgr.begin();
            txn.header_mut().metadata = vec![3];
            let next = txn.write_shadow().unwrap();
            let (file, _) = txn.io();
            let next_blocks = BlockLinkReader::new(file, BS, next)
                .unwrap()
                .block_positions()
                .to_vec();
            assert!(next_blocks.iter().all(|b| !durable_blocks.contains(b)));
        }
        drop(mgr);

        let reopened = HeaderManager::open(&path).unwrap();
        assert_eq!(reopened.header().metadata, vec![2]);
    }
}
