//! Corrupt descriptors and chains surface as `BlockError::Corrupt`.

#[cfg(test)]
mod tests {
    use crate::block::{
        Allocator, BlockError, BlockFile, BlockLink, BlockLinkReader, BlockLinkWriter,
        payload_size,
    };
    use tempfile::TempDir;

    const BS: u32 = 4096;

    fn two_block_link(temp: &TempDir) -> (BlockFile, BlockLink) {
        let file = BlockFile::create(temp.path().join("c.grp")).unwrap();
        file.set_len(u64::from(BS)).unwrap();
        let mut alloc = Allocator::new(BS, 4);
        let mut link = BlockLink::default();
        BlockLinkWriter::new(&file, &mut alloc, &mut link)
            .append(&vec![1u8; payload_size(BS) + 10])
            .unwrap();
        (file, link)
    }

    fn assert_corrupt<T: std::fmt::Debug>(res: Result<T, BlockError>) {
        assert!(
            matches!(res, Err(BlockError::Corrupt(_))),
            "expected Corrupt, got {res:?}"
        );
    }

    #[test]
    fn read_past_link_end_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let (file, link) = two_block_link(&temp);
        let reader = BlockLinkReader::new(&file, BS, link).unwrap();
        assert_corrupt(reader.read(reader.len() - 5, 6));
    }

    #[test]
    fn misaligned_first_block_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let (file, mut link) = two_block_link(&temp);
        link.first += 1;
        assert_corrupt(BlockLinkReader::new(&file, BS, link));
    }

    #[test]
    fn prologue_block_is_never_a_chain_block() {
        let temp = TempDir::new().unwrap();
        let (file, mut link) = two_block_link(&temp);
        link.first = 0;
        assert_corrupt(BlockLinkReader::new(&file, BS, link));
    }

    #[test]
    fn overstated_block_count_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let (file, mut link) = two_block_link(&temp);
        link.block_count = 3;
        assert_corrupt(BlockLinkReader::new(&file, BS, link));
    }

    /// # Scenario
    /// A descriptor claims far more blocks than the file could hold.
    ///
    /// # Starting environment
    /// A two-block chain in a small file.
    ///
    /// # Actions
    /// Set `block_count` to `u32::MAX` and build a reader.
    ///
    /// # Expected behavior
    /// `Corrupt` before any per-block allocation is attempted.
    #[test]
    fn block_count_beyond_file_capacity_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let (file, mut link) = two_block_link(&temp);
        link.block_count = u32::MAX;
        assert_corrupt(BlockLinkReader::new(&file, BS, link));
    }

    #[test]
    fn wrong_last_block_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let (file, mut link) = two_block_link(&temp);
        link.block_count = 1;
        assert_corrupt(BlockLinkReader::new(&file, BS, link));
    }

    #[test]
    fn free_index_beyond_payload_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let (file, mut link) = two_block_link(&temp);
        link.free_index = BS;
        assert_corrupt(BlockLinkReader::new(&file, BS, link));
    }

    #[test]
    fn offset_beyond_file_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let (file, mut link) = two_block_link(&temp);
        link.first = 1 << 30;
        assert_corrupt(BlockLinkReader::new(&file, BS, link));
    }
}
