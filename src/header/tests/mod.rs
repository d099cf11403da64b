mod tests_txn;
