mod helpers;

mod tests_basic;

// Priority 2: annexes and write validation
mod tests_annex;
