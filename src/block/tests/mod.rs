mod tests_alloc;

// Robustness: damaged chains must be reported, never followed.
mod tests_corruption;
