
// Priority 2: randomized agreement with a reference search
mod tests_random;
