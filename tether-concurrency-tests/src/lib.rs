//! Shared scaffolding for tests that force timing permutations between host threads and an
//! interpreter thread, using the syncpoints compiled in by `concurrent_testpoints`.
pub mod interjection;
