//! End-to-end tests at the directory and item level.
//!
//! Each test file covers a specific scenario, using seeded inputs so runs
//! are repeatable.

#![cfg(test)]

mod test_balancing;
mod test_concurrency;
mod test_dot_entries;
mod test_random_operations;
mod test_remove_every_third;
mod test_seal_isolation;
