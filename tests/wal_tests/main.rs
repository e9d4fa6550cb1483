//! Write-ahead log tests

mod common;
mod crash_tests;
mod entry_tests;
