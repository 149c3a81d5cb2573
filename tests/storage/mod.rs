//! Shared storage integration tests.
//!
//! Tests the AggregateStore contract against every SQL dialect.
//! Each dialect module imports these test functions and runs them.

pub mod aggregate_storage_tests;
