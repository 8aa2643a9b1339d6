//! Integration tests for the crawl engine
//!
//! Each test runs real sessions against a wiremock listing site.

mod common;
mod controller_tests;
mod crawl_tests;
mod resilience_tests;
