//! Pipeline acceptance tests.
//!
//! Everything except `timing_test` runs unprivileged against the simulated
//! sensor and platform.

mod common;
mod pipeline_test;
mod shutdown_test;
mod timing_test;
