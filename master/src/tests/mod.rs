//! Test modules for the master crate

mod completion_tests;
mod dispatcher_tests;
mod params_tests;
mod support;
mod telemetry_tests;
