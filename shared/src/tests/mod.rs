//! Test modules for the shared crate

mod model_tests;
