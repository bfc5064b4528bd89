//! Test modules for the server crate

mod scheduler_tests;
