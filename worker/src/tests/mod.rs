//! Test modules for the worker crate

mod alerts_tests;
