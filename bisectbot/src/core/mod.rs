//! Deterministic, pure logic shared by the triage pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod intake;
pub mod matrix;
pub mod text;
pub mod types;
pub mod window;
