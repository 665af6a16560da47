//! Regression triage for the Nim toolchain.
//!
//! A snippet and a build command are run across an ordered matrix of toolchain
//! releases; the first passing and first failing releases become the endpoints
//! of a commit bisection over the toolchain's source history.
//!
//! - **[`core`]**: pure, deterministic logic (request parsing, window halving,
//!   matrix latches, text cleanup). No I/O.
//! - **[`io`]**: side effects (processes, git, the active toolchain, config).
//!   Every seam is a trait so tests can script it.
//!
//! Orchestration modules ([`resolve`], [`sweep`], [`bisect`], [`triage`]) wire
//! the two together; [`report`] turns the result into markdown or JSON.

pub mod bisect;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod report;
pub mod resolve;
pub mod sweep;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod triage;
