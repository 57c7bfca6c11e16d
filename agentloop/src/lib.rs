//! Resumable, checkpointed agent loop.
//!
//! A run alternates between consulting an oracle (a language model) and
//! executing the tool calls it requests, publishing a checkpoint after every
//! step so it can be suspended for human input, resumed after a step limit or
//! failure, and inspected at any time. The crate is layered:
//!
//! - **[`core`]**: Pure data and rules (run state, capabilities, invariants,
//!   step budget). No I/O.
//! - **[`io`]**: Configuration and checkpoint stores.
//! - **[`tools`]** / **[`oracle`]**: The two things a step talks to.
//!
//! [`step`] and [`looping`] advance a run; [`coordinator`] owns execution so
//! that at most one worker drives a given run at a time.

pub mod coordinator;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod oracle;
pub mod runtime;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
