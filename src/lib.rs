//! sqlfan: partitioned batch-query fan-out.
//!
//! Splits one parameterized query into per-partition jobs, runs each in its
//! own worker process, and merges the results in partition order. A
//! precondition gate runs first and an audit ledger brackets the run.

pub mod backend;
pub mod cli;
pub mod core;
pub mod ledger;
pub mod logging;
pub mod worker;
