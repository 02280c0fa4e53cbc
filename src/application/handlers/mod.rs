//! Application command and query handlers, grouped by area.

pub mod billing;
