//! Integration test crate for TaskLane.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! It depends on every tasklane crate to verify they work together.

#[cfg(test)]
mod support;

#[cfg(test)]
mod pipeline;

#[cfg(test)]
mod naming;

#[cfg(test)]
mod snapshots;
