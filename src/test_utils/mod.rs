//! Shared test utilities: canned portal responses, configuration builders
//! and in-memory implementations of the pipeline seams.

#![cfg(test)]

pub mod config;
pub mod fixtures;
pub mod mocks;
