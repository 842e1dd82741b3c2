//! RegimeBot Library
//!
//! Regime-aware signal engine and position lifecycle manager for a single
//! leveraged perpetual futures instrument.

pub mod config;
pub mod engine;
pub mod exchange;
pub mod indicators;
pub mod market;
pub mod persistence;
pub mod position;
pub mod risk;
pub mod strategy;
pub mod types;

#[cfg(feature = "dashboard")]
pub mod dashboard;
