//! # Exchange Core
//!
//! Order-book lifecycle and pub/sub RPC layer of the hierarchical energy
//! exchange simulation.
//!
//! ## Modules
//! - `comms`: Pub/sub transport seam and the transaction-correlated blocking
//!   communicator built on top of it.
//! - `orderbook`: Per-strategy ledgers of posted, sold, bought and split
//!   instruments.
//! - `connection`: Market-side event fan-out and inbound command dispatch.
//! - `gateway`: Per-device bridge to external controllers (direct clients and
//!   aggregators).
//! - `strategy`: Device strategy seam (load / PV / storage).
//! - `market`: Mock market facade for tests and demos.

pub mod comms;
pub mod config;
pub mod connection;
pub mod gateway;
pub mod market;
pub mod orderbook;
pub mod strategy;

/// Tolerance applied to energy comparisons throughout the ledgers.
pub const FLOATING_POINT_TOLERANCE: f64 = 1e-5;
