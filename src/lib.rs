//! Dealer Inventory Core
//!
//! Stock ledger, purchase-order reconciliation and stock adjustment workflow
//! for dealership and workshop backends. Every operation that changes a
//! product's quantity runs in one database transaction that appends to the
//! ledger and updates the cached quantity together.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod services;

pub use errors::{ErrorKind, ServiceError};
pub use services::{InventoryServices, ServiceSettings};
