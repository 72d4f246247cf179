//! Cartwright - storefront order and inventory service
//!
//! The interesting part of this service is the inventory-consistent order
//! lifecycle: turning a mutable, possibly-anonymous cart into a durable
//! order without ever overselling a unit, and unwinding cancellations so
//! inventory and order state stay mutually consistent.
//!
//! ## Pieces
//! - [`stock`] - the stock ledger: atomic conditional reserve / release
//! - [`cart`] - per-identity line items with cached price snapshots
//! - [`orders`] - the all-or-nothing checkout and cancellation coordinator,
//!   plus the order status state machine in [`models`]
//! - [`catalog`] - product read/write path feeding the above
//! - [`reports`] - read-only aggregates over placed orders
//!
//! All transactional guarantees lean on Postgres: checkout runs as one
//! transaction, and stock reservation is a single conditional UPDATE so
//! concurrent checkouts of the last unit serialize on the row.

pub mod cart;
pub mod catalog;
pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod models;
pub mod notify;
pub mod orders;
pub mod reports;
pub mod stock;

pub use error::{Result, StoreError};
pub use identity::CartIdentity;
