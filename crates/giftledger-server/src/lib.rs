//! Giftledger Server - order and gift-card settlement ledger
//!
//! This crate provides the settlement core (gift card ledger, balance
//! reservations, order state machine, checkout orchestration and webhook
//! ingestion) together with its REST API.

pub mod catalog;
pub mod checkout;
pub mod config;
pub mod customers;
pub mod db;
pub mod emails;
pub mod error;
pub mod events;
pub mod ingest;
pub mod ledger;
pub mod mailer;
pub mod models;
pub mod money;
pub mod notify;
pub mod orders;
pub mod payments;
pub mod rate_limit;
pub mod routes;
pub mod settlement;
pub mod state;
pub mod sweeper;

pub use error::AppError;
pub use routes::create_router;
pub use state::AppState;
