//! Paygate - hosted checkout and webhook reconciliation for PayPal and Stripe
//!
//! This library provides checkout initiation, provider webhook handling,
//! subscription cancellation and the return-redirect, plus the SQLite
//! checkout store and completion actions they share.

pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod id;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod rate_limit;
pub mod util;
