//! # Raffle App
//!
//! Configuration loading and service wiring for the raffle engine, plus the
//! `raffle-worker` binary that runs the reconciliation loop.
//!
//! HTTP surfaces embed this crate: build a [`Config`], call
//! [`Services::from_config`], and route requests to
//! [`Checkout`](raffle_runtime::Checkout) and
//! [`TicketLookup`](raffle_runtime::TicketLookup).

pub mod bootstrap;
pub mod config;

pub use bootstrap::{BootstrapError, Services};
pub use config::{Config, ConfigError};
