//! Token Deployer - fee-tier aware ERC20 deployment and minting
//!
//! Polls a gas station for fee tiers, deploys an owner-parameterised token
//! contract, mints against it, and tracks both actions through confirmation
//! with exact fee and duration accounting.

pub mod api;
pub mod artifact;
pub mod chain;
pub mod config;
pub mod error;
pub mod fees;
pub mod metrics;
pub mod outcome;
pub mod session;
pub mod tx;

pub use error::{DeployerError, DeployerResult};
