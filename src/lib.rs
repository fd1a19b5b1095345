//! # claimgate
//!
//! Multi-tenant request admission for SaaS APIs: a fixed-order chain of
//! gates every tenant-scoped request passes before its handler runs.
//!
//! ```text
//!   request ──> tenant resolver ──> authenticator ──> membership
//!                                                        │
//!             handler <── quota <── feature <── rate limiter
//! ```
//!
//! Stage order is contractual: identity is never established before the
//! tenant is known, and plan entitlements are never consulted before the
//! caller is proven to belong to the tenant. Stages split into two failure
//! philosophies: access control (tenant, auth, membership, feature) fails
//! closed, protection (rate limit, quota) fails open.
//!
//! The crate is framework-neutral: the embedding HTTP server extracts
//! [`pipeline::RequestSignals`] from the request, calls
//! [`pipeline::GatePipeline::admit`], and maps the resulting
//! [`pipeline::RequestScope`] or [`error::GateError`] onto its own
//! response types.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use claimgate::config::GateConfig;
//! use claimgate::directory::MemoryDirectory;
//! use claimgate::pipeline::GatePipeline;
//! use claimgate::store::RespCounterStore;
//!
//! let config = GateConfig::from_env();
//! let directory = Arc::new(MemoryDirectory::new());
//! let counters = Arc::new(RespCounterStore::new(config.store.clone()));
//! let pipeline = GatePipeline::new(&config, directory, counters);
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod gates;
pub mod membership;
pub mod pipeline;
pub mod plan;
pub mod ratelimit;
pub mod store;
pub mod tenant;

pub use auth::{CallerIdentity, Credential};
pub use config::GateConfig;
pub use error::GateError;
pub use pipeline::{GatePipeline, RequestScope, RequestSignals};
pub use tenant::{TenantContext, TenantSignals};
