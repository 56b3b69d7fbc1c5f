//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP clients, AI service, file I/O). Each
//! sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `api`: Polymarket CLOB REST API client, auth and the paper venue
//! - `feeds`: Gamma market snapshots and resolutions
//! - `verifier`: LLM-backed outcome verification
//! - `metrics`: Prometheus metrics export and health checks
//! - `persistence`: JSON record store with audit log
//! - `retry`: Shared retry policy for outbound calls

pub mod api;
pub mod feeds;
pub mod metrics;
pub mod persistence;
pub mod retry;
pub mod verifier;
