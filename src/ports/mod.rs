//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer
//! requires from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `MarketFeed`: Market metadata and price snapshots
//! - `OutcomeVerifier`: AI check that an event outcome is final
//! - `ExecutionVenue`: Order submission, lookup and cancellation
//! - `SettlementSource`: On-chain resolution and payouts
//! - `Repository`: Durable records (signals, positions, accounts, agents)

pub mod execution;
pub mod market_feed;
pub mod repository;
pub mod settlement;
pub mod verifier;
