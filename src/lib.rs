//! Reconciliation and query core of a distributed topology-observability
//! platform.
//!
//! Independent probes each observe a partial view of processes, containers,
//! hosts, and network sockets, and submit snapshot reports. This crate
//! folds those partial reports — arriving in any order, possibly
//! duplicated — into one consistent aggregate via a commutative,
//! idempotent merge, and reconstructs per-entity connection tables by
//! cross-referencing entity-level and socket-level adjacency.

pub mod aggregator;
pub mod api;
pub mod config;
pub mod export;
pub mod report;
pub mod summary;
