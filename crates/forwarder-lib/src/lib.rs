//! Forwarder library for container optimization data
//!
//! This crate provides the core functionality for:
//! - Range queries against a Prometheus-compatible backend
//! - A hierarchical inventory of discovered entities
//! - Metric binding and label aggregation into that inventory
//! - Historical backfill windowing
//! - CSV extracts for the downstream analytics system

pub mod binder;
pub mod collect;
pub mod export;
pub mod labels;
pub mod prometheus;
pub mod store;
pub mod windows;

pub use collect::{Aggregation, CollectionParams};
pub use prometheus::{Matrix, PrometheusClient, QueryError, QueryRange, RangeQuerier, Sample, Series};
pub use store::{ClusterStore, Container, Namespace, Node, NodeStore, Pod};
pub use windows::{Interval, Window, Windows};
