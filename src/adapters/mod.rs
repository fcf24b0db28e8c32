//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP clients, WebSockets, file I/O). Each
//! sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `api`: REST client and the Bitget price-map source
//! - `demand_file`: JSON file demand source
//! - `feeds`: venue WebSocket protocols, sessions and the REST poller
//! - `metrics`: Prometheus metrics export and health checks

pub mod api;
pub mod demand_file;
pub mod feeds;
pub mod metrics;
