//! Operational export surfaces: health metrics and the Prometheus server.

pub mod health;
