//! Resource limits and connection tracking

pub mod limits;

pub use limits::{
    ConnectionError, ConnectionGuard, ConnectionMetrics, ConnectionTracker, ResourceLimits,
    SizeError, SizeValidator,
};
