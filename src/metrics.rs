//! Metric helpers for `wirehop`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! the helpers compile to no-ops.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking live sockets.
pub const SOCKETS_LIVE: &str = "wirehop_sockets_live";
/// Name of the counter tracking transport units processed.
pub const UNITS_PROCESSED: &str = "wirehop_units_processed_total";
/// Name of the gauge tracking requests awaiting a response.
pub const REQUESTS_PENDING: &str = "wirehop_requests_pending";
/// Name of the counter tracking requests that timed out.
pub const REQUEST_TIMEOUTS: &str = "wirehop_request_timeouts_total";
/// Name of the counter tracking error occurrences.
pub const ERRORS_TOTAL: &str = "wirehop_errors_total";

/// Direction of unit processing.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Units read from the peer.
    Inbound,
    /// Units written to the peer.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the live sockets gauge.
pub fn inc_sockets() {
    #[cfg(feature = "metrics")]
    gauge!(SOCKETS_LIVE).increment(1.0);
}

/// Decrement the live sockets gauge.
pub fn dec_sockets() {
    #[cfg(feature = "metrics")]
    gauge!(SOCKETS_LIVE).decrement(1.0);
}

/// Record a processed unit for the given direction.
pub fn inc_units(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(UNITS_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record the number of requests awaiting a response.
pub fn set_pending(count: usize) {
    #[cfg(feature = "metrics")]
    {
        #[expect(
            clippy::cast_precision_loss,
            reason = "gauge values are f64; pending counts stay far below 2^52"
        )]
        let value = count as f64;
        gauge!(REQUESTS_PENDING).set(value);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

/// Record a request timeout.
pub fn inc_timeouts() {
    #[cfg(feature = "metrics")]
    counter!(REQUEST_TIMEOUTS).increment(1);
}

/// Record an error occurrence.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL).increment(1);
}
