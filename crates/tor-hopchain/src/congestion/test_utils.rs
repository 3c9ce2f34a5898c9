//! Test helpers.
//!
//! The default parameters are the ones from proposal 324, which are also the
//! ones that C-tor's test vectors were generated with.

use super::params::{CongestionControlParams, CongestionWindowParams, RoundTripEstimatorParams};
use super::{CongestionWindow, Vegas, rtt::RoundtripTimeEstimator};

/// Make a new RTT estimator.
pub(crate) fn new_rtt_estimator() -> RoundtripTimeEstimator {
    RoundtripTimeEstimator::new(&RoundTripEstimatorParams::default())
}

/// Make a new congestion window.
pub(crate) fn new_cwnd() -> CongestionWindow {
    CongestionWindow::new(&CongestionWindowParams::default())
}

/// Make a new Vegas instance.
pub(crate) fn new_vegas() -> Vegas {
    Vegas::new(&CongestionControlParams::default())
}
