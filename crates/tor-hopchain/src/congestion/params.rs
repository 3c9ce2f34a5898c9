//! Define the congestion control parameters needed for the algorithms.
//!
//! All of these values are normally taken from the consensus, and the details
//! of these values can be found in section 6.5.1. of proposal 324.  The
//! defaults here are the ones that the proposal suggests.

use derive_builder::Builder;

use tor_config::{ConfigBuildError, impl_standard_builder};
use tor_units::Percentage;

/// The round trip estimator parameters, used to estimate the round trip time
/// on a circuit.
#[non_exhaustive]
#[derive(Builder, Clone, Debug)]
#[builder(build_fn(error = "ConfigBuildError"))]
pub struct RoundTripEstimatorParams {
    /// The "N" parameter in N-EWMA smoothing of RTT and/or bandwidth estimation, specified as a
    /// percentage of the number of SENDME acks in a congestion window.
    ///
    /// A percentage over 100% indicates smoothing with more than one congestion window's worth
    /// of SENDMEs.
    #[builder(default = "Percentage::new(50)")]
    pub ewma_cwnd_pct: Percentage<u32>,
    /// The maximum value of the "N" parameter in N-EWMA smoothing of RTT and/or bandwidth
    /// estimation.
    #[builder(default = "10")]
    pub ewma_max: u32,
    /// The maximum value of the "N" parameter in N-EWMA smoothing of RTT and/or bandwidth
    /// estimation but in Slow Start.
    #[builder(default = "2")]
    pub ewma_ss_max: u32,
    /// Describes a percentile average between min and current ewma, for use to reset RTT_min, when
    /// the congestion window hits cwnd_min.
    #[builder(default = "Percentage::new(100)")]
    pub rtt_reset_pct: Percentage<u32>,
}
impl_standard_builder! { RoundTripEstimatorParams: !Deserialize }

/// The parameters of what constitute a congestion window.
#[non_exhaustive]
#[derive(Builder, Clone, Debug)]
#[builder(build_fn(error = "ConfigBuildError", validate = "Self::validate"))]
pub struct CongestionWindowParams {
    /// Initial size of the congestion window.
    #[builder(default = "124")]
    pub cwnd_init: u32,
    /// Percent of cwnd to increment by during slow start.
    #[builder(default = "Percentage::new(100)")]
    pub cwnd_inc_pct_ss: Percentage<u32>,
    /// Number of cells to increment cwnd by during steady state.
    #[builder(default = "1")]
    pub cwnd_inc: u32,
    /// Number of times per congestion window to update based on congestion signals.
    #[builder(default = "31")]
    pub cwnd_inc_rate: u32,
    /// Minimum congestion window (must be at least sendme_inc)
    #[builder(default = "124")]
    pub cwnd_min: u32,
    /// Maximum congestion window
    #[builder(default = "u32::MAX")]
    pub cwnd_max: u32,
    /// The number of cells to acknowledge with every SENDME.  This is negotiated during
    /// circuit setup.
    #[builder(default = "31")]
    pub sendme_inc: u32,
}
impl_standard_builder! { CongestionWindowParams: !Deserialize }

impl CongestionWindowParamsBuilder {
    /// Builder helper: check whether the options in this builder are consistent.
    fn validate(&self) -> Result<(), ConfigBuildError> {
        if self.sendme_inc == Some(0) {
            return Err(ConfigBuildError::Invalid {
                field: "sendme_inc".into(),
                problem: "must be nonzero".into(),
            });
        }
        if self.cwnd_inc_rate == Some(0) {
            return Err(ConfigBuildError::Invalid {
                field: "cwnd_inc_rate".into(),
                problem: "must be nonzero".into(),
            });
        }
        if let (Some(min), Some(inc)) = (self.cwnd_min, self.sendme_inc) {
            if min < inc {
                return Err(ConfigBuildError::Inconsistent {
                    fields: vec!["cwnd_min".into(), "sendme_inc".into()],
                    problem: "Minimum congestion window is below one SENDME".into(),
                });
            }
        }
        Ok(())
    }
}

/// The thresholds, in cells of queue use, at which Vegas reacts.
///
/// Spec: prop324 section 6.5.3 (TOR_VEGAS parameters).
#[non_exhaustive]
#[derive(Clone, Copy, Debug)]
pub struct CellInQueueParams {
    /// Below this much queue use in steady state, grow the window.
    pub alpha: u32,
    /// Above this much queue use in steady state, shrink the window.
    pub beta: u32,
    /// Above this much queue use in steady state, drop the window right down.
    pub delta: u32,
    /// Above this much queue use in slow start, leave slow start.
    pub gamma: u32,
    /// The congestion window above which slow start growth is limited (RFC3742).
    pub ss_cwnd_cap: u32,
}

impl From<(u32, u32, u32, u32, u32)> for CellInQueueParams {
    fn from(v: (u32, u32, u32, u32, u32)) -> Self {
        Self {
            alpha: v.0,
            beta: v.1,
            delta: v.2,
            gamma: v.3,
            ss_cwnd_cap: v.4,
        }
    }
}

/// The number of cells in a channel's outbound buffer, which the default
/// queue thresholds are multiples of.
const OUTBUF_CELLS: u32 = 62;

/// Parameters of the Vegas algorithm.
#[non_exhaustive]
#[derive(Builder, Clone, Debug)]
#[builder(build_fn(error = "ConfigBuildError"))]
pub struct VegasParams {
    /// Queue-use thresholds.
    #[builder(default = "(3 * OUTBUF_CELLS, 4 * OUTBUF_CELLS, 5 * OUTBUF_CELLS, 3 * OUTBUF_CELLS, 600).into()")]
    pub cell_in_queue_params: CellInQueueParams,
    /// The largest congestion window that slow start may reach.
    #[builder(default = "5000")]
    pub ss_cwnd_max: u32,
    /// How many SENDMEs' worth of cells below the window still counts as full.
    #[builder(default = "4")]
    pub cwnd_full_gap: u32,
    /// Below this percentage of the window in flight, the window is no longer full.
    #[builder(default = "Percentage::new(25)")]
    pub cwnd_full_min_pct: Percentage<u32>,
    /// If nonzero, reset the fullness of the window once per window's worth of SENDMEs,
    /// rather than once per update.
    #[builder(default = "1")]
    pub cwnd_full_per_cwnd: u32,
}
impl_standard_builder! { VegasParams: !Deserialize }

/// Everything needed to attach congestion control to a hop.
#[non_exhaustive]
#[derive(Builder, Clone, Debug)]
#[builder(build_fn(error = "ConfigBuildError"))]
pub struct CongestionControlParams {
    /// Round-trip time estimator parameters.
    #[builder(default)]
    pub rtt_params: RoundTripEstimatorParams,
    /// Congestion window parameters.
    #[builder(default)]
    pub cwnd_params: CongestionWindowParams,
    /// Vegas parameters.
    #[builder(default)]
    pub vegas_params: VegasParams,
}
impl_standard_builder! { CongestionControlParams: !Deserialize }
