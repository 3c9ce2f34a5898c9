//! Parameters for circuit-level flow control.
//!
//! These normally come from the consensus; the defaults are the ones that
//! tor-spec gives for the fixed-window SENDME protocol.

use derive_builder::Builder;

use tor_config::{ConfigBuildError, impl_standard_builder};
use tor_units::BoundedInt32;

use super::window::CIRCWINDOW_START;

/// The range of allowed values for the initial package window.
///
/// This is `circwindow` in the consensus.
pub type CircWindowStart = BoundedInt32<100, 1000>;

/// Flow-control parameters for the hops of a circuit.
///
/// A [`HopChain`](crate::HopChain) is built with one of these, and uses it
/// for every hop it creates.
#[non_exhaustive]
#[derive(Builder, Clone, Debug)]
#[builder(build_fn(error = "ConfigBuildError", validate = "Self::validate"))]
pub struct FlowCtrlParams {
    /// The package window that a new hop starts with.
    #[builder(default = "CircWindowStart::saturating_new(1000)")]
    package_window_start: CircWindowStart,
    /// The largest value the package window may ever reach.
    ///
    /// A SENDME that would take the window beyond this is a protocol
    /// violation.
    #[builder(default = "1000")]
    package_window_max: u32,
    /// How many cells each SENDME acknowledges.
    #[builder(default = "100")]
    sendme_inc: u32,
}
impl_standard_builder! { FlowCtrlParams: !Deserialize }

impl FlowCtrlParamsBuilder {
    /// Builder helper: check whether the options in this builder are consistent.
    fn validate(&self) -> Result<(), ConfigBuildError> {
        let start = self
            .package_window_start
            .map(|w| w.get().unsigned_abs())
            .unwrap_or(CIRCWINDOW_START);
        let max = self.package_window_max.unwrap_or(1000);
        let inc = self.sendme_inc.unwrap_or(100);

        if start > max {
            return Err(ConfigBuildError::Inconsistent {
                fields: vec!["package_window_start".into(), "package_window_max".into()],
                problem: "Initial package window is above the maximum".into(),
            });
        }
        if inc == 0 || inc > CIRCWINDOW_START {
            return Err(ConfigBuildError::Invalid {
                field: "sendme_inc".into(),
                problem: format!("Out of range 1..={}", CIRCWINDOW_START),
            });
        }
        if inc > max {
            return Err(ConfigBuildError::Inconsistent {
                fields: vec!["sendme_inc".into(), "package_window_max".into()],
                problem: "A single SENDME would overflow the package window".into(),
            });
        }
        Ok(())
    }
}

impl FlowCtrlParams {
    /// Return the package window that a new hop starts with.
    pub fn package_window_start(&self) -> u32 {
        self.package_window_start.get().unsigned_abs()
    }

    /// Return the largest value the package window may reach.
    pub fn package_window_max(&self) -> u32 {
        self.package_window_max
    }

    /// Return how many cells each SENDME acknowledges.
    pub fn sendme_inc(&self) -> u32 {
        self.sendme_inc
    }
}
