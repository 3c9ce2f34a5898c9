//! Congestion control for a circuit hop.
//!
//! A hop can opt into congestion control before it opens.  From then on, the
//! attached [`CongestionControl`] object decides when data may be sent
//! towards the hop, instead of the fixed package window: it is told whenever
//! a DATA cell is sent or a SENDME comes back, and adjusts its window from
//! the round-trip times and congestion signals it observes.
//!
//! Any code that wants to send a DATA cell has to call
//! [`can_send`](CongestionControl::can_send) first, or it risks leaving the
//! circuit in a protocol violation state.
//!
//! The one algorithm provided here is [`Vegas`].

pub mod params;
mod rtt;
#[cfg(test)]
mod test_utils;
mod vegas;

use std::time::Instant;

use crate::Result;

use self::params::CongestionWindowParams;

pub use vegas::Vegas;

/// What a congestion control algorithm must implement in order to be
/// attached to a hop.
///
/// The functions that inform the algorithm return a Result: an error means
/// that there is a protocol violation or that we can't recover, and in both
/// cases the circuit MUST be closed.
pub trait CongestionControl: Send {
    /// Return true iff a cell can be sent on the wire according to the congestion control
    /// algorithm.
    fn can_send(&self) -> bool;
    /// Return true iff the SENDME that will next come back acknowledges the
    /// cell we just sent.
    ///
    /// The caller records that cell's tag when this is true.
    fn is_next_cell_sendme(&self) -> bool;
    /// Inform the algorithm that we just sent a DATA cell, at `now`.
    fn data_sent(&mut self, now: Instant) -> Result<()>;
    /// Inform the algorithm that we've just received an authenticated SENDME,
    /// at `now`.
    ///
    /// This is where the algorithm updates its state, using the round-trip
    /// time and the congestion signals.
    fn sendme_received(&mut self, now: Instant, signals: CongestionSignals) -> Result<()>;
    /// Return the current send window, in cells.
    fn send_window(&self) -> u32;
    /// Return the number of cells sent but not yet acknowledged.
    fn inflight(&self) -> u32;
}

/// Congestion signals about our side of the circuit, used by a congestion
/// control algorithm to make decisions.
#[derive(Copy, Clone, Debug)]
#[non_exhaustive]
pub struct CongestionSignals {
    /// Indicate if the channel is blocked.
    pub channel_blocked: bool,
    /// The size of the channel outbound queue.
    pub channel_outbound_size: u32,
}

impl CongestionSignals {
    /// Constructor
    pub fn new(channel_blocked: bool, channel_outbound_size: usize) -> Self {
        Self {
            channel_blocked,
            channel_outbound_size: u32::try_from(channel_outbound_size).unwrap_or(u32::MAX),
        }
    }
}

/// Congestion control state.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) enum State {
    /// The initial state any circuit starts in. Used to gradually increase the amount of data
    /// being transmitted in order to converge towards to optimal capacity.
    #[default]
    SlowStart,
    /// Steady state representing what we think is optimal. This is always after slow start.
    Steady,
}

impl State {
    /// Return true iff this is SlowStart.
    pub(crate) fn in_slow_start(&self) -> bool {
        matches!(self, State::SlowStart)
    }
}

/// A congestion window.
#[derive(Clone, Debug)]
pub(crate) struct CongestionWindow {
    /// Congestion window parameters.
    params: CongestionWindowParams,
    /// The actual value of our congestion window.
    value: u32,
    /// The congestion window is full.
    is_full: bool,
}

impl CongestionWindow {
    /// Constructor taking the window parameters.
    pub(crate) fn new(params: &CongestionWindowParams) -> Self {
        Self {
            value: params.cwnd_init,
            params: params.clone(),
            is_full: false,
        }
    }

    /// Decrement the window by the increment value.
    pub(crate) fn dec(&mut self) {
        self.value = self
            .value
            .saturating_sub(self.increment())
            .max(self.params.cwnd_min);
    }

    /// Increment the window by the increment value.
    pub(crate) fn inc(&mut self) {
        self.value = self
            .value
            .saturating_add(self.increment())
            .min(self.params.cwnd_max);
    }

    /// Return the current value.
    pub(crate) fn get(&self) -> u32 {
        self.value
    }

    /// Return the expected rate for which the congestion window should be updated at.
    ///
    /// See `CWND_UPDATE_RATE` in prop324.
    pub(crate) fn update_rate(&self, state: &State) -> u32 {
        if state.in_slow_start() {
            1
        } else {
            (self.get() + self.increment_rate() * self.sendme_inc() / 2)
                / (self.increment_rate() * self.sendme_inc())
        }
    }

    /// Return minimum value of the congestion window.
    pub(crate) fn min(&self) -> u32 {
        self.params.cwnd_min
    }

    /// Set the congestion window value with a new value.
    pub(crate) fn set(&mut self, value: u32) {
        self.value = value;
    }

    /// Return the increment value.
    pub(crate) fn increment(&self) -> u32 {
        self.params.cwnd_inc
    }

    /// Return the rate at which we should increment the window.
    pub(crate) fn increment_rate(&self) -> u32 {
        self.params.cwnd_inc_rate
    }

    /// Return true iff this congestion window is full.
    pub(crate) fn is_full(&self) -> bool {
        self.is_full
    }

    /// Reset the full flag meaning it is now not full.
    pub(crate) fn reset_full(&mut self) {
        self.is_full = false;
    }

    /// Return the number of expected SENDMEs per congestion window.
    ///
    /// Spec: prop324 SENDME_PER_CWND definition
    pub(crate) fn sendme_per_cwnd(&self) -> u32 {
        (self.get() + (self.sendme_inc() / 2)) / self.sendme_inc()
    }

    /// Grow the window by the RFC3742 slow start increment, and return the increment.
    ///
    /// Spec: prop324 rfc3742_ss_inc definition
    pub(crate) fn rfc3742_ss_inc(&mut self, ss_cap: u32) -> u32 {
        let inc = if self.get() <= ss_cap {
            ((self.params.cwnd_inc_pct_ss.as_percent() * self.sendme_inc()) + 50) / 100
        } else {
            (((self.sendme_inc() * ss_cap) + self.get()) / (self.get() * 2)).max(1)
        };
        self.value += inc;
        inc
    }

    /// Evaluate the fullness of the window with the given parameters.
    ///
    /// Spec: prop324 see cwnd_is_full and cwnd_is_nonfull definition.
    pub(crate) fn eval_fullness(&mut self, inflight: u32, full_gap: u32, full_minpct: u32) {
        if (inflight + (self.sendme_inc() * full_gap)) >= self.get() {
            self.is_full = true;
        } else if (100 * inflight) < (full_minpct * self.get()) {
            self.is_full = false;
        }
    }

    /// Return the SENDME increment value.
    pub(crate) fn sendme_inc(&self) -> u32 {
        self.params.sendme_inc
    }
}
