//! Implementation of the Tor Vegas congestion control algorithm.
//!
//! Spec: prop324 section 3.3 (TOR_VEGAS)

use std::time::Instant;

use tracing::trace;

use super::{
    CongestionControl, CongestionSignals, CongestionWindow, State,
    params::{CongestionControlParams, VegasParams},
    rtt::RoundtripTimeEstimator,
};
use crate::{Error, Result};

/// Bandwidth-Delay Product (BDP) estimator.
///
/// Spec: prop324 section 3.1 (BDP_ESTIMATION).
#[derive(Clone, Debug, Default)]
struct BdpEstimator {
    /// The BDP value of this estimator.
    bdp: u32,
}

impl BdpEstimator {
    /// Return the current BDP value.
    fn get(&self) -> u32 {
        self.bdp
    }

    /// Update the estimator with the given congestion window, RTT estimator and any condition
    /// signals that we are currently experiencing.
    fn update(
        &mut self,
        cwnd: &CongestionWindow,
        rtt: &RoundtripTimeEstimator,
        signals: &CongestionSignals,
    ) {
        self.bdp = if rtt.clock_stalled() {
            // Our RTT value is invalid, so go by the window.
            if signals.channel_blocked {
                cwnd.get()
                    .saturating_sub(signals.channel_outbound_size)
                    .max(cwnd.min())
            } else {
                cwnd.get()
            }
        } else {
            // cwnd * min_rtt / ewma_rtt.  This only responds to changes in RTT, so it
            // underestimates a BDP that is above the current window.
            cwnd.get()
                .saturating_mul(rtt.min_rtt_usec())
                .saturating_div(rtt.ewma_rtt_usec())
        };
    }
}

/// Congestion control Vegas algorithm.
///
/// TCP Vegas control algorithm estimates the queue lengths at relays by subtracting the current
/// BDP estimate from the current congestion window.
///
/// Spec: prop324 section 3.3 (TOR_VEGAS)
#[derive(Debug)]
pub struct Vegas {
    /// Vegas parameters.
    params: VegasParams,
    /// Whether we are in slow start.
    state: State,
    /// Round trip time estimator.
    rtt: RoundtripTimeEstimator,
    /// Bandwidth delay product.
    bdp: BdpEstimator,
    /// Congestion window.
    cwnd: CongestionWindow,
    /// The number of SENDME until we will acknowledge a congestion event again.
    num_sendme_until_cwnd_update: u32,
    /// Counts down until we process a cwnd worth of SENDME acks. Used to track full cwnd status.
    num_sendme_per_cwnd: u32,
    /// Number of cells in-flight (sent but awaiting SENDME ack).
    num_inflight: u32,
    /// Whether we were blocked on the channel during the last run.  A change
    /// in either direction is a congestion signal.
    is_blocked_on_chan: bool,
}

impl Vegas {
    /// Create a new [`Vegas`] from the specified parameters.
    pub fn new(params: &CongestionControlParams) -> Self {
        let state = State::default();
        let cwnd = CongestionWindow::new(&params.cwnd_params);
        Self {
            params: params.vegas_params.clone(),
            rtt: RoundtripTimeEstimator::new(&params.rtt_params),
            bdp: BdpEstimator::default(),
            num_inflight: 0,
            num_sendme_per_cwnd: 0,
            num_sendme_until_cwnd_update: cwnd.update_rate(&state),
            cwnd,
            is_blocked_on_chan: false,
            state,
        }
    }

    /// Run the Vegas algorithm for one authenticated SENDME, after the RTT
    /// estimator has seen it.
    ///
    /// Spec: prop324 section 3.3 (TOR_VEGAS)
    fn process_sendme(&mut self, signals: CongestionSignals) {
        self.num_sendme_until_cwnd_update = self.num_sendme_until_cwnd_update.saturating_sub(1);
        self.num_sendme_per_cwnd = self.num_sendme_per_cwnd.saturating_sub(1);

        // Update the BDP even if the RTT estimator is not ready, to bootstrap.
        self.bdp.update(&self.cwnd, &self.rtt, &signals);

        // A change in channel blockage means we reevaluate the window now.
        if self.rtt.is_ready() && signals.channel_blocked != self.is_blocked_on_chan {
            self.num_sendme_until_cwnd_update = 0;
        }
        self.is_blocked_on_chan = signals.channel_blocked;

        // Only run the algorithm if the RTT estimator is ready or we have a blocked channel.
        if !self.rtt.is_ready() && !self.is_blocked_on_chan {
            // Every authenticated SENDME comes after at least sendme_inc cells.
            debug_assert!(self.num_inflight >= self.cwnd.sendme_inc());
            self.num_inflight = self.num_inflight.saturating_sub(self.cwnd.sendme_inc());
            return;
        }

        // How far our cwnd is above BDP.
        let queue_use = self.cwnd.get().saturating_sub(self.bdp.get());
        let q = self.params.cell_in_queue_params;

        self.cwnd.eval_fullness(
            self.num_inflight,
            self.params.cwnd_full_gap,
            self.params.cwnd_full_min_pct.as_percent(),
        );

        if self.state.in_slow_start() {
            if queue_use < q.gamma && !self.is_blocked_on_chan {
                // Only grow a window that is in use.
                if self.cwnd.is_full() {
                    let inc = self.cwnd.rfc3742_ss_inc(q.ss_cwnd_cap);
                    // Leave slow start once it grows slower than steady state would.
                    if (inc * self.cwnd.sendme_per_cwnd())
                        <= (self.cwnd.increment() * self.cwnd.increment_rate())
                    {
                        self.state = State::Steady;
                    }
                }
            } else {
                // Congestion signal: set cwnd to the gamma threshold.
                self.cwnd.set(self.bdp.get() + q.gamma);
                self.state = State::Steady;
            }

            if self.cwnd.get() >= self.params.ss_cwnd_max {
                self.cwnd.set(self.params.ss_cwnd_max);
                self.state = State::Steady;
            }
        } else if self.num_sendme_until_cwnd_update == 0 {
            // In steady state, we only update once per window.
            if queue_use > q.delta {
                self.cwnd
                    .set(self.bdp.get() + q.delta - self.cwnd.increment());
            } else if queue_use > q.beta || self.is_blocked_on_chan {
                self.cwnd.dec();
            } else if self.cwnd.is_full() && queue_use < q.alpha {
                self.cwnd.inc();
            }
        }

        if self.num_sendme_until_cwnd_update == 0 {
            self.num_sendme_until_cwnd_update = self.cwnd.update_rate(&self.state);
        }
        if self.num_sendme_per_cwnd == 0 {
            self.num_sendme_per_cwnd = self.cwnd.sendme_per_cwnd();
        }

        // Decide whether the window stops counting as full.
        if self.params.cwnd_full_per_cwnd != 0 {
            if self.num_sendme_per_cwnd == self.cwnd.sendme_per_cwnd() {
                self.cwnd.reset_full();
            }
        } else if self.num_sendme_until_cwnd_update == self.cwnd.update_rate(&self.state) {
            self.cwnd.reset_full();
        }

        self.num_inflight = self.num_inflight.saturating_sub(self.cwnd.sendme_inc());
    }
}

impl CongestionControl for Vegas {
    fn can_send(&self) -> bool {
        self.num_inflight < self.cwnd.get()
    }

    fn is_next_cell_sendme(&self) -> bool {
        // Called after num_inflight is incremented.
        self.num_inflight % self.cwnd.sendme_inc() == 0
    }

    fn data_sent(&mut self, now: Instant) -> Result<()> {
        // This can go above cwnd, since cwnd can shrink while we are still sending.
        self.num_inflight = self.num_inflight.saturating_add(1);
        if self.is_next_cell_sendme() {
            self.rtt.expect_sendme(now);
        }
        Ok(())
    }

    fn sendme_received(&mut self, now: Instant, signals: CongestionSignals) -> Result<()> {
        self.rtt
            .update(now, &self.state, &self.cwnd)
            .map_err(|e| Error::CircProto(e.to_string()))?;
        let was_slow_start = self.state.in_slow_start();
        self.process_sendme(signals);
        if was_slow_start && !self.state.in_slow_start() {
            trace!(cwnd = self.cwnd.get(), "Congestion control left slow start");
        }
        Ok(())
    }

    fn send_window(&self) -> u32 {
        self.cwnd.get()
    }

    fn inflight(&self) -> u32 {
        self.num_inflight
    }
}
