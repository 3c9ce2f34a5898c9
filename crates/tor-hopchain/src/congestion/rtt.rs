//! Round Trip Time measurement (prop324 § 2.1)

use std::cmp::{max, min};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use thiserror::Error;
use tor_error::{ErrorKind, HasKind};

use super::params::RoundTripEstimatorParams;
use super::{CongestionWindow, State};

/// An error from the round trip time estimator.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub(crate) enum Error {
    /// `RoundtripTimeEstimator::update` was called without a matching
    /// `RoundtripTimeEstimator::expect_sendme`.
    #[error("Informed of a SENDME we weren't expecting")]
    MismatchedEstimationCall,
}

impl HasKind for Error {
    fn kind(&self) -> ErrorKind {
        use Error as E;
        match self {
            E::MismatchedEstimationCall => ErrorKind::TorProtocolViolation,
        }
    }
}

/// Discrepancy ratio of a new RTT value that we allow against the current RTT in order to
/// declare if the clock has stalled or not.
///
/// Spec: prop324 section 2.1.1 CLOCK_HEURISTICS.
const DELTA_DISCREPANCY_RATIO_MAX: u32 = 5000;

/// Provides an estimate of the round-trip time (RTT) of a Tor circuit.
#[derive(Debug)]
pub(crate) struct RoundtripTimeEstimator {
    /// A queue of times we sent a cell that we'd expect a SENDME for.
    ///
    /// The protocol allows all pending SENDMEs to arrive at once, as long as it is within one
    /// congestion window, so there can be several of these.
    sendme_expected_from: VecDeque<Instant>,
    /// The last *measured* round-trip time.
    last_rtt: Duration,
    /// The current smoothed *estimate* of what the round-trip time is.
    ///
    /// This is zero iff we have not managed to get any estimate yet.
    ewma_rtt: Duration,
    /// The minimum observed value of `ewma_rtt`.
    min_rtt: Duration,
    /// The parameters we're using.
    params: RoundTripEstimatorParams,
    /// Whether we think the monotonic clock has stalled.
    clock_stalled: bool,
}

impl RoundtripTimeEstimator {
    /// Create a new `RoundtripTimeEstimator` from `params`.
    pub(crate) fn new(params: &RoundTripEstimatorParams) -> Self {
        Self {
            sendme_expected_from: VecDeque::new(),
            last_rtt: Duration::ZERO,
            ewma_rtt: Duration::ZERO,
            min_rtt: Duration::ZERO,
            params: params.clone(),
            clock_stalled: false,
        }
    }

    /// Return true iff the estimator is ready to be used or read.
    pub(crate) fn is_ready(&self) -> bool {
        !self.clock_stalled() && !self.last_rtt.is_zero()
    }

    /// Return the state of the clock stalled indicator.
    pub(crate) fn clock_stalled(&self) -> bool {
        self.clock_stalled
    }

    /// Return the EWMA RTT in usec or u32 MAX if it doesn't fit.
    pub(crate) fn ewma_rtt_usec(&self) -> u32 {
        u32::try_from(self.ewma_rtt.as_micros()).unwrap_or(u32::MAX)
    }

    /// Return the Minimum RTT in usec or u32 MAX if it doesn't fit.
    pub(crate) fn min_rtt_usec(&self) -> u32 {
        u32::try_from(self.min_rtt.as_micros()).unwrap_or(u32::MAX)
    }

    /// Inform the estimator that we did (at time `now`) something that we'll expect a SENDME to
    /// be received for.
    pub(crate) fn expect_sendme(&mut self, now: Instant) {
        self.sendme_expected_from.push_back(now);
    }

    /// Given a raw RTT value we just observed, decide whether the clock has stalled or jumped,
    /// in which case we throw the value out.
    ///
    /// Spec: prop324 section 2.1.1 CLOCK_HEURISTICS
    fn is_clock_stalled(&mut self, raw_rtt: Duration, in_slow_start: bool) -> bool {
        if raw_rtt.is_zero() {
            self.clock_stalled = true;
            true
        } else if in_slow_start || self.ewma_rtt.is_zero() {
            // Nothing to cross-check against.
            false
        } else if raw_rtt > self.ewma_rtt * DELTA_DISCREPANCY_RATIO_MAX {
            // The clock jumped forward.  This can be triggered over the network, so it doesn't
            // change the stored stall value.
            true
        } else if self.ewma_rtt > raw_rtt * DELTA_DISCREPANCY_RATIO_MAX {
            // The clock might have stalled, but one measurement isn't enough to decide.
            self.clock_stalled
        } else {
            self.clock_stalled = false;
            false
        }
    }

    /// Update the estimator on time `now` and at the congestion window `cwnd`.
    ///
    /// Each call consumes one time recorded with [`expect_sendme`](Self::expect_sendme); it is
    /// an error if there is none left.
    ///
    /// Spec: prop324 section 2.1
    pub(crate) fn update(
        &mut self,
        now: Instant,
        state: &State,
        cwnd: &CongestionWindow,
    ) -> Result<(), Error> {
        let data_sent_at = self
            .sendme_expected_from
            .pop_front()
            .ok_or(Error::MismatchedEstimationCall)?;
        let raw_rtt = now.saturating_duration_since(data_sent_at);

        if self.is_clock_stalled(raw_rtt, state.in_slow_start()) {
            return Ok(());
        }

        self.last_rtt = raw_rtt;

        // This is the "N" for N-EWMA.
        let ewma_n = u64::from(if state.in_slow_start() {
            self.params.ewma_ss_max
        } else {
            min(
                (cwnd.update_rate(state) * self.params.ewma_cwnd_pct.as_percent()) / 100,
                self.params.ewma_max,
            )
        });
        let ewma_n = max(ewma_n, 2);

        let raw_rtt_usec = u64::try_from(raw_rtt.as_micros()).unwrap_or(u64::MAX);
        let prev_ewma_rtt_usec = u64::try_from(self.ewma_rtt.as_micros()).unwrap_or(u64::MAX);

        // EWMA = value*2/(N+1) + EMA_prev*(N-1)/(N+1)
        //      = (value*2 + EWMA_prev*(N-1))/(N+1)
        // which rounds better.
        //
        // Spec: prop324 section 2.1.2 (N_EWMA_SMOOTHING)
        let new_ewma_rtt_usec = if prev_ewma_rtt_usec == 0 {
            raw_rtt_usec
        } else {
            ((raw_rtt_usec * 2) + ((ewma_n - 1) * prev_ewma_rtt_usec)) / (ewma_n + 1)
        };
        self.ewma_rtt = Duration::from_micros(new_ewma_rtt_usec);

        if self.min_rtt.is_zero() {
            self.min_rtt = self.ewma_rtt;
        } else if cwnd.get() == cwnd.min() && !state.in_slow_start() {
            // At the minimum window, drift the minimum RTT towards the current estimate.
            let hi =
                u64::try_from(max(self.ewma_rtt, self.min_rtt).as_micros()).unwrap_or(u64::MAX);
            let lo =
                u64::try_from(min(self.ewma_rtt, self.min_rtt).as_micros()).unwrap_or(u64::MAX);
            let rtt_reset_pct = u64::from(self.params.rtt_reset_pct.as_percent());
            self.min_rtt = Duration::from_micros(
                (rtt_reset_pct * hi / 100) + (100 - rtt_reset_pct) * lo / 100,
            );
        } else if self.ewma_rtt < self.min_rtt {
            self.min_rtt = self.ewma_rtt;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;
    use crate::congestion::test_utils::{new_cwnd, new_rtt_estimator};
    use assert_matches::assert_matches;

    #[derive(Debug)]
    struct RttTestSample {
        sent_usec_in: u64,
        sendme_received_usec_in: u64,
        cwnd_in: u32,
        ss_in: bool,
        last_rtt_usec_out: u64,
        ewma_rtt_usec_out: u64,
        min_rtt_usec_out: u64,
    }

    impl From<[u64; 7]> for RttTestSample {
        fn from(arr: [u64; 7]) -> Self {
            Self {
                sent_usec_in: arr[0],
                sendme_received_usec_in: arr[1],
                cwnd_in: arr[2] as u32,
                ss_in: arr[3] == 1,
                last_rtt_usec_out: arr[4],
                ewma_rtt_usec_out: arr[5],
                min_rtt_usec_out: arr[6],
            }
        }
    }

    impl RttTestSample {
        fn test(&self, estimator: &mut RoundtripTimeEstimator, start: Instant) {
            let state = if self.ss_in {
                State::SlowStart
            } else {
                State::Steady
            };
            let mut cwnd = new_cwnd();
            cwnd.set(self.cwnd_in);
            let sent = start + Duration::from_micros(self.sent_usec_in);
            let sendme_received = start + Duration::from_micros(self.sendme_received_usec_in);

            estimator.expect_sendme(sent);
            estimator
                .update(sendme_received, &state, &cwnd)
                .expect("Error on RTT update");
            assert_eq!(
                estimator.last_rtt,
                Duration::from_micros(self.last_rtt_usec_out)
            );
            assert_eq!(
                estimator.ewma_rtt,
                Duration::from_micros(self.ewma_rtt_usec_out)
            );
            assert_eq!(
                estimator.min_rtt,
                Duration::from_micros(self.min_rtt_usec_out)
            );
        }
    }

    #[test]
    fn test_vectors() {
        let mut rtt = new_rtt_estimator();
        let now = Instant::now();
        // from C-tor src/test/test_congestion_control.c
        let vectors = [
            [100000, 200000, 124, 1, 100000, 100000, 100000],
            [200000, 300000, 124, 1, 100000, 100000, 100000],
            [350000, 500000, 124, 1, 150000, 133333, 100000],
            [500000, 550000, 124, 1, 50000, 77777, 77777],
            [600000, 700000, 124, 1, 100000, 92592, 77777],
            [700000, 750000, 124, 1, 50000, 64197, 64197],
            [750000, 875000, 124, 0, 125000, 104732, 104732],
            [875000, 900000, 124, 0, 25000, 51577, 104732],
            [900000, 950000, 200, 0, 50000, 50525, 50525],
        ];
        for vect in vectors {
            let vect = RttTestSample::from(vect);
            eprintln!("Testing vector: {:?}", vect);
            vect.test(&mut rtt, now);
        }
    }

    #[test]
    fn unexpected_sendme() {
        let mut rtt = new_rtt_estimator();
        let cwnd = new_cwnd();
        assert_matches!(
            rtt.update(Instant::now(), &State::SlowStart, &cwnd),
            Err(Error::MismatchedEstimationCall)
        );
    }

    #[test]
    fn stalled_clock() {
        let mut rtt = new_rtt_estimator();
        let cwnd = new_cwnd();
        let now = Instant::now();
        rtt.expect_sendme(now);
        rtt.update(now, &State::SlowStart, &cwnd).unwrap();
        assert!(rtt.clock_stalled());
        assert!(!rtt.is_ready());

        // A sane measurement in steady state clears it, once we have an estimate.
        rtt.expect_sendme(now);
        rtt.update(now + Duration::from_millis(50), &State::SlowStart, &cwnd)
            .unwrap();
        rtt.expect_sendme(now);
        rtt.update(now + Duration::from_millis(50), &State::Steady, &cwnd)
            .unwrap();
        assert!(!rtt.clock_stalled());
        assert!(rtt.is_ready());
        assert_eq!(rtt.ewma_rtt_usec(), 50_000);
    }
}
