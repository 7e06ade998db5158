// Copyright (c) 2024 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::cell::RefCell;
use std::cmp;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use super::CongestionController;
use super::CongestionStats;
use super::Pacer;
use crate::connection::rtt::RttEstimator;
use crate::trace::CongestionState;
use crate::trace::CongestionTracer;
use crate::trace::CwndChangedReason;
use crate::trace::SlowStartExitReason;
use crate::RecoveryConfig;

/// EWMA gain for the alpha parameter. Default to 1/16.
///
/// See RFC 9331 Section 2.1 and the DCTCP estimator it derives from
/// (RFC 8257 Section 4.2).
const ALPHA_GAIN: f64 = 1.0 / 16.0;

/// Classic loss response factor. Default to 0.5.
///
/// Prague reacts to loss the way a Reno sender does; only CE marks get the
/// scalable alpha-proportional response.
const LOSS_BETA: f64 = 0.5;

/// Floor on the RTT used for the pacing rate.
///
/// Pacing against a virtual RTT of at least 25ms makes the steady-state
/// marking rate independent of the actual path RTT.
const VIRTUAL_RTT_MIN: Duration = Duration::from_millis(25);

/// Prague Configuration.
#[derive(Debug)]
pub struct PragueConfig {
    /// The minimal congestion window in packets.
    min_congestion_window: u64,

    /// The initial congestion window in packets.
    initial_congestion_window: u64,

    /// The maximal congestion window in packets. Additive increase stops
    /// growing the window beyond it.
    max_congestion_window: u64,

    /// Max datagram size in bytes.
    max_datagram_size: u64,

    /// EWMA gain for alpha updates.
    alpha_gain: f64,

    /// Multiplicative decrease factor for loss.
    loss_beta: f64,

    /// Floor on the RTT used for the pacing rate.
    virtual_rtt_min: Duration,

    /// Whether the connection negotiated L4S. Without it the sender ignores
    /// ECN feedback and behaves like a classic Reno sender.
    enable_l4s: bool,

    /// Enable pacing, default to true.
    enable_pacing: bool,

    /// The initial rtt, used before real rtt is estimated.
    initial_rtt: Duration,
}

impl PragueConfig {
    pub fn from(conf: &RecoveryConfig) -> Self {
        Self {
            min_congestion_window: conf.min_congestion_window,
            initial_congestion_window: conf.initial_congestion_window,
            max_congestion_window: conf.max_congestion_window,
            max_datagram_size: conf.max_datagram_size as u64,
            alpha_gain: ALPHA_GAIN,
            loss_beta: LOSS_BETA,
            virtual_rtt_min: VIRTUAL_RTT_MIN,
            enable_l4s: conf.enable_l4s,
            enable_pacing: conf.enable_pacing,
            initial_rtt: conf.initial_rtt,
        }
    }
}

impl Default for PragueConfig {
    fn default() -> Self {
        Self {
            min_congestion_window: crate::MIN_CONGESTION_WINDOW_PACKETS,
            initial_congestion_window: crate::INITIAL_CONGESTION_WINDOW_PACKETS,
            max_congestion_window: crate::MAX_CONGESTION_WINDOW_PACKETS,
            max_datagram_size: crate::DEFAULT_SEND_UDP_PAYLOAD_SIZE as u64,
            alpha_gain: ALPHA_GAIN,
            loss_beta: LOSS_BETA,
            virtual_rtt_min: VIRTUAL_RTT_MIN,
            enable_l4s: true,
            enable_pacing: true,
            initial_rtt: crate::INITIAL_RTT,
        }
    }
}

/// Prague congestion control algorithm.
///
/// A scalable sender for L4S: the fraction of CE-marked bytes per RTT feeds
/// an EWMA (alpha) which scales both the additive increase and the
/// multiplicative decrease. Loss keeps the classic RFC 9002 response.
///
/// See RFC 9331 and draft-briscoe-iccrg-prague-congestion-control.
pub struct Prague {
    /// Configuration.
    config: PragueConfig,

    /// Congestion window in bytes.
    cwnd: u64,

    /// Slow start threshold in bytes.
    ssthresh: u64,

    /// ECN marking fraction EWMA, in [0, 1].
    alpha: f64,

    /// Fractional remainder of the multiplicative decrease, carried so that
    /// repeated small decrements do not round away.
    cwnd_carry: f64,

    /// Whether in slow start.
    in_slow_start: bool,

    /// Whether between a congestion event and the first acknowledgement of a
    /// packet sent after it.
    in_recovery: bool,

    /// Whether the last loss cutback was the event that ended slow start.
    last_cutback_exited_slow_start: bool,

    /// The largest packet number handed to the pacer so far.
    largest_sent_pkt_num: Option<u64>,

    /// The largest acknowledged packet number so far.
    largest_acked_pkt_num: Option<u64>,

    /// The largest packet number sent when the last loss cutback was taken.
    /// `None` when no cutback is outstanding.
    largest_sent_at_last_cutback: Option<u64>,

    /// CE-marked bytes accumulated in the current alpha sample window.
    ecn_marked_bytes: u64,

    /// Acknowledged bytes accumulated in the current alpha sample window.
    total_acked_bytes: u64,

    /// Current max datagram size in bytes. Never decreases.
    max_datagram_size: u64,

    /// Initial congestion window in bytes.
    initial_congestion_window: u64,

    /// Shared rtt estimator, owned and updated by the recovery machinery.
    rtt: Rc<RefCell<RttEstimator>>,

    /// Pacer fed by the virtual-RTT bandwidth estimate.
    pacer: Pacer,

    /// Optional event sink.
    tracer: Option<Arc<dyn CongestionTracer>>,

    /// Congestion statistics.
    stats: CongestionStats,
}

impl Prague {
    pub fn new(
        config: PragueConfig,
        rtt: Rc<RefCell<RttEstimator>>,
        tracer: Option<Arc<dyn CongestionTracer>>,
    ) -> Self {
        let max_datagram_size = config.max_datagram_size;
        let initial_congestion_window = config
            .initial_congestion_window
            .saturating_mul(max_datagram_size);
        let initial_virtual_rtt = cmp::max(config.initial_rtt, config.virtual_rtt_min);
        let initial_rate =
            (initial_congestion_window as f64 / initial_virtual_rtt.as_secs_f64()) as u64;
        let pacer = Pacer::new(config.enable_pacing, initial_rate, max_datagram_size);

        let prague = Self {
            cwnd: initial_congestion_window,
            ssthresh: u64::MAX,
            alpha: 0.0,
            cwnd_carry: 0.0,
            in_slow_start: true,
            in_recovery: false,
            last_cutback_exited_slow_start: false,
            largest_sent_pkt_num: None,
            largest_acked_pkt_num: None,
            largest_sent_at_last_cutback: None,
            ecn_marked_bytes: 0,
            total_acked_bytes: 0,
            max_datagram_size,
            initial_congestion_window,
            rtt,
            pacer,
            tracer,
            stats: Default::default(),
            config,
        };

        if let Some(tracer) = &prague.tracer {
            tracer.l4s_state(prague.config.enable_l4s, prague.name());
            tracer.congestion_state_changed(CongestionState::SlowStart);
        }
        prague
    }

    /// The RTT used for the pacing rate: the smoothed RTT, floored at the
    /// configured minimum so that short paths do not pace harder than long
    /// ones.
    fn virtual_rtt(&self) -> Duration {
        cmp::max(self.rtt.borrow().smoothed_rtt(), self.config.virtual_rtt_min)
    }

    fn max_congestion_window(&self) -> u64 {
        self.config
            .max_congestion_window
            .saturating_mul(self.max_datagram_size)
    }

    /// Whether the most recent loss cutback was the event that ended slow
    /// start.
    pub fn last_cutback_exited_slow_start(&self) -> bool {
        self.last_cutback_exited_slow_start
    }

    /// Recompute alpha from the closed sample window.
    fn update_alpha(&mut self) {
        if self.total_acked_bytes == 0 {
            return;
        }

        let marking_fraction = self.ecn_marked_bytes as f64 / self.total_acked_bytes as f64;

        // The first congestion signal bootstraps alpha to 1.0 for the maximum
        // response; afterwards the EWMA takes over.
        if self.alpha == 0.0 && marking_fraction > 0.0 {
            self.alpha = 1.0;
        } else {
            self.alpha = (1.0 - self.config.alpha_gain) * self.alpha
                + self.config.alpha_gain * marking_fraction;
        }
        self.alpha = self.alpha.clamp(0.0, 1.0);

        if let Some(tracer) = &self.tracer {
            tracer.alpha_updated(self.alpha, marking_fraction);
        }
    }

    /// Prague multiplicative decrease: cwnd shrinks by alpha/2.
    ///
    /// The reduction is computed in floating point; the sub-byte remainder is
    /// carried into the next decrease so the long-run reduction matches the
    /// exact product.
    fn apply_ecn_congestion_response(&mut self) {
        if self.alpha <= 0.0 {
            return;
        }

        let reduction = self.cwnd as f64 * (self.alpha / 2.0) + self.cwnd_carry;
        let whole = reduction.floor();
        self.cwnd_carry = reduction - whole;

        let old_cwnd = self.cwnd;
        self.cwnd = cmp::max(
            self.cwnd.saturating_sub(whole as u64),
            self.minimal_window(),
        );

        if let Some(tracer) = &self.tracer {
            tracer.cwnd_changed(
                CwndChangedReason::EcnResponse,
                old_cwnd,
                self.cwnd,
                self.alpha,
            );
        }

        if self.in_slow_start {
            self.in_slow_start = false;
            if let Some(tracer) = &self.tracer {
                tracer.slow_start_exit(SlowStartExitReason::EcnSignal, self.cwnd, self.alpha);
                tracer.congestion_state_changed(CongestionState::CongestionAvoidance);
            }
        }
    }

    /// Prague additive increase.
    ///
    /// Acknowledged-but-CE-marked bytes contribute no window growth:
    /// the increase per ACK is `mss * acked * (1 - alpha) / cwnd`.
    fn prague_additive_increase(&mut self, acked_bytes: u64) {
        if self.cwnd >= self.max_congestion_window() {
            return;
        }

        let effective_acked = if self.config.enable_l4s && self.alpha > 0.0 {
            acked_bytes as f64 * (1.0 - self.alpha)
        } else {
            acked_bytes as f64
        };

        let increase = self.max_datagram_size as f64 * effective_acked / self.cwnd as f64;
        self.cwnd = self.cwnd.saturating_add(increase as u64);
    }
}

impl CongestionController for Prague {
    fn name(&self) -> &str {
        "PRAGUE"
    }

    fn time_until_send(&self, _bytes_in_flight: u64) -> Option<Instant> {
        self.pacer.time_until_send(self.bandwidth_estimate())
    }

    fn has_pacing_budget(&self, now: Instant) -> bool {
        self.pacer.budget(now, self.bandwidth_estimate()) >= self.max_datagram_size
    }

    fn on_packet_sent(
        &mut self,
        sent_time: Instant,
        bytes_in_flight: u64,
        pkt_num: u64,
        sent_bytes: u64,
        is_retransmittable: bool,
    ) {
        let rate = self.bandwidth_estimate();
        self.pacer.on_sent(sent_time, sent_bytes, rate);

        if !is_retransmittable {
            return;
        }

        match self.largest_sent_pkt_num {
            Some(largest) if pkt_num <= largest => (),
            _ => self.largest_sent_pkt_num = Some(pkt_num),
        }

        // Statistics.
        self.stats.bytes_in_flight = bytes_in_flight.saturating_add(sent_bytes);
        self.stats.bytes_sent_in_total = self.stats.bytes_sent_in_total.saturating_add(sent_bytes);
        if self.in_slow_start {
            self.stats.bytes_sent_in_slow_start = self
                .stats
                .bytes_sent_in_slow_start
                .saturating_add(sent_bytes);
        }
    }

    fn on_packet_acked(
        &mut self,
        pkt_num: u64,
        acked_bytes: u64,
        prior_in_flight: u64,
        _event_time: Instant,
    ) {
        match self.largest_acked_pkt_num {
            Some(largest) if pkt_num <= largest => (),
            _ => self.largest_acked_pkt_num = Some(pkt_num),
        }

        // Every acknowledged byte feeds the current alpha sample window,
        // including acks processed during recovery.
        self.total_acked_bytes = self.total_acked_bytes.saturating_add(acked_bytes);

        // Statistics.
        self.stats.bytes_in_flight = prior_in_flight.saturating_sub(acked_bytes);
        self.stats.bytes_acked_in_total =
            self.stats.bytes_acked_in_total.saturating_add(acked_bytes);
        if self.in_slow_start {
            self.stats.bytes_acked_in_slow_start = self
                .stats
                .bytes_acked_in_slow_start
                .saturating_add(acked_bytes);
        }

        if self.in_recovery {
            // Recovery ends with the acknowledgement of a packet sent after
            // the cutback.
            let exited = match self.largest_sent_at_last_cutback {
                Some(cutback) => self.largest_acked_pkt_num > Some(cutback),
                None => true,
            };
            if !exited {
                // Don't increase cwnd during recovery.
                return;
            }
            self.in_recovery = false;
            if let Some(tracer) = &self.tracer {
                tracer.congestion_state_changed(CongestionState::CongestionAvoidance);
            }
        }

        if self.in_slow_start {
            self.cwnd = self.cwnd.saturating_add(acked_bytes);
            self.maybe_exit_slow_start();
        } else {
            self.prague_additive_increase(acked_bytes);
        }
    }

    fn on_congestion_event(&mut self, pkt_num: u64, lost_bytes: u64, prior_in_flight: u64) {
        // Statistics.
        self.stats.bytes_lost_in_total = self.stats.bytes_lost_in_total.saturating_add(lost_bytes);
        self.stats.bytes_in_flight = prior_in_flight.saturating_sub(lost_bytes);
        if self.in_slow_start {
            self.stats.bytes_lost_in_slow_start = self
                .stats
                .bytes_lost_in_slow_start
                .saturating_add(lost_bytes);
        }

        // Prague uses the classic loss response; a loss within the window of
        // an earlier cutback has already been answered.
        if let Some(cutback) = self.largest_sent_at_last_cutback {
            if pkt_num <= cutback {
                return;
            }
        }

        self.last_cutback_exited_slow_start = self.in_slow_start;
        if self.in_slow_start {
            if let Some(tracer) = &self.tracer {
                tracer.slow_start_exit(SlowStartExitReason::Loss, self.cwnd, self.alpha);
            }
        }
        self.in_slow_start = false;
        self.in_recovery = true;
        self.largest_sent_at_last_cutback = self.largest_sent_pkt_num.or(Some(pkt_num));
        self.cwnd_carry = 0.0;

        let old_cwnd = self.cwnd;
        self.ssthresh = (self.cwnd as f64 * self.config.loss_beta) as u64;
        self.cwnd = cmp::max(self.minimal_window(), self.ssthresh);

        if let Some(tracer) = &self.tracer {
            tracer.packet_loss(lost_bytes, self.cwnd);
            tracer.cwnd_changed(CwndChangedReason::Loss, old_cwnd, self.cwnd, self.alpha);
            tracer.congestion_state_changed(CongestionState::Recovery);
        }
    }

    fn on_retransmission_timeout(&mut self, _packets_retransmitted: bool) {
        self.largest_sent_at_last_cutback = None;
        self.in_slow_start = false;
        self.cwnd_carry = 0.0;

        let old_cwnd = self.cwnd;
        self.ssthresh = self.cwnd / 2;
        self.cwnd = self.minimal_window();

        if let Some(tracer) = &self.tracer {
            tracer.cwnd_changed(
                CwndChangedReason::RetransmissionTimeout,
                old_cwnd,
                self.cwnd,
                self.alpha,
            );
        }
    }

    fn maybe_exit_slow_start(&mut self) {
        // Prague exits slow start on the first ECN congestion signal or when
        // the window reaches ssthresh.
        if self.in_slow_start && (self.alpha > 0.0 || self.cwnd >= self.ssthresh) {
            self.in_slow_start = false;
            if let Some(tracer) = &self.tracer {
                let reason = if self.alpha > 0.0 {
                    SlowStartExitReason::EcnSignal
                } else {
                    SlowStartExitReason::SsthreshReached
                };
                tracer.slow_start_exit(reason, self.cwnd, self.alpha);
                tracer.congestion_state_changed(CongestionState::CongestionAvoidance);
            }
        }
    }

    fn on_ecn_feedback(&mut self, ce_bytes: u64) {
        if !self.config.enable_l4s {
            return;
        }

        self.ecn_marked_bytes = self.ecn_marked_bytes.saturating_add(ce_bytes);

        // The sample window closes as soon as acknowledged bytes back the
        // marking fraction.
        if self.total_acked_bytes > 0 {
            if let Some(tracer) = &self.tracer {
                tracer.ecn_feedback(self.ecn_marked_bytes, self.total_acked_bytes);
            }

            self.update_alpha();
            self.apply_ecn_congestion_response();

            self.ecn_marked_bytes = 0;
            self.total_acked_bytes = 0;
        }
    }

    fn set_max_datagram_size(&mut self, max_datagram_size: u64) {
        if max_datagram_size < self.max_datagram_size {
            panic!(
                "congestion BUG: decreasing max datagram size from {} to {}",
                self.max_datagram_size, max_datagram_size
            );
        }

        let cwnd_is_min_cwnd = self.cwnd == self.minimal_window();
        self.max_datagram_size = max_datagram_size;
        self.pacer.set_max_datagram_size(max_datagram_size);
        if cwnd_is_min_cwnd {
            let old_cwnd = self.cwnd;
            self.cwnd = self.minimal_window();
            if let Some(tracer) = &self.tracer {
                tracer.cwnd_changed(
                    CwndChangedReason::DatagramSizeChanged,
                    old_cwnd,
                    self.cwnd,
                    self.alpha,
                );
            }
        }
    }

    fn congestion_window(&self) -> u64 {
        self.cwnd
    }

    fn in_slow_start(&self) -> bool {
        self.in_slow_start
    }

    fn in_recovery(&self) -> bool {
        self.in_recovery
    }

    fn bandwidth_estimate(&self) -> u64 {
        let virtual_rtt = self.virtual_rtt();
        (self.cwnd as u128 * 1_000_000 / virtual_rtt.as_micros().max(1)) as u64
    }

    fn initial_window(&self) -> u64 {
        self.initial_congestion_window
    }

    fn minimal_window(&self) -> u64 {
        self.config
            .min_congestion_window
            .saturating_mul(self.max_datagram_size)
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSS: u64 = 1200;

    fn new_prague(enable_l4s: bool) -> Prague {
        let config = PragueConfig {
            enable_l4s,
            ..PragueConfig::default()
        };
        let rtt = Rc::new(RefCell::new(RttEstimator::new(crate::INITIAL_RTT)));
        Prague::new(config, rtt, None)
    }

    // Send packets until the window is filled, returning the number sent and
    // the resulting bytes in flight.
    fn fill_send_window(p: &mut Prague, now: Instant, first_pkt_num: u64) -> (u64, u64) {
        let mut pkt_num = first_pkt_num;
        let mut bytes_in_flight = 0;
        while p.can_send(bytes_in_flight) {
            p.on_packet_sent(now, bytes_in_flight, pkt_num, MSS, true);
            pkt_num += 1;
            bytes_in_flight += MSS;
        }
        (pkt_num - first_pkt_num, bytes_in_flight)
    }

    #[test]
    fn prague_startup() {
        let mut p = new_prague(true);
        assert_eq!(p.name(), "PRAGUE");
        assert_eq!(p.congestion_window(), 32 * MSS);
        assert_eq!(p.initial_window(), 32 * MSS);
        assert_eq!(p.minimal_window(), 2 * MSS);
        assert!(p.in_slow_start());
        assert!(!p.in_recovery());

        // Nothing sent yet, no pacing delay.
        assert_eq!(p.time_until_send(0), None);
        assert!(p.has_pacing_budget(Instant::now()));
        assert!(p.can_send(0));

        // Fill the send window, then verify that we can't send.
        let now = Instant::now();
        let (sent, bytes_in_flight) = fill_send_window(&mut p, now, 1);
        assert_eq!(sent, 32);
        assert!(!p.can_send(bytes_in_flight));
        assert_eq!(p.largest_sent_pkt_num, Some(32));
    }

    #[test]
    fn prague_slow_start_growth() {
        let mut p = new_prague(true);
        let now = Instant::now();
        let initial_cwnd = p.congestion_window();

        fill_send_window(&mut p, now, 1);
        for pkt_num in 1..=10 {
            p.on_packet_acked(pkt_num, MSS, 32 * MSS, now);
        }

        // Each acknowledged byte adds one byte to cwnd.
        assert!(p.in_slow_start());
        assert_eq!(p.congestion_window(), initial_cwnd + 10 * MSS);
        assert_eq!(p.total_acked_bytes, 10 * MSS);
        assert_eq!(p.stats().bytes_acked_in_slow_start, 10 * MSS);
    }

    #[test]
    fn prague_cold_start_ce_sample() {
        // Cold start, one CE sample at 25% marking: alpha bootstraps to 1.0
        // and the window halves.
        let mut p = new_prague(true);
        assert_eq!(p.congestion_window(), 38400);

        p.total_acked_bytes = 12000;
        p.on_ecn_feedback(2400);

        assert_eq!(p.alpha, 1.0);
        assert_eq!(p.congestion_window(), 19200);
        assert!(!p.in_slow_start());
        // The sample window reset.
        assert_eq!(p.total_acked_bytes, 0);
        assert_eq!(p.ecn_marked_bytes, 0);
    }

    #[test]
    fn prague_alpha_ewma() {
        // A second sample at 10% marking moves alpha by one EWMA step.
        let mut p = new_prague(true);
        p.total_acked_bytes = 12000;
        p.on_ecn_feedback(2400);
        assert_eq!(p.congestion_window(), 19200);

        p.total_acked_bytes = 12000;
        p.on_ecn_feedback(1200);

        let expected_alpha = (1.0 - 1.0 / 16.0) * 1.0 + (1.0 / 16.0) * 0.1;
        assert!((p.alpha - expected_alpha).abs() < 1e-9);
        // cwnd = 19200 - floor(19200 * alpha / 2) = 19200 - 9060
        assert_eq!(p.congestion_window(), 10140);
    }

    #[test]
    fn prague_ecn_feedback_without_acked_sample() {
        // CE bytes arriving before any acknowledged bytes only accumulate;
        // the flush waits for a backing sample.
        let mut p = new_prague(true);
        p.on_ecn_feedback(2400);
        assert_eq!(p.alpha, 0.0);
        assert_eq!(p.congestion_window(), 38400);
        assert_eq!(p.ecn_marked_bytes, 2400);
        assert!(p.in_slow_start());
    }

    #[test]
    fn prague_no_ecn_response_without_l4s() {
        let mut p = new_prague(false);
        let now = Instant::now();
        fill_send_window(&mut p, now, 1);
        p.on_packet_acked(1, MSS, 32 * MSS, now);

        let cwnd = p.congestion_window();
        let alpha = p.alpha;
        for ce_bytes in [0, 1, MSS, 100 * MSS] {
            p.on_ecn_feedback(ce_bytes);
            assert_eq!(p.alpha, alpha);
            assert_eq!(p.congestion_window(), cwnd);
        }
    }

    #[test]
    fn prague_classic_loss() {
        let mut p = new_prague(true);
        let now = Instant::now();

        // Build the window to 60000 bytes with no ECN involvement.
        p.cwnd = 60000;
        p.on_packet_sent(now, 0, 200, MSS, true);
        assert_eq!(p.largest_sent_pkt_num, Some(200));

        p.on_congestion_event(100, MSS, 60000);
        assert_eq!(p.ssthresh, 30000);
        assert_eq!(p.congestion_window(), 30000);
        assert!(p.in_recovery());
        assert!(!p.in_slow_start());
        assert!(p.last_cutback_exited_slow_start());
        assert_eq!(p.largest_sent_at_last_cutback, Some(200));

        // A second loss inside the same window changes nothing.
        p.on_congestion_event(150, MSS, 60000);
        assert_eq!(p.ssthresh, 30000);
        assert_eq!(p.congestion_window(), 30000);
        assert!(p.in_recovery());
    }

    #[test]
    fn prague_recovery_exit() {
        let mut p = new_prague(true);
        let now = Instant::now();

        p.cwnd = 60000;
        p.on_packet_sent(now, 0, 200, MSS, true);
        p.on_congestion_event(100, MSS, 60000);
        assert!(p.in_recovery());
        let cwnd_in_recovery = p.congestion_window();

        // Acks for packets sent before the cutback do not grow the window.
        p.on_packet_acked(150, MSS, 30000, now);
        assert!(p.in_recovery());
        assert_eq!(p.congestion_window(), cwnd_in_recovery);

        // The first ack of a packet sent after the cutback ends recovery and
        // resumes additive increase.
        p.on_packet_sent(now, 0, 201, MSS, true);
        p.on_packet_acked(201, MSS, 30000, now);
        assert!(!p.in_recovery());

        let cwnd = p.congestion_window();
        p.on_packet_acked(202, MSS, 30000, now);
        assert!(p.congestion_window() > cwnd);
    }

    #[test]
    fn prague_retransmission_timeout() {
        let mut p = new_prague(true);
        let initial_cwnd = p.congestion_window();

        p.on_retransmission_timeout(true);
        assert_eq!(p.congestion_window(), 2 * MSS);
        assert_eq!(p.ssthresh, initial_cwnd / 2);
        assert!(!p.in_slow_start());
        assert_eq!(p.largest_sent_at_last_cutback, None);

        // The next loss reacts again despite the earlier cutback history.
        let now = Instant::now();
        p.cwnd = 60000;
        p.on_packet_sent(now, 0, 300, MSS, true);
        p.on_congestion_event(10, MSS, 60000);
        assert_eq!(p.congestion_window(), 30000);
        assert!(p.in_recovery());
    }

    #[test]
    fn prague_additive_increase_scaled_by_alpha() {
        let mut p = new_prague(true);
        let now = Instant::now();

        p.total_acked_bytes = 12000;
        p.on_ecn_feedback(2400);
        p.alpha = 0.2;
        let cwnd = p.congestion_window();

        p.on_packet_acked(1, MSS, 32 * MSS, now);

        let expected_increase = MSS as f64 * MSS as f64 * (1.0 - 0.2) / cwnd as f64;
        assert_eq!(p.congestion_window(), cwnd + expected_increase as u64);
    }

    #[test]
    fn prague_additive_increase_capped() {
        let mut p = new_prague(true);
        let now = Instant::now();
        p.in_slow_start = false;

        p.cwnd = p.max_congestion_window();
        p.on_packet_acked(1, MSS, p.cwnd, now);
        assert_eq!(p.congestion_window(), p.max_congestion_window());
    }

    #[test]
    fn prague_cwnd_carry_accumulates() {
        let mut p = new_prague(true);
        p.in_slow_start = false;
        p.cwnd = 48000;
        p.alpha = 0.00001;

        // Each decrease removes a fraction of a byte; the carry keeps it.
        p.apply_ecn_congestion_response();
        assert_eq!(p.congestion_window(), 48000);
        assert!(p.cwnd_carry > 0.0);

        let mut carried = p.cwnd_carry;
        for _ in 0..10 {
            p.apply_ecn_congestion_response();
            carried += p.cwnd as f64 * (p.alpha / 2.0);
        }
        // The accumulated fractions were eventually paid in whole bytes.
        assert_eq!(48000 - p.congestion_window(), carried as u64);
        assert!(p.cwnd_carry < 1.0);
    }

    #[test]
    fn prague_carry_reset_on_cutback() {
        let mut p = new_prague(true);
        let now = Instant::now();
        p.in_slow_start = false;
        p.cwnd = 48000;
        p.alpha = 0.00001;
        p.apply_ecn_congestion_response();
        assert!(p.cwnd_carry > 0.0);

        p.on_packet_sent(now, 0, 10, MSS, true);
        p.on_congestion_event(5, MSS, 48000);
        assert_eq!(p.cwnd_carry, 0.0);

        p.cwnd_carry = 0.5;
        p.on_retransmission_timeout(true);
        assert_eq!(p.cwnd_carry, 0.0);
    }

    #[test]
    fn prague_alpha_stays_in_range() {
        let mut p = new_prague(true);

        // Out-of-range values are pulled back into [0, 1] by the next update.
        p.alpha = -0.5;
        p.total_acked_bytes = 10 * MSS;
        p.ecn_marked_bytes = 0;
        p.update_alpha();
        assert!(p.alpha >= 0.0);

        p.alpha = 1.5;
        p.total_acked_bytes = 10 * MSS;
        p.update_alpha();
        assert!(p.alpha <= 1.0);

        // Alpha remains in range across an arbitrary feedback sequence.
        let mut p = new_prague(true);
        for (acked, marked) in [
            (12000, 12000),
            (12000, 0),
            (1, 1),
            (100 * MSS, 3 * MSS),
            (MSS, 2 * MSS),
            (12000, 600),
        ] {
            p.total_acked_bytes = acked;
            p.on_ecn_feedback(marked);
            assert!((0.0..=1.0).contains(&p.alpha), "alpha={}", p.alpha);
        }
    }

    #[test]
    fn prague_cwnd_floor() {
        let mut p = new_prague(true);
        let now = Instant::now();

        // Saturated marking for many rounds cannot push cwnd below the floor.
        for _ in 0..50 {
            p.total_acked_bytes = 12000;
            p.on_ecn_feedback(12000);
            assert!(p.congestion_window() >= p.minimal_window());
        }

        // Neither can repeated losses.
        let mut pkt_num = 1;
        for _ in 0..10 {
            p.on_packet_sent(now, 0, pkt_num, MSS, true);
            p.on_congestion_event(pkt_num, MSS, p.congestion_window());
            assert!(p.congestion_window() >= p.minimal_window());
            pkt_num += 1;
        }

        p.on_retransmission_timeout(true);
        assert_eq!(p.congestion_window(), p.minimal_window());
    }

    #[test]
    #[should_panic(expected = "congestion BUG")]
    fn prague_datagram_size_decrease() {
        let mut p = new_prague(true);
        p.set_max_datagram_size(MSS - 1);
    }

    #[test]
    fn prague_datagram_size_increase() {
        let mut p = new_prague(true);

        // Window pinned at the floor rescales with the datagram size.
        p.cwnd = p.minimal_window();
        p.set_max_datagram_size(MSS + 100);
        assert_eq!(p.max_datagram_size, MSS + 100);
        assert_eq!(p.congestion_window(), 2 * (MSS + 100));

        // Otherwise the window is left alone.
        let mut p = new_prague(true);
        let cwnd = p.congestion_window();
        p.set_max_datagram_size(MSS + 100);
        assert_eq!(p.congestion_window(), cwnd);
    }

    #[test]
    fn prague_bandwidth_virtual_rtt_floor() {
        let p = new_prague(true);

        // A short path is paced against the virtual RTT floor.
        p.rtt.borrow_mut().update(Duration::ZERO, Duration::from_millis(10));
        assert_eq!(p.virtual_rtt(), Duration::from_millis(25));
        assert_eq!(
            p.bandwidth_estimate(),
            (p.congestion_window() as u128 * 1_000_000 / 25_000) as u64
        );

        // A longer path uses the measured smoothed RTT.
        let p = new_prague(true);
        p.rtt.borrow_mut().update(Duration::ZERO, Duration::from_millis(100));
        assert_eq!(p.virtual_rtt(), Duration::from_millis(100));
        assert_eq!(
            p.bandwidth_estimate(),
            (p.congestion_window() as u128 * 1_000_000 / 100_000) as u64
        );
    }

    #[test]
    fn prague_pacing_blocks_after_burst() {
        let mut p = new_prague(true);
        p.rtt.borrow_mut().update(Duration::ZERO, Duration::from_millis(60));
        let now = Instant::now();

        assert!(p.has_pacing_budget(now));
        fill_send_window(&mut p, now, 1);

        // The initial bucket is spent; the next send has to wait.
        assert!(!p.has_pacing_budget(now));
        let next = p.time_until_send(32 * MSS);
        assert!(next.is_some());
        assert!(next.unwrap() > now);
        assert!(p.has_pacing_budget(next.unwrap()));
    }

    #[test]
    fn prague_slow_start_exit_on_ssthresh() {
        let mut p = new_prague(true);
        let now = Instant::now();
        p.ssthresh = p.congestion_window() + 2 * MSS;

        p.on_packet_acked(1, MSS, 32 * MSS, now);
        assert!(p.in_slow_start());
        p.on_packet_acked(2, MSS, 32 * MSS, now);
        assert!(!p.in_slow_start());
        assert!(p.congestion_window() >= p.ssthresh);
    }
}
