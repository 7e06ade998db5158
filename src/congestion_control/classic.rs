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

/// Multiplicative decrease factor on loss. Default to 0.5.
///
/// See RFC 9002 Section 7.3.2.
const LOSS_BETA: f64 = 0.5;

/// Classic sender Configuration.
#[derive(Debug)]
pub struct ClassicConfig {
    /// The minimal congestion window in packets.
    min_congestion_window: u64,

    /// The initial congestion window in packets.
    initial_congestion_window: u64,

    /// The maximal congestion window in packets.
    max_congestion_window: u64,

    /// Max datagram size in bytes.
    max_datagram_size: u64,

    /// Multiplicative decrease factor for loss.
    loss_beta: f64,

    /// Enable pacing, default to true.
    enable_pacing: bool,

    /// The initial rtt, used before real rtt is estimated.
    initial_rtt: Duration,
}

impl ClassicConfig {
    pub fn from(conf: &RecoveryConfig) -> Self {
        Self {
            min_congestion_window: conf.min_congestion_window,
            initial_congestion_window: conf.initial_congestion_window,
            max_congestion_window: conf.max_congestion_window,
            max_datagram_size: conf.max_datagram_size as u64,
            loss_beta: LOSS_BETA,
            enable_pacing: conf.enable_pacing,
            initial_rtt: conf.initial_rtt,
        }
    }
}

impl Default for ClassicConfig {
    fn default() -> Self {
        Self {
            min_congestion_window: crate::MIN_CONGESTION_WINDOW_PACKETS,
            initial_congestion_window: crate::INITIAL_CONGESTION_WINDOW_PACKETS,
            max_congestion_window: crate::MAX_CONGESTION_WINDOW_PACKETS,
            max_datagram_size: crate::DEFAULT_SEND_UDP_PAYLOAD_SIZE as u64,
            loss_beta: LOSS_BETA,
            enable_pacing: true,
            initial_rtt: crate::INITIAL_RTT,
        }
    }
}

/// The classic loss-based congestion control algorithm of RFC 9002.
///
/// Kept as a sibling of [`super::Prague`] behind the same contract: slow
/// start, Reno-style additive increase, multiplicative decrease on loss.
/// ECN feedback is not consumed; paths carrying CE for a classic sender are
/// handled by the loss machinery.
pub struct Classic {
    /// Configuration.
    config: ClassicConfig,

    /// Congestion window in bytes.
    cwnd: u64,

    /// Slow start threshold in bytes.
    ssthresh: u64,

    /// Whether in slow start.
    in_slow_start: bool,

    /// Whether between a congestion event and the first acknowledgement of a
    /// packet sent after it.
    in_recovery: bool,

    /// The largest packet number handed to the pacer so far.
    largest_sent_pkt_num: Option<u64>,

    /// The largest acknowledged packet number so far.
    largest_acked_pkt_num: Option<u64>,

    /// The largest packet number sent when the last loss cutback was taken.
    largest_sent_at_last_cutback: Option<u64>,

    /// Current max datagram size in bytes. Never decreases.
    max_datagram_size: u64,

    /// Initial congestion window in bytes.
    initial_congestion_window: u64,

    /// Shared rtt estimator, owned and updated by the recovery machinery.
    rtt: Rc<RefCell<RttEstimator>>,

    /// Pacer fed by the bandwidth estimate.
    pacer: Pacer,

    /// Optional event sink.
    tracer: Option<Arc<dyn CongestionTracer>>,

    /// Congestion statistics.
    stats: CongestionStats,
}

impl Classic {
    pub fn new(
        config: ClassicConfig,
        rtt: Rc<RefCell<RttEstimator>>,
        tracer: Option<Arc<dyn CongestionTracer>>,
    ) -> Self {
        let max_datagram_size = config.max_datagram_size;
        let initial_congestion_window = config
            .initial_congestion_window
            .saturating_mul(max_datagram_size);
        let initial_rtt = cmp::max(config.initial_rtt, Duration::from_micros(1));
        let initial_rate = (initial_congestion_window as f64 / initial_rtt.as_secs_f64()) as u64;
        let pacer = Pacer::new(config.enable_pacing, initial_rate, max_datagram_size);

        let classic = Self {
            cwnd: initial_congestion_window,
            ssthresh: u64::MAX,
            in_slow_start: true,
            in_recovery: false,
            largest_sent_pkt_num: None,
            largest_acked_pkt_num: None,
            largest_sent_at_last_cutback: None,
            max_datagram_size,
            initial_congestion_window,
            rtt,
            pacer,
            tracer,
            stats: Default::default(),
            config,
        };

        if let Some(tracer) = &classic.tracer {
            tracer.l4s_state(false, classic.name());
            tracer.congestion_state_changed(CongestionState::SlowStart);
        }
        classic
    }

    fn max_congestion_window(&self) -> u64 {
        self.config
            .max_congestion_window
            .saturating_mul(self.max_datagram_size)
    }

    /// Reno additive increase: one datagram per window of acknowledged bytes.
    fn additive_increase(&mut self, acked_bytes: u64) {
        if self.cwnd >= self.max_congestion_window() {
            return;
        }
        let increase = self.max_datagram_size as f64 * acked_bytes as f64 / self.cwnd as f64;
        self.cwnd = self.cwnd.saturating_add(increase as u64);
    }
}

impl CongestionController for Classic {
    fn name(&self) -> &str {
        "RFC9002"
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
            self.additive_increase(acked_bytes);
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

        if let Some(cutback) = self.largest_sent_at_last_cutback {
            if pkt_num <= cutback {
                return;
            }
        }

        if self.in_slow_start {
            if let Some(tracer) = &self.tracer {
                tracer.slow_start_exit(SlowStartExitReason::Loss, self.cwnd, 0.0);
            }
        }
        self.in_slow_start = false;
        self.in_recovery = true;
        self.largest_sent_at_last_cutback = self.largest_sent_pkt_num.or(Some(pkt_num));

        let old_cwnd = self.cwnd;
        self.ssthresh = (self.cwnd as f64 * self.config.loss_beta) as u64;
        self.cwnd = cmp::max(self.minimal_window(), self.ssthresh);

        if let Some(tracer) = &self.tracer {
            tracer.packet_loss(lost_bytes, self.cwnd);
            tracer.cwnd_changed(CwndChangedReason::Loss, old_cwnd, self.cwnd, 0.0);
            tracer.congestion_state_changed(CongestionState::Recovery);
        }
    }

    fn on_retransmission_timeout(&mut self, _packets_retransmitted: bool) {
        self.largest_sent_at_last_cutback = None;
        self.in_slow_start = false;

        let old_cwnd = self.cwnd;
        self.ssthresh = self.cwnd / 2;
        self.cwnd = self.minimal_window();

        if let Some(tracer) = &self.tracer {
            tracer.cwnd_changed(
                CwndChangedReason::RetransmissionTimeout,
                old_cwnd,
                self.cwnd,
                0.0,
            );
        }
    }

    fn maybe_exit_slow_start(&mut self) {
        if self.in_slow_start && self.cwnd >= self.ssthresh {
            self.in_slow_start = false;
            if let Some(tracer) = &self.tracer {
                tracer.slow_start_exit(SlowStartExitReason::SsthreshReached, self.cwnd, 0.0);
                tracer.congestion_state_changed(CongestionState::CongestionAvoidance);
            }
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
            self.cwnd = self.minimal_window();
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
        let srtt = cmp::max(self.rtt.borrow().smoothed_rtt(), Duration::from_micros(1));
        (self.cwnd as u128 * 1_000_000 / srtt.as_micros()) as u64
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
