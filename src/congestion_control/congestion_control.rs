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

#![allow(unused_variables)]

use core::str::FromStr;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::connection::rtt::RttEstimator;
use crate::trace::CongestionTracer;
use crate::Error;
use crate::RecoveryConfig;
use crate::Result;
pub use classic::Classic;
pub use classic::ClassicConfig;
pub use pacing::Pacer;
pub use prague::Prague;
pub use prague::PragueConfig;

/// Available congestion control algorithms.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub enum CongestionControlAlgorithm {
    /// The classic loss-based sender of RFC 9002: slow start, Reno-style
    /// additive increase, multiplicative decrease on loss.
    #[default]
    Classic,

    /// Prague is a scalable congestion controller derived from DCTCP and tuned
    /// for L4S: CE-mark feedback drives an alpha EWMA which scales both the
    /// additive increase and the multiplicative decrease, keeping queueing
    /// delay low on L4S-capable paths while staying safe on classic ones.
    Prague,
}

impl FromStr for CongestionControlAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<CongestionControlAlgorithm> {
        if algor.eq_ignore_ascii_case("classic") || algor.eq_ignore_ascii_case("rfc9002") {
            Ok(CongestionControlAlgorithm::Classic)
        } else if algor.eq_ignore_ascii_case("prague") {
            Ok(CongestionControlAlgorithm::Prague)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

/// Congestion control statistics.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CongestionStats {
    /// Bytes in flight.
    pub bytes_in_flight: u64,

    /// Total bytes sent in slow start.
    pub bytes_sent_in_slow_start: u64,

    /// Total bytes acked in slow start.
    pub bytes_acked_in_slow_start: u64,

    /// Total bytes lost in slow start.
    pub bytes_lost_in_slow_start: u64,

    /// Total bytes sent.
    pub bytes_sent_in_total: u64,

    /// Total bytes acked.
    pub bytes_acked_in_total: u64,

    /// Total bytes lost.
    pub bytes_lost_in_total: u64,
}

/// Congestion control interfaces shared by different algorithms.
///
/// The surrounding ACK handler and packet scheduler drive a sender through
/// these operations; Classic and Prague implementations are interchangeable.
pub trait CongestionController {
    /// Name of congestion control algorithm.
    fn name(&self) -> &str;

    /// The earliest instant at which the next packet may be paced out, or
    /// `None` if it may be sent immediately.
    fn time_until_send(&self, bytes_in_flight: u64) -> Option<Instant>;

    /// Check if the pacer has accumulated at least one datagram of budget.
    fn has_pacing_budget(&self, now: Instant) -> bool;

    /// Check if the congestion window permits sending.
    fn can_send(&self, bytes_in_flight: u64) -> bool {
        bytes_in_flight < self.congestion_window()
    }

    /// Callback after a packet was sent out.
    ///
    /// Non-retransmittable packets consume pacing budget but do not advance
    /// the largest sent packet number.
    fn on_packet_sent(
        &mut self,
        sent_time: Instant,
        bytes_in_flight: u64,
        pkt_num: u64,
        sent_bytes: u64,
        is_retransmittable: bool,
    );

    /// Callback for processing an acknowledgement.
    fn on_packet_acked(
        &mut self,
        pkt_num: u64,
        acked_bytes: u64,
        prior_in_flight: u64,
        event_time: Instant,
    );

    /// Congestion event, i.e. packet loss.
    fn on_congestion_event(&mut self, pkt_num: u64, lost_bytes: u64, prior_in_flight: u64);

    /// Collapse the window after a retransmission timeout.
    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool);

    /// Check the slow start exit predicates and leave slow start if one holds.
    fn maybe_exit_slow_start(&mut self);

    /// Process CE-marked bytes reported by the peer's AccECN counters.
    ///
    /// Only meaningful for scalable senders; the default implementation
    /// ignores the feedback.
    fn on_ecn_feedback(&mut self, ce_bytes: u64) {}

    /// Update the maximum datagram size. The size never decreases; passing a
    /// smaller value is a programming error and panics.
    fn set_max_datagram_size(&mut self, max_datagram_size: u64);

    /// Current congestion window.
    fn congestion_window(&self) -> u64;

    /// Check if in slow start.
    fn in_slow_start(&self) -> bool;

    /// Check if in recovery mode.
    fn in_recovery(&self) -> bool;

    /// Estimated bandwidth in bytes per second, used to refill the pacer.
    fn bandwidth_estimate(&self) -> u64;

    /// Initial congestion window.
    fn initial_window(&self) -> u64;

    /// Minimal congestion window.
    fn minimal_window(&self) -> u64;

    /// Congestion stats.
    fn stats(&self) -> &CongestionStats;
}

impl fmt::Debug for dyn CongestionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion controller.")
    }
}

/// Build a congestion controller.
pub fn build_congestion_controller(
    conf: &RecoveryConfig,
    rtt: Rc<RefCell<RttEstimator>>,
    tracer: Option<Arc<dyn CongestionTracer>>,
) -> Box<dyn CongestionController> {
    match conf.congestion_control_algorithm {
        CongestionControlAlgorithm::Classic => {
            Box::new(Classic::new(ClassicConfig::from(conf), rtt, tracer))
        }
        CongestionControlAlgorithm::Prague => {
            Box::new(Prague::new(PragueConfig::from(conf), rtt, tracer))
        }
    }
}


mod classic;
mod pacing;
mod prague;
