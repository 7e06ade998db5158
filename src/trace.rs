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

//! Structured observability for congestion control.
//!
//! Senders report state transitions and ECN feedback through an optional
//! [`CongestionTracer`]. Tracers are observers only; they get immutable
//! references and cannot influence the sender.

use log::debug;
use serde::Deserialize;
use serde::Serialize;

/// Significant states of the congestion controller.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum CongestionState {
    /// The window grows by the number of acknowledged bytes.
    SlowStart,

    /// Additive increase, multiplicative decrease.
    CongestionAvoidance,

    /// Between a congestion event and the first acknowledgement of a packet
    /// sent after that event.
    Recovery,

    /// The sender has less data to send than the window permits.
    ApplicationLimited,
}

/// Why the congestion window changed.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum CwndChangedReason {
    /// Multiplicative decrease driven by ECN CE marks.
    EcnResponse,

    /// Classic loss response.
    Loss,

    /// Collapse after a retransmission timeout.
    RetransmissionTimeout,

    /// Rescale after the maximum datagram size grew.
    DatagramSizeChanged,
}

/// Why slow start ended.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum SlowStartExitReason {
    /// The first ECN congestion signal arrived (alpha became positive).
    EcnSignal,

    /// The window reached the slow start threshold.
    SsthreshReached,

    /// A packet loss was detected.
    Loss,
}

/// Observer of congestion controller events.
///
/// All methods default to no-ops, so a sink only implements the events it
/// cares about. Within one event kind, calls arrive in causal order.
pub trait CongestionTracer: std::fmt::Debug {
    /// The alpha EWMA was recomputed from a marking-fraction sample.
    fn alpha_updated(&self, alpha: f64, marking_fraction: f64) {}

    /// An ECN feedback sample window closed.
    fn ecn_feedback(&self, ce_bytes_sample: u64, total_bytes_sample: u64) {}

    /// The congestion window changed for the given reason.
    fn cwnd_changed(&self, reason: CwndChangedReason, old_cwnd: u64, new_cwnd: u64, alpha: f64) {}

    /// The congestion controller entered a new state.
    fn congestion_state_changed(&self, state: CongestionState) {}

    /// L4S mode was resolved for the connection.
    fn l4s_state(&self, enabled: bool, algorithm: &str) {}

    /// Slow start ended.
    fn slow_start_exit(&self, reason: SlowStartExitReason, cwnd: u64, alpha: f64) {}

    /// Bytes were declared lost.
    fn packet_loss(&self, lost_bytes: u64, cwnd: u64) {}
}

/// A tracer that forwards every event to the `log` facade at debug level.
#[derive(Debug)]
pub struct LogTracer {
    /// Connection identifier carried on every line, for multi-connection
    /// debugging.
    trace_id: String,
}

impl LogTracer {
    pub fn new(trace_id: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
        }
    }
}

impl CongestionTracer for LogTracer {
    fn alpha_updated(&self, alpha: f64, marking_fraction: f64) {
        debug!(
            "{} alpha updated: alpha={:.6} marking_fraction={:.6}",
            self.trace_id, alpha, marking_fraction
        );
    }

    fn ecn_feedback(&self, ce_bytes_sample: u64, total_bytes_sample: u64) {
        debug!(
            "{} ecn feedback: marked_bytes={} total_bytes={} marking_rate={:.4}",
            self.trace_id,
            ce_bytes_sample,
            total_bytes_sample,
            ce_bytes_sample as f64 / total_bytes_sample as f64
        );
    }

    fn cwnd_changed(&self, reason: CwndChangedReason, old_cwnd: u64, new_cwnd: u64, alpha: f64) {
        debug!(
            "{} cwnd changed ({:?}): {} -> {} alpha={:.6}",
            self.trace_id, reason, old_cwnd, new_cwnd, alpha
        );
    }

    fn congestion_state_changed(&self, state: CongestionState) {
        debug!("{} congestion state: {:?}", self.trace_id, state);
    }

    fn l4s_state(&self, enabled: bool, algorithm: &str) {
        let status = if enabled { "enabled" } else { "disabled" };
        debug!("{} L4S {} with algorithm {}", self.trace_id, status, algorithm);
    }

    fn slow_start_exit(&self, reason: SlowStartExitReason, cwnd: u64, alpha: f64) {
        debug!(
            "{} exited slow start ({:?}): cwnd={} alpha={:.6}",
            self.trace_id, reason, cwnd, alpha
        );
    }

    fn packet_loss(&self, lost_bytes: u64, cwnd: u64) {
        debug!(
            "{} packet loss: lost_bytes={} cwnd={}",
            self.trace_id, lost_bytes, cwnd
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn congestion_state_names() {
        let cases = [
            (CongestionState::SlowStart, "\"slow_start\""),
            (
                CongestionState::CongestionAvoidance,
                "\"congestion_avoidance\"",
            ),
            (CongestionState::Recovery, "\"recovery\""),
            (CongestionState::ApplicationLimited, "\"application_limited\""),
        ];
        for (state, name) in cases {
            assert_eq!(serde_json::to_string(&state).unwrap(), name);
        }
    }

    #[test]
    fn noop_tracer() {
        // A sink that overrides nothing accepts every event.
        #[derive(Debug)]
        struct Silent;
        impl CongestionTracer for Silent {}

        let t = Silent;
        t.alpha_updated(0.5, 0.25);
        t.ecn_feedback(1200, 12000);
        t.cwnd_changed(CwndChangedReason::EcnResponse, 38400, 19200, 1.0);
        t.congestion_state_changed(CongestionState::Recovery);
        t.l4s_state(true, "PRAGUE");
        t.slow_start_exit(SlowStartExitReason::EcnSignal, 19200, 1.0);
        t.packet_loss(1200, 19200);
    }

    #[test]
    fn log_tracer() {
        let t = LogTracer::new("test-conn");
        t.l4s_state(true, "PRAGUE");
        t.alpha_updated(1.0, 0.2);
        t.ecn_feedback(2400, 12000);
    }
}
