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
use std::ops::Range;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use log::*;

use crate::congestion_control;
use crate::congestion_control::CongestionController;
use crate::connection::rtt::RttEstimator;
use crate::connection::space::AckedPacket;
use crate::connection::space::PacketNumSpace;
use crate::connection::space::SentPacket;
use crate::ecn::select_ecn_codepoint;
use crate::ecn::EcnCodepoint;
use crate::ecn::EcnValidationState;
use crate::frame::EcnCounts;
use crate::trace::CongestionTracer;
use crate::Config;
use crate::CongestionControlAlgorithm;
use crate::Error;
use crate::Result;

/// Consecutive inconsistent AccECN samples tolerated before ECN is demoted
/// for the connection.
const ECN_INCONSISTENCY_DEMOTION_THRESHOLD: u32 = 3;

/// The bridge between the ACK handler and the congestion controller.
///
/// `Recovery` accounts sent packets, detects newly acknowledged ones, keeps
/// the RTT estimator current, and turns the cumulative AccECN counters of
/// each ACK into per-sample CE-byte feedback for a scalable sender. It owns
/// the per-connection sender built from the validated configuration.
pub struct Recovery {
    /// In-flight bytes of the connection.
    bytes_in_flight: usize,

    /// RTT estimation of the network path, shared read-only with the sender.
    rtt: Rc<RefCell<RttEstimator>>,

    /// Congestion controller of the connection.
    pub(crate) congestion: Box<dyn CongestionController>,

    /// Send-side state of the application packet number space.
    space: PacketNumSpace,

    /// Whether the connection negotiated L4S.
    enable_l4s: bool,

    /// The configured congestion control algorithm.
    algorithm: CongestionControlAlgorithm,

    /// The maximum datagram size, used to approximate CE-marked bytes from
    /// CE-marked packet counts.
    max_datagram_size: u64,

    /// Verdict of ECN validation for the path. Fed by the external validator
    /// and demoted locally on persistently inconsistent AccECN feedback.
    ecn_validation: EcnValidationState,

    /// Consecutive AccECN samples that violated a sanity check.
    ecn_inconsistent_samples: u32,

    /// Trace id of the connection.
    trace_id: String,
}

impl Recovery {
    /// Build the recovery machinery for a connection.
    ///
    /// Fails with `Error::InvalidConfig` before any packet is handled when
    /// the configuration pairs L4S with a non-Prague controller.
    pub fn new(conf: &Config, tracer: Option<Arc<dyn CongestionTracer>>) -> Result<Recovery> {
        let algorithm = conf.resolved_cc_algorithm()?;
        let mut rconf = conf.recovery.clone();
        rconf.congestion_control_algorithm = algorithm;
        rconf.enable_l4s = conf.enable_l4s;

        let rtt = Rc::new(RefCell::new(RttEstimator::new(rconf.initial_rtt)));
        let congestion =
            congestion_control::build_congestion_controller(&rconf, rtt.clone(), tracer);

        Ok(Recovery {
            bytes_in_flight: 0,
            rtt,
            congestion,
            space: PacketNumSpace::new(),
            enable_l4s: rconf.enable_l4s,
            algorithm,
            max_datagram_size: rconf.max_datagram_size as u64,
            ecn_validation: EcnValidationState::Unknown,
            ecn_inconsistent_samples: 0,
            trace_id: String::from(""),
        })
    }

    /// Set trace id.
    pub fn set_trace_id(&mut self, trace_id: &str) {
        self.trace_id = trace_id.to_string();
    }

    /// Handle packet sent event.
    ///
    /// See RFC 9002 Section A.5. On Sending a Packet
    pub fn on_packet_sent(&mut self, mut pkt: SentPacket, now: Instant) {
        let in_flight = pkt.in_flight;
        let ack_eliciting = pkt.ack_eliciting;
        let sent_size = pkt.sent_size;

        pkt.time_sent = now;
        self.congestion.on_packet_sent(
            now,
            self.bytes_in_flight as u64,
            pkt.pkt_num,
            sent_size as u64,
            ack_eliciting,
        );
        trace!(
            "now={:?} {} {} ON_SENT {:?} inflight={} cwnd={}",
            now,
            self.trace_id,
            self.congestion.name(),
            pkt,
            self.bytes_in_flight,
            self.congestion.congestion_window()
        );

        self.space.sent.push_back(pkt);
        if in_flight {
            self.space.bytes_in_flight += sent_size;
            self.bytes_in_flight += sent_size;
        }
    }

    /// Handle packet acknowledgment event.
    ///
    /// `ranges` holds the acknowledged packet number ranges in ascending
    /// order; `ecn_counts` carries the ECN section of the ACK frame when the
    /// peer reported one. Returns the newly acknowledged bytes and the
    /// CE-marked bytes attributed to this ACK.
    ///
    /// See RFC 9002 Section A.7. On Receiving an Acknowledgment.
    pub fn on_ack_received(
        &mut self,
        ranges: &[Range<u64>],
        ack_delay: Duration,
        ecn_counts: Option<EcnCounts>,
        now: Instant,
    ) -> Result<(u64, u64)> {
        let largest_ack = ranges
            .iter()
            .map(|r| r.end.saturating_sub(1))
            .max()
            .ok_or(Error::InternalError)?;

        // ACKs that do not advance the largest acknowledged packet number
        // carry no new AccECN information: the cursor is monotone.
        let cursor_advanced =
            self.space.largest_acked_pkt == u64::MAX || largest_ack > self.space.largest_acked_pkt;
        if cursor_advanced {
            self.space.largest_acked_pkt = largest_ack;
        }

        // Detect acked packets
        let mut newly_acked_pkts = Vec::<AckedPacket>::new();
        let (rtt_sample, newly_acked_bytes) =
            self.detect_acked_packets(ranges, &mut newly_acked_pkts, now);
        if newly_acked_pkts.is_empty() {
            return Ok((0, 0));
        }

        // Update RTT estimation
        if let Some(rtt) = rtt_sample {
            if !rtt.is_zero() {
                self.rtt.borrow_mut().update(ack_delay, rtt);
            }
        }

        // Turn the AccECN counter increments into CE-byte feedback.
        let mut ce_bytes = 0;
        if let Some(counts) = ecn_counts {
            if cursor_advanced {
                ce_bytes = self.process_ecn_counts(counts, newly_acked_pkts.len() as u64);
            }
        }
        if self.enable_l4s && ce_bytes > 0 {
            trace!(
                "now={:?} {} {} ON_ECN_FEEDBACK ce_bytes={} cwnd={}",
                now,
                self.trace_id,
                self.congestion.name(),
                ce_bytes,
                self.congestion.congestion_window()
            );
            self.congestion.on_ecn_feedback(ce_bytes);
        }

        self.space.drain_acked_and_lost_packets();
        self.congestion.maybe_exit_slow_start();

        Ok((newly_acked_bytes, ce_bytes))
    }

    /// Detect acknowledged packets.
    ///
    /// It returns the latest RTT sample, if any, and the newly acknowledged
    /// bytes.
    fn detect_acked_packets(
        &mut self,
        ranges: &[Range<u64>],
        newly_acked: &mut Vec<AckedPacket>,
        now: Instant,
    ) -> (Option<Duration>, u64) {
        let mut largest_newly_acked_pkt_num = 0;
        let mut largest_newly_acked_sent_time = now;
        let mut newly_ack_eliciting_pkt_acked = false;
        let mut newly_acked_bytes = 0;

        let mut idx = 0;
        'ranges_loop: for r in ranges.iter() {
            'sent_pkt_loop: while idx < self.space.sent.len() {
                let sent_pkt = self.space.sent.get_mut(idx).unwrap();
                // Find an unacked sent packet which matches the current ACK range.
                // Note: The packet numbers in ranges and space.sent are in ascending order.
                if sent_pkt.pkt_num < r.start
                    || sent_pkt.time_acked.is_some()
                    || sent_pkt.time_lost.is_some()
                {
                    idx += 1;
                    continue 'sent_pkt_loop;
                }
                if sent_pkt.pkt_num >= r.end {
                    continue 'ranges_loop;
                }

                sent_pkt.time_acked = Some(now);
                newly_acked_bytes += sent_pkt.sent_size as u64;

                largest_newly_acked_pkt_num = sent_pkt.pkt_num;
                largest_newly_acked_sent_time = sent_pkt.time_sent;
                if sent_pkt.ack_eliciting {
                    newly_ack_eliciting_pkt_acked = true;
                }

                let prior_in_flight = self.bytes_in_flight;
                if sent_pkt.in_flight {
                    self.space.bytes_in_flight =
                        self.space.bytes_in_flight.saturating_sub(sent_pkt.sent_size);
                    self.bytes_in_flight = self.bytes_in_flight.saturating_sub(sent_pkt.sent_size);
                }

                // Apply each acked packet to the congestion controller.
                self.congestion.on_packet_acked(
                    sent_pkt.pkt_num,
                    sent_pkt.sent_size as u64,
                    prior_in_flight as u64,
                    now,
                );

                trace!(
                    "now={:?} {} {} ON_ACK {:?} inflight={} cwnd={}",
                    now,
                    self.trace_id,
                    self.congestion.name(),
                    sent_pkt,
                    self.bytes_in_flight,
                    self.congestion.congestion_window()
                );

                newly_acked.push(AckedPacket {
                    pkt_num: sent_pkt.pkt_num,
                    time_sent: sent_pkt.time_sent,
                    rtt: now.saturating_duration_since(sent_pkt.time_sent),
                });

                // Process next sent packet.
                idx += 1;
                if idx == self.space.sent.len() {
                    break 'ranges_loop;
                }
            }
        }

        // An endpoint generates an RTT sample on receiving an ACK frame that
        // meets the following two conditions:
        // * the largest acknowledged packet number is newly acknowledged
        // * at least one of the newly acknowledged packets was ack-eliciting
        let rtt_sample = if largest_newly_acked_pkt_num == self.space.largest_acked_pkt
            && newly_ack_eliciting_pkt_acked
        {
            let latest_rtt = now.saturating_duration_since(largest_newly_acked_sent_time);
            Some(latest_rtt)
        } else {
            None
        };
        (rtt_sample, newly_acked_bytes)
    }

    /// Apply the sanity rules to the AccECN increments of an ACK and return
    /// the CE-marked bytes attributed to it.
    ///
    /// Each increment must be non-negative and together they cannot cover
    /// more packets than the ACK newly acknowledged. Violations are clamped
    /// rather than rejected; persistent violations demote ECN for the
    /// connection.
    fn process_ecn_counts(&mut self, counts: EcnCounts, newly_acked_pkts: u64) -> u64 {
        let prev = self.space.ecn_counts_at_largest_acked.unwrap_or_default();
        let mut inconsistent = counts.regressed_since(&prev);
        let mut delta = counts.saturating_delta(&prev);

        if delta.total() > newly_acked_pkts {
            inconsistent = true;
            delta.ecn_ce_count = delta.ecn_ce_count.min(newly_acked_pkts);
        }

        if inconsistent {
            self.ecn_inconsistent_samples += 1;
            if self.ecn_inconsistent_samples >= ECN_INCONSISTENCY_DEMOTION_THRESHOLD
                && self.ecn_validation != EcnValidationState::Failed
            {
                debug!(
                    "{} ECN demoted after {} inconsistent AccECN samples",
                    self.trace_id, self.ecn_inconsistent_samples
                );
                self.ecn_validation = EcnValidationState::Failed;
            }
        } else {
            self.ecn_inconsistent_samples = 0;
        }

        self.space.ecn_counts_at_largest_acked = Some(counts);

        if self.ecn_validation == EcnValidationState::Failed {
            return 0;
        }
        delta.ecn_ce_count.saturating_mul(self.max_datagram_size)
    }

    /// Handle a packet declared lost by the loss detector.
    pub fn on_congestion_event(&mut self, pkt_num: u64, now: Instant) {
        let lost = match self
            .space
            .sent
            .iter_mut()
            .find(|p| p.pkt_num == pkt_num && p.time_acked.is_none() && p.time_lost.is_none())
        {
            Some(pkt) => {
                pkt.time_lost = Some(now);
                (pkt.sent_size, pkt.in_flight)
            }
            None => return,
        };

        let prior_in_flight = self.bytes_in_flight;
        if lost.1 {
            self.space.bytes_in_flight = self.space.bytes_in_flight.saturating_sub(lost.0);
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(lost.0);
        }

        self.congestion
            .on_congestion_event(pkt_num, lost.0 as u64, prior_in_flight as u64);
        trace!(
            "now={:?} {} {} ON_CONGESTION_EVENT pn={} inflight={} cwnd={}",
            now,
            self.trace_id,
            self.congestion.name(),
            pkt_num,
            self.bytes_in_flight,
            self.congestion.congestion_window()
        );
    }

    /// Forward a retransmission timeout to the congestion controller.
    pub fn on_retransmission_timeout(&mut self, packets_retransmitted: bool) {
        self.congestion.on_retransmission_timeout(packets_retransmitted);
    }

    /// Report the verdict of the external ECN validation state machine.
    ///
    /// A path demoted after inconsistent AccECN feedback stays demoted.
    pub fn set_ecn_validation_state(&mut self, state: EcnValidationState) {
        if self.ecn_validation != EcnValidationState::Failed {
            self.ecn_validation = state;
        }
    }

    /// The current verdict of ECN validation for the path.
    pub fn ecn_validation_state(&self) -> EcnValidationState {
        self.ecn_validation
    }

    /// The ECN codepoint to request for an outgoing packet.
    pub fn ecn_mode(&self, is_short_header: bool) -> EcnCodepoint {
        select_ecn_codepoint(
            self.enable_l4s,
            self.algorithm,
            self.ecn_validation,
            is_short_header,
        )
    }

    /// Check if the congestion window permits sending.
    pub fn can_send(&self) -> bool {
        self.congestion.can_send(self.bytes_in_flight as u64)
    }

    /// In-flight bytes of the connection.
    pub fn bytes_in_flight(&self) -> usize {
        self.bytes_in_flight
    }

    /// RTT estimation of the network path.
    pub fn rtt(&self) -> Rc<RefCell<RttEstimator>> {
        self.rtt.clone()
    }
}
