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

use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

use crate::ecn::EcnCodepoint;
use crate::frame::EcnCounts;

/// Metadata of sent packet
#[derive(Clone)]
pub struct SentPacket {
    /// The packet number of the sent packet.
    pub pkt_num: u64,

    /// The time the packet was sent.
    pub time_sent: Instant,

    /// The time the packet was acknowledged, if any.
    pub time_acked: Option<Instant>,

    /// The time the packet was declared lost, if any.
    pub time_lost: Option<Instant>,

    /// A Boolean that indicates whether a packet is ack-eliciting. If true, it
    /// is expected that an acknowledgment will be received, though the peer
    /// could delay sending the ACK frame containing it by up to the max_ack_delay.
    pub ack_eliciting: bool,

    /// A Boolean that indicates whether the packet counts toward bytes in
    /// flight.
    pub in_flight: bool,

    /// The ECN codepoint requested for the packet.
    pub ecn: EcnCodepoint,

    /// The number of bytes sent in the packet, not including UDP or IP overhead,
    /// but including QUIC framing overhead.
    pub sent_size: usize,
}

impl Default for SentPacket {
    fn default() -> Self {
        Self {
            pkt_num: 0,
            time_sent: Instant::now(),
            time_acked: None,
            time_lost: None,
            ack_eliciting: false,
            in_flight: false,
            ecn: EcnCodepoint::NotEct,
            sent_size: 0,
        }
    }
}

impl std::fmt::Debug for SentPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "pn={:?}", self.pkt_num)?;
        write!(f, " sent_size={}", self.sent_size)?;

        Ok(())
    }
}

/// Metadata of acknowledged packet
pub struct AckedPacket {
    /// The packet number of the sent packet.
    pub pkt_num: u64,

    /// The time the packet was sent.
    pub time_sent: Instant,

    /// The Duration between the time the packet is sent and acknowledged
    pub rtt: Duration,
}

/// Send-side state of the application packet number space.
///
/// Tracks unacknowledged sent packets and the cursor into the cumulative
/// AccECN counters reported by the peer.
pub struct PacketNumSpace {
    /// The largest packet number acked by the peer, or `u64::MAX` before the
    /// first ACK arrives.
    pub largest_acked_pkt: u64,

    /// Sent packets that are pending acknowledgement, in ascending packet
    /// number order.
    pub sent: VecDeque<SentPacket>,

    /// In-flight bytes accounted to the space.
    pub bytes_in_flight: usize,

    /// The AccECN counters observed in the ACK that last advanced
    /// `largest_acked_pkt`. Deltas against this cursor turn cumulative counts
    /// into per-sample increments; ACKs that do not advance the cursor
    /// contribute no ECN delta.
    pub ecn_counts_at_largest_acked: Option<EcnCounts>,
}

impl PacketNumSpace {
    pub fn new() -> Self {
        Self {
            largest_acked_pkt: u64::MAX,
            sent: VecDeque::new(),
            bytes_in_flight: 0,
            ecn_counts_at_largest_acked: None,
        }
    }

    /// Remove packets that have been acknowledged or declared lost from the
    /// head of the sent queue.
    pub fn drain_acked_and_lost_packets(&mut self) {
        while let Some(pkt) = self.sent.front() {
            if pkt.time_acked.is_none() && pkt.time_lost.is_none() {
                break;
            }
            self.sent.pop_front();
        }
    }
}

impl Default for PacketNumSpace {
    fn default() -> Self {
        Self::new()
    }
}
