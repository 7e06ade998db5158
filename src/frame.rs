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

//! The ECN section of the ACK frame.
//!
//! An ACK frame of type 0x03 carries three cumulative counters, one per ECN
//! codepoint observed by the receiver. The counters cover the whole packet
//! number space and are non-decreasing across ACK frames.
//! See RFC 9000 Section 19.3.2

use crate::codec::encode_varint_len;
use crate::codec::Decoder;
use crate::codec::Encoder;
use crate::Result;

/// ECN codepoint counts of ECT(0), ECT(1), or ECN-CE in the packet's IP header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EcnCounts {
    /// The total number of packets received with the ECT(0) codepoint in the
    /// packet number space of the ACK frame.
    pub ect0_count: u64,

    /// The total number of packets received with the ECT(1) codepoint in the
    /// packet number space of the ACK frame.
    pub ect1_count: u64,

    /// The total number of packets received with the ECN-CE codepoint in the
    /// packet number space of the ACK frame.
    pub ecn_ce_count: u64,
}

impl EcnCounts {
    /// Decode the ECN section following the ACK ranges of an ACK frame.
    pub fn from_bytes(mut b: &[u8]) -> Result<(EcnCounts, usize)> {
        let len = b.len();
        let counts = EcnCounts {
            ect0_count: b.read_varint()?,
            ect1_count: b.read_varint()?,
            ecn_ce_count: b.read_varint()?,
        };
        Ok((counts, len - b.len()))
    }

    /// Encode the ECN section into the given buffer.
    pub fn to_bytes(&self, mut b: &mut [u8]) -> Result<usize> {
        let mut len = 0;
        len += b.write_varint(self.ect0_count)?;
        len += b.write_varint(self.ect1_count)?;
        len += b.write_varint(self.ecn_ce_count)?;
        Ok(len)
    }

    /// Length of the encoded ECN section.
    pub fn wire_len(&self) -> usize {
        encode_varint_len(self.ect0_count)
            + encode_varint_len(self.ect1_count)
            + encode_varint_len(self.ecn_ce_count)
    }

    /// Whether any counter moved backwards relative to a previous observation.
    ///
    /// The counters are cumulative and must be non-decreasing; a regression
    /// indicates a misbehaving peer or a bleaching middlebox.
    pub fn regressed_since(&self, prev: &EcnCounts) -> bool {
        self.ect0_count < prev.ect0_count
            || self.ect1_count < prev.ect1_count
            || self.ecn_ce_count < prev.ecn_ce_count
    }

    /// Per-codepoint increments relative to a previous observation.
    ///
    /// Counters that regressed contribute a zero delta.
    pub fn saturating_delta(&self, prev: &EcnCounts) -> EcnCounts {
        EcnCounts {
            ect0_count: self.ect0_count.saturating_sub(prev.ect0_count),
            ect1_count: self.ect1_count.saturating_sub(prev.ect1_count),
            ecn_ce_count: self.ecn_ce_count.saturating_sub(prev.ecn_ce_count),
        }
    }

    /// Sum of the three counters.
    pub fn total(&self) -> u64 {
        self.ect0_count
            .saturating_add(self.ect1_count)
            .saturating_add(self.ecn_ce_count)
    }
}
