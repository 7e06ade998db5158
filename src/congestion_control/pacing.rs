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

use std::time::Duration;
use std::time::Instant;

/// The pacing granularity.
///
/// The bucket capacity covers the bytes that may burst within one granularity
/// at the current rate.
const PACING_GRANULARITY: Duration = Duration::from_millis(1);

/// The lower bound of burst packet number.
///
/// A lower bound is necessary to enable GSO and to avoid extremely small capacity.
const MIN_BURST_PACKET_NUM: u64 = 10;

/// The upper bound of burst packet number.
///
/// Used to restrict capacity. An extremely large capacity is meaningless.
const MAX_BURST_PACKET_NUM: u64 = 128;

/// A simple token-bucket pacer.
///
/// The bucket refills continuously at the rate the owning sender reports
/// through its bandwidth estimate, and grants budget in units of the maximum
/// datagram size.
///
/// Refer to:
/// https://www.rfc-editor.org/rfc/rfc9002.html#section-7.7
#[derive(Debug)]
pub struct Pacer {
    /// Enable pacing or not.
    enabled: bool,

    /// Bucket capacity (bytes). Bytes that could burst during a pacing granularity.
    capacity: u64,

    /// Tokens available at `last_sent_time`, bytes.
    tokens: u64,

    /// The time the last packet was handed to the pacer.
    last_sent_time: Option<Instant>,

    /// Max datagram size in bytes.
    max_datagram_size: u64,
}

impl Pacer {
    /// Generate a pacer.
    pub fn new(enabled: bool, rate: u64, max_datagram_size: u64) -> Self {
        let capacity = calc_capacity(rate, max_datagram_size);

        Self {
            enabled,
            capacity,
            tokens: capacity,
            last_sent_time: None,
            max_datagram_size,
        }
    }

    /// Check whether pacing is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Tokens available at the given instant, assuming refill at `rate`
    /// bytes per second since the last send.
    pub fn budget(&self, now: Instant, rate: u64) -> u64 {
        if !self.enabled {
            return self.capacity.max(self.max_datagram_size);
        }
        let last_sent_time = match self.last_sent_time {
            Some(t) => t,
            None => return self.capacity,
        };

        let elapsed = now.saturating_duration_since(last_sent_time);
        let refill = (rate as u128 * elapsed.as_nanos() / 1_000_000_000) as u64;
        self.tokens.saturating_add(refill).min(self.capacity)
    }

    /// The earliest instant at which a full datagram of budget will be
    /// available, or `None` if it already is.
    pub fn time_until_send(&self, rate: u64) -> Option<Instant> {
        if !self.enabled || rate == 0 || self.tokens >= self.max_datagram_size {
            return None;
        }
        let last_sent_time = self.last_sent_time?;

        let deficit = self.max_datagram_size - self.tokens;
        let wait = deficit.saturating_mul(1_000_000_000) / rate;
        Some(last_sent_time + Duration::from_nanos(wait))
    }

    /// Consume tokens after a packet is actually sent.
    ///
    /// Refreshes the bucket up to `now` first, so budget accumulated while
    /// idle is not lost, and tracks capacity changes caused by window or rate
    /// updates.
    pub fn on_sent(&mut self, now: Instant, sent_bytes: u64, rate: u64) {
        if !self.enabled {
            return;
        }
        self.capacity = calc_capacity(rate, self.max_datagram_size);
        self.tokens = self.budget(now, rate).saturating_sub(sent_bytes);
        self.last_sent_time = Some(now);
    }

    /// Update the maximum datagram size used as the budget unit.
    pub fn set_max_datagram_size(&mut self, max_datagram_size: u64) {
        self.max_datagram_size = max_datagram_size;
    }
}

fn calc_capacity(rate: u64, max_datagram_size: u64) -> u64 {
    // capacity = bound(granularity * rate)
    // note: the bound operation would limit the burst to
    //   [MIN_BURST_PACKET_NUM * mss, MAX_BURST_PACKET_NUM * mss]
    let capacity = (rate as u128 * PACING_GRANULARITY.as_nanos() / 1_000_000_000) as u64;

    capacity.clamp(
        MIN_BURST_PACKET_NUM * max_datagram_size,
        MAX_BURST_PACKET_NUM * max_datagram_size,
    )
}
