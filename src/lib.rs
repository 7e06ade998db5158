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

//! Prague/L4S congestion control for QUIC senders.
//!
//! The crate provides the send-side congestion control stack of a QUIC
//! implementation with support for Low Latency, Low Loss, Scalable throughput
//! (L4S): the Prague congestion controller and its classic RFC 9002 sibling
//! behind one sender contract, a token-bucket pacer, the ECN-mode selection
//! policy for outgoing packets, and the bridge that turns the AccECN counters
//! of incoming ACK frames into per-sample congestion feedback.
//!
//! The surrounding QUIC implementation keeps owning framing, loss detection
//! timers, and ECN validation; it drives [`Recovery`] from its event loop and
//! consults [`Recovery::ecn_mode`] when stamping outgoing packets.
//!
//! ## Example
//!
//! ```
//! use prague_quic::{Config, CongestionControlAlgorithm, Recovery};
//!
//! let mut conf = Config::new()?;
//! conf.enable_l4s(true);
//! conf.set_congestion_control_algorithm(CongestionControlAlgorithm::Prague);
//! let recovery = Recovery::new(&conf, None)?;
//! assert!(recovery.can_send());
//! # Ok::<(), prague_quic::Error>(())
//! ```

use std::time::Duration;

/// A specialized [`Result`] type for quic operations.
///
/// [`Result`]: https://doc.rust-lang.org/std/result/enum.Result.html
pub type Result<T> = std::result::Result<T, Error>;

/// The default maximum size of outgoing UDP payloads in bytes.
/// See RFC 9000 Section 14.2
pub const DEFAULT_SEND_UDP_PAYLOAD_SIZE: usize = 1200;

/// The initial rtt, used before an rtt sample is taken.
/// See RFC 9002 Section 6.2.2
pub const INITIAL_RTT: Duration = Duration::from_millis(333);

/// The minimal congestion window in packets.
/// See RFC 9002 Section 7.2
pub const MIN_CONGESTION_WINDOW_PACKETS: u64 = 2;

/// The initial congestion window in packets.
pub const INITIAL_CONGESTION_WINDOW_PACKETS: u64 = 32;

/// The maximal congestion window in packets. Additive increase stops growing
/// the window beyond it.
pub const MAX_CONGESTION_WINDOW_PACKETS: u64 = 10_000;

/// Configurations about the congestion control stack of an endpoint.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to negotiate L4S for connections: pace against a virtual RTT,
    /// request ECT(1) on validated paths, and react to CE marks with the
    /// scalable Prague response. Default to false.
    enable_l4s: bool,

    /// The congestion control algorithm, if set explicitly. Left unset it
    /// resolves to Classic, or to Prague when L4S is enabled.
    congestion_control_algorithm: Option<CongestionControlAlgorithm>,

    /// Configurations about loss recovery and congestion control.
    pub(crate) recovery: RecoveryConfig,
}

impl Config {
    /// Create default configuration.
    ///
    /// The configuration may be customized by calling related set methods.
    pub fn new() -> Result<Self> {
        Ok(Self {
            enable_l4s: false,
            congestion_control_algorithm: None,
            recovery: RecoveryConfig::default(),
        })
    }

    /// Enable L4S for connections using this configuration.
    /// The default value is false.
    pub fn enable_l4s(&mut self, v: bool) {
        self.enable_l4s = v;
        self.recovery.enable_l4s = v;
    }

    /// Set the congestion control algorithm.
    /// The default value is `Classic`, or `Prague` when L4S is enabled.
    pub fn set_congestion_control_algorithm(&mut self, cca: CongestionControlAlgorithm) {
        self.congestion_control_algorithm = Some(cca);
        self.recovery.congestion_control_algorithm = cca;
    }

    /// Set the maximum outgoing UDP payload size in bytes.
    /// The default value is `1200`.
    pub fn set_send_udp_payload_size(&mut self, v: usize) {
        self.recovery.max_datagram_size = std::cmp::max(v, DEFAULT_SEND_UDP_PAYLOAD_SIZE);
    }

    /// Set the initial congestion window in packets.
    /// The default value is 32.
    pub fn set_initial_congestion_window(&mut self, packets: u64) {
        self.recovery.initial_congestion_window = packets;
    }

    /// Set the minimal congestion window in packets.
    /// The default value is 2.
    pub fn set_min_congestion_window(&mut self, packets: u64) {
        self.recovery.min_congestion_window = packets;
    }

    /// Set the maximal congestion window in packets.
    /// The default value is 10000.
    pub fn set_max_congestion_window(&mut self, packets: u64) {
        self.recovery.max_congestion_window = packets;
    }

    /// Set the initial RTT in milliseconds. The default value is 333.
    pub fn set_initial_rtt(&mut self, millis: u64) {
        self.recovery.initial_rtt = Duration::from_millis(millis);
    }

    /// Enable pacing to smooth the flow of packets sent onto the network.
    /// The default value is true.
    pub fn enable_pacing(&mut self, v: bool) {
        self.recovery.enable_pacing = v;
    }

    /// Check the configuration for invalid combinations.
    ///
    /// Surfaced synchronously at endpoint creation, before any I/O.
    pub fn validate(&self) -> Result<()> {
        self.resolved_cc_algorithm().map(|_| ())
    }

    /// The congestion control algorithm after applying the L4S defaulting
    /// rules.
    ///
    /// L4S requires the scalable response of Prague; pairing it with an
    /// explicitly classic controller is rejected.
    pub fn resolved_cc_algorithm(&self) -> Result<CongestionControlAlgorithm> {
        match (self.enable_l4s, self.congestion_control_algorithm) {
            (true, Some(CongestionControlAlgorithm::Classic)) => Err(Error::InvalidConfig(
                "L4S requires Prague congestion control".into(),
            )),
            (true, None) => Ok(CongestionControlAlgorithm::Prague),
            (_, Some(cca)) => Ok(cca),
            (false, None) => Ok(CongestionControlAlgorithm::Classic),
        }
    }
}

/// Configurations about loss recovery and congestion control.
#[doc(hidden)]
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// The maximum size of outgoing UDP payloads.
    pub max_datagram_size: usize,

    /// The congestion control algorithm used for a path.
    pub congestion_control_algorithm: CongestionControlAlgorithm,

    /// Whether the path negotiated L4S.
    pub enable_l4s: bool,

    /// The minimal congestion window in packets.
    /// The RECOMMENDED value is 2 * max_datagram_size.
    /// See RFC 9002 Section 7.2
    pub min_congestion_window: u64,

    /// The initial congestion window in packets.
    pub initial_congestion_window: u64,

    /// The maximal congestion window in packets.
    pub max_congestion_window: u64,

    /// The initial rtt, used before real rtt is estimated.
    pub initial_rtt: Duration,

    /// Enable pacing to smooth the flow of packets sent onto the network.
    pub enable_pacing: bool,
}

impl Default for RecoveryConfig {
    fn default() -> RecoveryConfig {
        RecoveryConfig {
            max_datagram_size: DEFAULT_SEND_UDP_PAYLOAD_SIZE,
            congestion_control_algorithm: CongestionControlAlgorithm::Classic,
            enable_l4s: false,
            min_congestion_window: MIN_CONGESTION_WINDOW_PACKETS,
            initial_congestion_window: INITIAL_CONGESTION_WINDOW_PACKETS,
            max_congestion_window: MAX_CONGESTION_WINDOW_PACKETS,
            initial_rtt: INITIAL_RTT,
            enable_pacing: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() -> Result<()> {
        let conf = Config::new()?;
        assert!(!conf.enable_l4s);
        assert_eq!(
            conf.resolved_cc_algorithm()?,
            CongestionControlAlgorithm::Classic
        );
        assert!(conf.validate().is_ok());
        Ok(())
    }

    #[test]
    fn config_l4s_validation() -> Result<()> {
        // L4S with Prague is valid.
        let mut conf = Config::new()?;
        conf.enable_l4s(true);
        conf.set_congestion_control_algorithm(CongestionControlAlgorithm::Prague);
        assert!(conf.validate().is_ok());

        // L4S with an explicitly classic controller is rejected.
        let mut conf = Config::new()?;
        conf.enable_l4s(true);
        conf.set_congestion_control_algorithm(CongestionControlAlgorithm::Classic);
        assert_eq!(
            conf.validate(),
            Err(Error::InvalidConfig(
                "L4S requires Prague congestion control".into()
            ))
        );

        // L4S with the algorithm left unset resolves to Prague.
        let mut conf = Config::new()?;
        conf.enable_l4s(true);
        assert_eq!(
            conf.resolved_cc_algorithm()?,
            CongestionControlAlgorithm::Prague
        );

        // Prague without L4S is valid; so is disabling L4S explicitly.
        let mut conf = Config::new()?;
        conf.set_congestion_control_algorithm(CongestionControlAlgorithm::Prague);
        assert_eq!(
            conf.resolved_cc_algorithm()?,
            CongestionControlAlgorithm::Prague
        );
        conf.enable_l4s(false);
        assert!(conf.validate().is_ok());
        Ok(())
    }

    #[test]
    fn config_invalid_surfaces_at_construction() -> Result<()> {
        let mut conf = Config::new()?;
        conf.enable_l4s(true);
        conf.set_congestion_control_algorithm(CongestionControlAlgorithm::Classic);
        assert!(Recovery::new(&conf, None).is_err());
        Ok(())
    }

    #[test]
    fn config_setters() -> Result<()> {
        let mut conf = Config::new()?;

        conf.set_send_udp_payload_size(1500);
        assert_eq!(conf.recovery.max_datagram_size, 1500);
        // Values below the default payload size are raised to it.
        conf.set_send_udp_payload_size(600);
        assert_eq!(conf.recovery.max_datagram_size, 1200);

        conf.set_initial_congestion_window(16);
        assert_eq!(conf.recovery.initial_congestion_window, 16);
        conf.set_min_congestion_window(4);
        assert_eq!(conf.recovery.min_congestion_window, 4);
        conf.set_max_congestion_window(2000);
        assert_eq!(conf.recovery.max_congestion_window, 2000);
        conf.set_initial_rtt(100);
        assert_eq!(conf.recovery.initial_rtt, Duration::from_millis(100));
        conf.enable_pacing(false);
        assert!(!conf.recovery.enable_pacing);
        Ok(())
    }
}

pub use crate::congestion_control::build_congestion_controller;
pub use crate::congestion_control::CongestionControlAlgorithm;
pub use crate::congestion_control::CongestionController;
pub use crate::congestion_control::CongestionStats;
pub use crate::connection::recovery::Recovery;
pub use crate::connection::rtt::RttEstimator;
pub use crate::connection::space::SentPacket;
pub use crate::ecn::select_ecn_codepoint;
pub use crate::ecn::EcnCodepoint;
pub use crate::ecn::EcnSendingPolicy;
pub use crate::ecn::EcnValidationState;
pub use crate::error::Error;
pub use crate::frame::EcnCounts;
pub use crate::trace::CongestionState;
pub use crate::trace::CongestionTracer;
pub use crate::trace::CwndChangedReason;
pub use crate::trace::LogTracer;
pub use crate::trace::SlowStartExitReason;

#[path = "connection/connection.rs"]
pub mod connection;

#[path = "congestion_control/congestion_control.rs"]
pub mod congestion_control;

mod codec;
pub mod ecn;
pub mod error;
pub mod frame;
pub mod trace;
