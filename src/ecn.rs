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

//! ECN codepoints and the per-packet ECN-mode selection policy.

use crate::congestion_control::CongestionControlAlgorithm;

/// The two ECN bits in the TOS byte of the IP header.
///
/// ECT(1) is the L4S identifier; CE is set only by network elements.
/// See RFC 3168 and RFC 9331.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EcnCodepoint {
    /// The not-ECT codepoint `00`.
    NotEct = 0b00,

    /// The ECT(1) codepoint `01`, used by L4S senders.
    Ect1 = 0b01,

    /// The ECT(0) codepoint `10`, used by classic ECN senders.
    Ect0 = 0b10,

    /// The congestion-experienced codepoint `11`.
    Ce = 0b11,
}

impl EcnCodepoint {
    /// Extract the codepoint from the low two bits of a TOS byte.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b01 => EcnCodepoint::Ect1,
            0b10 => EcnCodepoint::Ect0,
            0b11 => EcnCodepoint::Ce,
            _ => EcnCodepoint::NotEct,
        }
    }

    /// The wire value of the codepoint.
    pub fn to_bits(self) -> u8 {
        self as u8
    }
}

/// Verdict of ECN validation for a network path.
///
/// The validation state machine itself lives with the loss detector; the
/// congestion control machinery only consumes its verdict. `Unknown` covers
/// both "ECN disabled" and "not yet validated".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EcnValidationState {
    /// ECN is disabled or the path has not been validated yet.
    #[default]
    Unknown,

    /// The path passed ECN validation.
    Capable,

    /// The path failed ECN validation, or AccECN feedback was persistently
    /// inconsistent.
    Failed,
}

/// The ECN codepoint requested for outgoing short-header packets, derived
/// from the endpoint configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EcnSendingPolicy {
    /// Do not request ECN marking.
    NotEct,

    /// Classic ECN: request ECT(0).
    Ect0Classic,

    /// L4S: request ECT(1) so L4S-capable AQMs apply shallow-threshold
    /// CE marking.
    Ect1L4S,
}

impl EcnSendingPolicy {
    /// Derive the sending policy from the configured algorithm.
    ///
    /// Assumes the configuration already passed validation, i.e. L4S is never
    /// paired with the classic controller.
    pub fn new(enable_l4s: bool, algorithm: CongestionControlAlgorithm) -> Self {
        if enable_l4s && algorithm == CongestionControlAlgorithm::Prague {
            EcnSendingPolicy::Ect1L4S
        } else {
            EcnSendingPolicy::Ect0Classic
        }
    }
}

/// Select the ECN codepoint for an outgoing packet.
///
/// A pure function of the configuration, the validation verdict, and the
/// packet's header form. Long-header packets are never marked; packets on an
/// unvalidated or failed path are never marked.
pub fn select_ecn_codepoint(
    enable_l4s: bool,
    algorithm: CongestionControlAlgorithm,
    validation: EcnValidationState,
    is_short_header: bool,
) -> EcnCodepoint {
    if !is_short_header || validation != EcnValidationState::Capable {
        return EcnCodepoint::NotEct;
    }
    match EcnSendingPolicy::new(enable_l4s, algorithm) {
        EcnSendingPolicy::Ect1L4S => EcnCodepoint::Ect1,
        EcnSendingPolicy::Ect0Classic => EcnCodepoint::Ect0,
        EcnSendingPolicy::NotEct => EcnCodepoint::NotEct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecn_codepoint_bits() {
        let cases = [
            (EcnCodepoint::NotEct, 0b00),
            (EcnCodepoint::Ect1, 0b01),
            (EcnCodepoint::Ect0, 0b10),
            (EcnCodepoint::Ce, 0b11),
        ];
        for (codepoint, bits) in cases {
            assert_eq!(codepoint.to_bits(), bits);
            assert_eq!(EcnCodepoint::from_bits(bits), codepoint);
        }

        // Upper TOS bits are ignored.
        assert_eq!(EcnCodepoint::from_bits(0b1111_1101), EcnCodepoint::Ect1);
    }

    #[test]
    fn ecn_mode_selection() {
        use CongestionControlAlgorithm::*;
        use EcnValidationState::*;

        let cases = [
            // Classic ECN path.
            (false, Classic, Capable, true, EcnCodepoint::Ect0),
            // Prague without L4S still uses classic marking.
            (false, Prague, Capable, true, EcnCodepoint::Ect0),
            // L4S requests the ECT(1) identifier.
            (true, Prague, Capable, true, EcnCodepoint::Ect1),
            // Long-header packets are never marked.
            (true, Prague, Capable, false, EcnCodepoint::NotEct),
            (false, Classic, Capable, false, EcnCodepoint::NotEct),
            // Unvalidated or failed paths are never marked.
            (true, Prague, Unknown, true, EcnCodepoint::NotEct),
            (true, Prague, Failed, true, EcnCodepoint::NotEct),
            (false, Classic, Failed, true, EcnCodepoint::NotEct),
        ];

        for (l4s, algor, validation, short, want) in cases {
            assert_eq!(
                select_ecn_codepoint(l4s, algor, validation, short),
                want,
                "l4s={} algor={:?} validation={:?} short={}",
                l4s,
                algor,
                validation,
                short
            );
        }
    }

    #[test]
    fn ecn_sending_policy() {
        use CongestionControlAlgorithm::*;
        assert_eq!(
            EcnSendingPolicy::new(true, Prague),
            EcnSendingPolicy::Ect1L4S
        );
        assert_eq!(
            EcnSendingPolicy::new(false, Prague),
            EcnSendingPolicy::Ect0Classic
        );
        assert_eq!(
            EcnSendingPolicy::new(false, Classic),
            EcnSendingPolicy::Ect0Classic
        );
    }
}
