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

//! Error type for congestion control operations.

use strum_macros::EnumIter;

/// An error that can occur while operating the congestion control machinery.
#[derive(Clone, Debug, Default, PartialEq, Eq, EnumIter)]
pub enum Error {
    /// The endpoint encountered an internal error and cannot continue.
    #[default]
    InternalError,

    /// The provided buffer is too short.
    BufferTooShort,

    /// An endpoint received a frame that was badly formatted -- for instance,
    /// an ACK frame whose ECN section cannot be decoded.
    FrameEncodingError,

    /// The configuration is invalid.
    InvalidConfig(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn error_display() {
        for err in Error::iter() {
            assert_eq!(format!("{}", err), format!("{:?}", err));
        }
    }

    #[test]
    fn error_source() {
        use std::error::Error;
        let e = super::Error::InvalidConfig("bad".into());
        assert!(e.source().is_none());
        assert_eq!(format!("{}", e), "InvalidConfig(\"bad\")");
    }
}
