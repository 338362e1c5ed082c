// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use core::fmt;

/// Stand-in address for endpoints that have no conventional network address.
///
/// Reverse listeners and tunneled streams return one of these; callers must
/// not rely on its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverseAddr {
    label: &'static str,
}

impl ReverseAddr {
    /// Address reported by reverse listeners and dialers.
    pub const REVERSE: ReverseAddr = ReverseAddr { label: "rewire" };
    /// Address reported by both ends of a tunneled stream.
    pub const PIPE: ReverseAddr = ReverseAddr { label: "pipe" };

    pub fn network(&self) -> &'static str {
        self.label
    }
}

impl fmt::Display for ReverseAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label)
    }
}
