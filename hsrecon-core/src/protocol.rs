//! Protocols the scanner registry knows how to probe

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Web,
    Vnc,
    Ftp,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Web, Protocol::Vnc, Protocol::Ftp];

    /// Name used to key result blobs
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Web => "http",
            Protocol::Vnc => "vnc",
            Protocol::Ftp => "ftp",
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Protocol::Web => 80,
            Protocol::Vnc => 5900,
            Protocol::Ftp => 21,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.port())
    }
}
