//! Audio formats and sample-block constants
//!
//! Fax relay happens at 8 kHz narrowband. The gateway forces legs to
//! signed-linear while it owns them and restores the original formats on
//! exit.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Narrowband sample rate used by the fax paths, in Hz
pub const SAMPLE_RATE: u32 = 8000;

/// Nominal packetization interval in milliseconds
pub const PTIME_MS: u32 = 20;

/// Largest audio block fed to or pulled from the fax engine, in samples
pub const MAX_BLOCK_SAMPLES: usize = 240;

/// Audio format of a channel leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    /// Signed linear 16-bit PCM at 8 kHz
    Slin,
    /// G.711 mu-law
    Ulaw,
    /// G.711 A-law
    Alaw,
}

impl AudioFormat {
    /// Samples carried by one nominal packetization interval
    pub fn samples_per_frame(&self) -> usize {
        (SAMPLE_RATE / 1000 * PTIME_MS) as usize
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Slin => "slin",
            Self::Ulaw => "ulaw",
            Self::Alaw => "alaw",
        };
        write!(f, "{}", s)
    }
}
