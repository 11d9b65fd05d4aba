//! ICE candidate representation handed to the media engine.
//!
//! The signaling payload carries only the raw candidate string. Candidates received
//! from the peer are bound to the single audio media section (`mid = "0"`,
//! m-line index 0), which holds for audio-only sessions with one `m=` line.

/// Media stream identification of the only media section of an audio call.
pub const DEFAULT_SDP_MID: &str = "0";
/// Index of the only `m=` line of an audio call.
pub const DEFAULT_SDP_M_LINE_INDEX: u16 = 0;

/// An ICE candidate received from or to be sent to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    /// The candidate string (e.g., "candidate:1 1 UDP 2130706431 192.168.1.1 8888 typ host")
    pub candidate: String,
    /// SDP media stream identification (e.g., "0" for audio)
    pub sdp_mid: String,
    /// SDP media line index
    pub sdp_m_line_index: u16,
}

impl IceCandidate {
    /// Wraps a candidate string received over signaling with the single-section defaults.
    pub fn from_remote(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: DEFAULT_SDP_MID.to_string(),
            sdp_m_line_index: DEFAULT_SDP_M_LINE_INDEX,
        }
    }
}
