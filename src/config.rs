//! Tunable constants for the call engine, mirroring `Phone.h`'s `enum Constants`
//! in the original tincanphone source.

/// First local UDP port the engine tries to bind.
pub const PORT_DEFAULT: u16 = 56780;
/// Last port the engine will try before giving up (bind or router mapping).
pub const PORT_MAX: u16 = 56789;

/// Mono audio only.
pub const CHANNELS: u16 = 1;
/// 48 kHz, 16-bit signed PCM.
pub const SAMPLE_RATE: u32 = 48_000;
/// Duration of one audio frame.
pub const PACKET_MS: u32 = 20;
/// Samples per 20 ms frame at 48 kHz.
pub const PACKET_SAMPLES: usize = 960;
/// Largest Opus payload a single AUDIO packet may carry.
pub const ENCODED_MAX_BYTES: usize = 240;

/// Minimum jitter-buffered packets before playback resumes from an underrun.
pub const BUFFERED_PACKETS_MIN: usize = 2;
/// Jitter buffer ceiling; at or above this we decode-and-drop to catch up.
pub const BUFFERED_PACKETS_MAX: usize = 5;

/// How long to wait for AUDIO before declaring the call disconnected, in ms.
pub const DISCONNECT_TIMEOUT_MS: u32 = 5000;
/// How often to repeat an outbound RING while dialing, in ms.
pub const RING_PACKET_INTERVAL_MS: u32 = 500;
/// Timeout for router/IGD discovery, in ms.
pub const ROUTER_DISCOVERY_TIMEOUT_MS: u64 = 8000;

/// Ringtone pattern period, in ms (spec.md section 4.4).
pub const RING_TONE_PERIOD_MS: u32 = 3800;
/// First on-period of the ringtone pattern within `RING_TONE_PERIOD_MS`.
pub const RING_TONE_ON_MS: u32 = 400;
/// Start of the second on-period of the ringtone pattern.
pub const RING_TONE_PAUSE_MS: u32 = 800;

/// Outgoing-ringtone frequency (heard while Dialing), Hz.
pub const RING_TONE_OUT_HZ: f32 = 400.0;
/// Incoming-ringtone frequency (heard while Ringing), Hz.
pub const RING_TONE_IN_HZ: f32 = 250.0;

/// Wire header codes (spec.md section 6.1).
pub mod header {
    pub const RING: u32 = 4000;
    pub const BUSY: u32 = 4001;
    pub const AUDIO: u32 = 4002;
    pub const HANGUP: u32 = 4003;
}
