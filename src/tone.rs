//! Ringtone buffer synthesis (spec.md section 4.4, `Phone.cpp::startup`'s
//! tone generation). Buffers are synthesized once at startup, before the
//! socket is bound, and played back frame-by-frame while dialing/ringing.

use crate::config::{CHANNELS, PACKET_SAMPLES, SAMPLE_RATE};

/// One 20 ms frame of silence, played during the pauses of the ringtone
/// pattern and whenever there is nothing else to send to the speaker.
pub fn silence() -> Vec<i16> {
    vec![0i16; PACKET_SAMPLES * CHANNELS as usize]
}

/// Synthesize one 20 ms sine-wave frame at `freq_hz`, offset `frame_index`
/// frames into the tone (so consecutive frames are phase-continuous).
///
/// `sample = round(sin(2*pi*s/SAMPLE_RATE*freq) * 0.5 * i16::MAX)` matching
/// `Phone.cpp`'s tone-synthesis formula.
fn sine_frame(freq_hz: f32, frame_index: u32) -> Vec<i16> {
    let mut frame = Vec::with_capacity(PACKET_SAMPLES);
    let start_sample = frame_index as u64 * PACKET_SAMPLES as u64;
    for i in 0..PACKET_SAMPLES {
        let s = (start_sample + i as u64) as f32;
        let phase = 2.0 * std::f32::consts::PI * s / SAMPLE_RATE as f32 * freq_hz;
        let amplitude = phase.sin() * 0.5 * i16::MAX as f32;
        frame.push(amplitude.round() as i16);
    }
    frame
}

/// Outgoing ringtone heard by the caller while `Dialing` (spec.md section
/// 4.4's `RING_TONE_OUT_HZ`).
pub fn ring_tone_out(frame_index: u32) -> Vec<i16> {
    sine_frame(crate::config::RING_TONE_OUT_HZ, frame_index)
}

/// Incoming ringtone heard by the callee while `Ringing`.
pub fn ring_tone_in(frame_index: u32) -> Vec<i16> {
    sine_frame(crate::config::RING_TONE_IN_HZ, frame_index)
}

/// Whether the ringtone pattern is "on" (tone) or "off" (silence) at
/// `elapsed_ms` into the repeating `RING_TONE_PERIOD_MS` cycle — two short
/// pulses per period (spec.md section 4.4).
pub fn ringtone_is_on(elapsed_ms: u32) -> bool {
    use crate::config::{RING_TONE_ON_MS, RING_TONE_PAUSE_MS, RING_TONE_PERIOD_MS};
    let phase = elapsed_ms % RING_TONE_PERIOD_MS;
    phase < RING_TONE_ON_MS || (phase >= RING_TONE_PAUSE_MS && phase < RING_TONE_PAUSE_MS + RING_TONE_ON_MS)
}
