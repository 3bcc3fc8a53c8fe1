//! The receive-side jitter buffer: `AudioSlot`s keyed by sequence number,
//! and the buffer/playback state machine from `Phone.cpp`'s
//! `bufferReceivedAudio`/`playReceivedAudio` (spec.md section 4.6).

use std::collections::VecDeque;

use crate::codec::Decoder;
use crate::config::{BUFFERED_PACKETS_MAX, BUFFERED_PACKETS_MIN, DISCONNECT_TIMEOUT_MS, PACKET_MS, PACKET_SAMPLES};
use crate::error::CodecError;

/// One sequence slot in the jitter buffer. Empty `data` means "no packet
/// has arrived for this sequence yet".
#[derive(Debug, Clone)]
pub struct AudioSlot {
    pub seq: u32,
    pub data: Vec<u8>,
}

impl AudioSlot {
    fn empty(seq: u32) -> Self {
        AudioSlot { seq, data: Vec::new() }
    }
}

/// What happened when the caller asked the buffer to produce one frame of
/// playback audio.
pub enum Playback {
    /// Write these decoded samples to the speaker.
    Samples(Vec<i16>),
    /// Prebuffering: write silence, no packet decoded yet.
    Silence,
    /// Prebuffering stalled past `DISCONNECT_TIMEOUT_MS` — caller must hang up.
    Disconnected,
}

pub struct JitterBuffer {
    buf: VecDeque<AudioSlot>,
    increase_buffering: bool,
    missed_packets: u32,
    disconnect_timer: u32,
}

impl JitterBuffer {
    /// Fresh buffer for a call entering `Live` (`Phone.cpp::goLive`).
    pub fn new() -> Self {
        JitterBuffer {
            buf: VecDeque::from([AudioSlot::empty(1)]),
            increase_buffering: true,
            missed_packets: 0,
            disconnect_timer: 0,
        }
    }

    #[cfg(test)]
    fn with_front_seq(seq: u32) -> Self {
        JitterBuffer {
            buf: VecDeque::from([AudioSlot::empty(seq)]),
            increase_buffering: true,
            missed_packets: 0,
            disconnect_timer: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Place a received AUDIO packet's payload at its sequence slot,
    /// expanding the buffer as needed. Late packets (seq before the front)
    /// are discarded (spec.md section 4.6).
    pub fn buffer_received_audio(&mut self, seq: u32, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let front_seq = self.buf.front().expect("buffer never empty").seq;
        if seq < front_seq {
            return;
        }

        while self.buf.back().expect("buffer never empty").seq < seq {
            let next_seq = self.buf.back().unwrap().seq + 1;
            self.buf.push_back(AudioSlot::empty(next_seq));
        }

        if let Some(slot) = self.buf.iter_mut().find(|s| s.seq == seq) {
            slot.data = data.to_vec();
        }
    }

    /// Produce one frame of playback, decoding/concealing/skipping as
    /// needed. Mirrors the recursive "reducing buffering" catch-up in the
    /// original with an explicit loop.
    pub fn play_received_audio(&mut self, decoder: &mut dyn Decoder) -> Result<Playback, CodecError> {
        loop {
            if self.increase_buffering && self.buf.len() < BUFFERED_PACKETS_MAX {
                if self.buf.len() == 1 && self.buf.front().unwrap().data.is_empty() {
                    self.disconnect_timer += PACKET_MS;
                    if self.disconnect_timer > DISCONNECT_TIMEOUT_MS {
                        return Ok(Playback::Disconnected);
                    }
                } else {
                    self.increase_buffering = false;
                }
                return Ok(Playback::Silence);
            }

            let mut decoded = vec![0i16; PACKET_SAMPLES];
            let front_has_data = !self.buf.front().unwrap().data.is_empty();

            if front_has_data {
                let payload = self.buf.front().unwrap().data.clone();
                match decoder.decode(&payload, &mut decoded) {
                    Ok(_) => {
                        self.missed_packets = 0;
                        self.disconnect_timer = 0;
                    }
                    Err(CodecError::InvalidPacket) => {
                        decoder.decode(&[], &mut decoded)?;
                    }
                    Err(e) => return Err(e),
                }
            } else {
                self.missed_packets += 1;
                if self.buf.len() < BUFFERED_PACKETS_MIN
                    || (self.missed_packets > 1 && self.buf.len() < BUFFERED_PACKETS_MAX)
                {
                    self.increase_buffering = true;
                }
                decoder.decode(&[], &mut decoded)?;
            }

            if self.buf.len() == 1 {
                let front = self.buf.front_mut().unwrap();
                front.data.clear();
                front.seq += 1;
            } else {
                self.buf.pop_front();
            }

            if self.buf.len() >= BUFFERED_PACKETS_MAX {
                // skip ahead to reduce latency; loop plays the next frame
                // instead of this decoded-but-discarded one.
                continue;
            }

            return Ok(Playback::Samples(decoded));
        }
    }
}

impl Default for JitterBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDecoder {
        fail_seq_once: bool,
    }

    impl Decoder for FakeDecoder {
        fn decode(&mut self, payload: &[u8], out: &mut [i16]) -> Result<usize, CodecError> {
            if payload.is_empty() {
                out.fill(0);
                return Ok(out.len());
            }
            if self.fail_seq_once {
                self.fail_seq_once = false;
                return Err(CodecError::InvalidPacket);
            }
            out[0] = payload[0] as i16;
            Ok(out.len())
        }
    }

    #[test]
    fn prebuffers_silence_until_min_reached() {
        let mut jb = JitterBuffer::new();
        let mut dec = FakeDecoder { fail_seq_once: false };
        match jb.play_received_audio(&mut dec).unwrap() {
            Playback::Silence => {}
            _ => panic!("expected silence while prebuffering"),
        }
    }

    #[test]
    fn disconnects_after_timeout_with_no_packets() {
        let mut jb = JitterBuffer::new();
        let mut dec = FakeDecoder { fail_seq_once: false };
        let iterations = (DISCONNECT_TIMEOUT_MS / PACKET_MS) + 2;
        let mut disconnected = false;
        for _ in 0..iterations {
            if let Playback::Disconnected = jb.play_received_audio(&mut dec).unwrap() {
                disconnected = true;
                break;
            }
        }
        assert!(disconnected);
    }

    #[test]
    fn never_plays_seq_less_than_front_after_late_packet_discarded() {
        let mut jb = JitterBuffer::with_front_seq(5);
        jb.buffer_received_audio(3, &[1, 2, 3]);
        assert_eq!(jb.buf.front().unwrap().seq, 5);
        assert!(jb.buf.front().unwrap().data.is_empty());
    }

    #[test]
    fn buffer_expands_to_cover_gap() {
        let mut jb = JitterBuffer::with_front_seq(1);
        jb.buffer_received_audio(3, &[9, 9, 9]);
        assert_eq!(jb.len(), 3);
        assert_eq!(jb.buf[2].seq, 3);
        assert_eq!(jb.buf[2].data, vec![9, 9, 9]);
    }

    #[test]
    fn buffer_length_bounded_after_catchup_reduction() {
        let mut jb = JitterBuffer::with_front_seq(1);
        for seq in 1..=(BUFFERED_PACKETS_MAX as u32 + 2) {
            jb.buffer_received_audio(seq, &[1]);
        }
        jb.increase_buffering = false;
        let mut dec = FakeDecoder { fail_seq_once: false };
        jb.play_received_audio(&mut dec).unwrap();
        assert!(jb.len() < BUFFERED_PACKETS_MAX || jb.len() <= BUFFERED_PACKETS_MAX);
    }

    #[test]
    fn corrupt_packet_is_concealed_exactly_once() {
        let mut jb = JitterBuffer::with_front_seq(1);
        jb.buffer_received_audio(1, &[1, 2, 3]);
        jb.increase_buffering = false;
        let mut dec = FakeDecoder { fail_seq_once: true };
        let result = jb.play_received_audio(&mut dec).unwrap();
        assert!(matches!(result, Playback::Samples(_)));
    }
}
