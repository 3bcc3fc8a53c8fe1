//! Wire packet encoding and the classification table from
//! `Phone.cpp::receivePacket` (spec.md section 4.3/6.1).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::config::{header, ENCODED_MAX_BYTES};

/// A decoded wire packet. Control packets (`Ring`/`Busy`/`Hangup`) carry
/// only a header; `Audio` additionally carries a sequence number and an
/// Opus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Ring,
    Busy,
    Hangup,
    Audio { seq: u32, payload: Vec<u8> },
}

/// Largest valid datagram: header + seq + a full-size Opus payload.
pub const MAX_PACKET_BYTES: usize = 4 + 4 + ENCODED_MAX_BYTES;

impl Packet {
    /// Encode a control packet: 4 bytes, the header code in network byte
    /// order (`Phone.h`'s `sendPacket(Packet::Header, ...)` overload).
    pub fn encode_control(header_code: u32) -> Bytes {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(header_code);
        buf.freeze()
    }

    pub fn encode_ring() -> Bytes {
        Self::encode_control(header::RING)
    }

    pub fn encode_busy() -> Bytes {
        Self::encode_control(header::BUSY)
    }

    pub fn encode_hangup() -> Bytes {
        Self::encode_control(header::HANGUP)
    }

    /// Encode an AUDIO packet: header + seq (both network byte order) +
    /// the raw Opus payload. `Phone.cpp::run()`'s `sendsize = header + seq
    /// + enc`.
    pub fn encode_audio(seq: u32, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 + payload.len());
        buf.put_u32(header::AUDIO);
        buf.put_u32(seq);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Decode a datagram received on the wire. Returns `None` for anything
    /// too short to contain a header, or for an unrecognized header code
    /// (`Phone.cpp::run()`'s `received >= sizeof(packet.header)` check,
    /// `receivePacket`'s `default: break`).
    pub fn decode(datagram: &[u8]) -> Option<Packet> {
        let mut buf = datagram;
        if buf.remaining() < 4 {
            return None;
        }
        let header_code = buf.get_u32();
        match header_code {
            header::RING => Some(Packet::Ring),
            header::BUSY => Some(Packet::Busy),
            header::HANGUP => Some(Packet::Hangup),
            header::AUDIO => {
                if buf.remaining() <= 4 {
                    // a zero-length payload is indistinguishable from "too
                    // short to contain a seq" at exactly 8 bytes total; either
                    // way there is no audio to buffer.
                    return None;
                }
                let seq = buf.get_u32();
                Some(Packet::Audio {
                    seq,
                    payload: buf.to_vec(),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_packets_round_trip() {
        assert_eq!(Packet::decode(&Packet::encode_ring()), Some(Packet::Ring));
        assert_eq!(Packet::decode(&Packet::encode_busy()), Some(Packet::Busy));
        assert_eq!(Packet::decode(&Packet::encode_hangup()), Some(Packet::Hangup));
    }

    #[test]
    fn audio_packet_round_trips() {
        let encoded = Packet::encode_audio(42, &[1, 2, 3]);
        assert_eq!(
            Packet::decode(&encoded),
            Some(Packet::Audio {
                seq: 42,
                payload: vec![1, 2, 3]
            })
        );
    }

    #[test]
    fn short_datagram_is_rejected() {
        assert_eq!(Packet::decode(&[0, 0]), None);
        assert_eq!(Packet::decode(&[]), None);
    }

    #[test]
    fn unknown_header_is_ignored() {
        assert_eq!(Packet::decode(&9999u32.to_be_bytes()), None);
    }

    #[test]
    fn audio_header_without_seq_is_rejected() {
        assert_eq!(Packet::decode(&header::AUDIO.to_be_bytes()), None);
    }
}
