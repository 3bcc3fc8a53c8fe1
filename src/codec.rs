//! Opus codec wrapping behind `Encoder`/`Decoder`/`CodecFactory` traits, so
//! `Engine` can be driven with a fake codec in tests (spec.md section 8).
//! Grounded on the teacher's `opus::Encoder`/`opus::Decoder` usage and
//! `Phone.cpp`'s `opus_encode`/`opus_decode` calls.

use crate::config::{CHANNELS, ENCODED_MAX_BYTES, PACKET_SAMPLES, SAMPLE_RATE};
use crate::error::CodecError;

pub trait Encoder: Send {
    /// Encode one 20 ms PCM frame (`PACKET_SAMPLES` samples) into at most
    /// `ENCODED_MAX_BYTES` bytes, returning the encoded length.
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, CodecError>;
}

pub trait Decoder: Send {
    /// Decode one frame. `payload` empty means "conceal a lost packet"
    /// (spec.md section 4.6's packet-loss concealment), matching the
    /// `opus` crate's empty-slice PLC convention.
    fn decode(&mut self, payload: &[u8], out: &mut [i16]) -> Result<usize, CodecError>;
}

pub trait CodecFactory: Send {
    fn make_encoder(&self) -> Result<Box<dyn Encoder>, CodecError>;
    fn make_decoder(&self) -> Result<Box<dyn Decoder>, CodecError>;
}

pub struct OpusCodecFactory;

impl CodecFactory for OpusCodecFactory {
    fn make_encoder(&self) -> Result<Box<dyn Encoder>, CodecError> {
        let channels = if CHANNELS == 1 {
            opus::Channels::Mono
        } else {
            opus::Channels::Stereo
        };
        let encoder = opus::Encoder::new(SAMPLE_RATE, channels, opus::Application::Voip)
            .map_err(|e| CodecError::CreateFailed(e.to_string()))?;
        Ok(Box::new(OpusEncoderWrap(encoder)))
    }

    fn make_decoder(&self) -> Result<Box<dyn Decoder>, CodecError> {
        let channels = if CHANNELS == 1 {
            opus::Channels::Mono
        } else {
            opus::Channels::Stereo
        };
        let decoder = opus::Decoder::new(SAMPLE_RATE, channels)
            .map_err(|e| CodecError::CreateFailed(e.to_string()))?;
        Ok(Box::new(OpusDecoderWrap(decoder)))
    }
}

struct OpusEncoderWrap(opus::Encoder);

impl Encoder for OpusEncoderWrap {
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, CodecError> {
        debug_assert_eq!(pcm.len(), PACKET_SAMPLES);
        debug_assert!(out.len() >= ENCODED_MAX_BYTES);
        self.0
            .encode(pcm, out)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }
}

struct OpusDecoderWrap(opus::Decoder);

impl Decoder for OpusDecoderWrap {
    fn decode(&mut self, payload: &[u8], out: &mut [i16]) -> Result<usize, CodecError> {
        debug_assert!(out.len() >= PACKET_SAMPLES);
        self.0.decode(payload, out, false).map_err(|e| {
            if e.code() == opus::ErrorCode::InvalidPacket {
                CodecError::InvalidPacket
            } else {
                CodecError::Decode(e.to_string())
            }
        })
    }
}
