//! Component error types and the fatal/peer-recoverable/silently-tolerated
//! classification from spec.md section 7.

use thiserror::Error;

/// Which of the three error classes from spec.md section 7 an `EngineError`
/// belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Publish `Exception` and stop the engine.
    Fatal,
    /// Log and return to `Hungup`.
    PeerRecoverable,
    /// Log at most; no state change.
    SilentlyTolerated,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to create socket: {0}")]
    Create(std::io::Error),
    #[error("could not bind UDP port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },
    #[error("no available local port in range")]
    PortRangeExhausted,
    #[error("recv error: {0}")]
    Recv(std::io::Error),
    #[error("send error: {0}")]
    Send(std::io::Error),
    #[error("peer connection reset")]
    ConnReset,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("could not find a router with UPnP: {0}")]
    DiscoveryFailed(String),
    #[error("router rejected mapping: {0}")]
    MappingFailed(String),
    #[error("no available WAN port in range")]
    PortRangeExhausted,
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("failed to open audio device: {0}")]
    OpenFailed(String),
    #[error("audio device error: {0}")]
    DeviceError(String),
    #[error("input overflow (recoverable)")]
    InputOverflow,
    #[error("output underflow (recoverable)")]
    OutputUnderflow,
    #[error("output device stalled accepting audio (recoverable)")]
    OutputStalled,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to create codec: {0}")]
    CreateFailed(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid packet")]
    InvalidPacket,
}

/// Top-level engine error, composing every leaf error type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Classify this error per spec.md section 7. Callers that already know
    /// an error is peer-recoverable (e.g. an explicit HANGUP) don't need
    /// this — it exists for the cases where classification is data-driven
    /// (recv/send errors, router startup failures).
    pub fn classify(&self) -> ErrorClass {
        match self {
            EngineError::Transport(TransportError::ConnReset) => ErrorClass::PeerRecoverable,
            EngineError::Transport(_) => ErrorClass::Fatal,
            EngineError::Router(_) => ErrorClass::SilentlyTolerated,
            EngineError::Audio(AudioError::InputOverflow)
            | EngineError::Audio(AudioError::OutputUnderflow)
            | EngineError::Audio(AudioError::OutputStalled) => ErrorClass::SilentlyTolerated,
            EngineError::Audio(_) => ErrorClass::Fatal,
            EngineError::Codec(CodecError::InvalidPacket) => ErrorClass::SilentlyTolerated,
            EngineError::Codec(_) => ErrorClass::Fatal,
            EngineError::Other(_) => ErrorClass::Fatal,
        }
    }
}
