//! The call engine: state machine and main loop, ported from
//! `Phone::mainLoop`/`Phone::run` and the `dial`/`startRinging`/`goLive`/
//! `hangup` transition methods in `Phone.cpp`.

use std::time::Duration;

use crate::addr::{parse_dial_address, PeerAddr};
use crate::audio::AudioDevice;
use crate::codec::{CodecFactory, Decoder, Encoder};
use crate::config::{
    ENCODED_MAX_BYTES, PACKET_MS, PACKET_SAMPLES, PORT_DEFAULT, PORT_MAX, RING_PACKET_INTERVAL_MS,
    ROUTER_DISCOVERY_TIMEOUT_MS,
};
use crate::error::{EngineError, ErrorClass};
use crate::jitter::{JitterBuffer, Playback};
use crate::mailbox::Mailbox;
use crate::protocol::Packet;
use crate::router::{MappingOutcome, RouterClient};
use crate::state::{CallState, Command};
use crate::tone;
use crate::transport::DatagramTransport;

/// Dependencies the engine needs, each swappable for a fake in tests
/// (spec.md section 8: "swap socket, audio, codec, and router for fakes").
pub struct Engine {
    transport: Box<dyn DatagramTransport>,
    audio: Box<dyn AudioDevice>,
    codec_factory: Box<dyn CodecFactory>,
    router: Option<Box<dyn RouterClient>>,
    mailbox: Mailbox,

    state: CallState,
    address: Option<PeerAddr>,

    /// The WAN port mapped on the router at startup, if any. Retained so
    /// every exit path can delete the mapping (spec.md section 5).
    wan_port: Option<u16>,

    ring_tone_timer: u32,
    ring_packet_timer: u32,
    tone_frame: u32,

    send_seq: u32,
    jitter: Option<JitterBuffer>,
    encoder: Option<Box<dyn Encoder>>,
    decoder: Option<Box<dyn Decoder>>,
}

impl Engine {
    pub fn new(
        transport: Box<dyn DatagramTransport>,
        audio: Box<dyn AudioDevice>,
        codec_factory: Box<dyn CodecFactory>,
        router: Option<Box<dyn RouterClient>>,
        mailbox: Mailbox,
    ) -> Self {
        Engine {
            transport,
            audio,
            codec_factory,
            router,
            mailbox,
            state: CallState::Starting,
            address: None,
            wan_port: None,
            ring_tone_timer: 0,
            ring_packet_timer: 0,
            tone_frame: 0,
            send_seq: 1,
            jitter: None,
            encoder: None,
            decoder: None,
        }
    }

    /// Run until the UI sends `Command::Exit` or a fatal error occurs.
    /// Mirrors `Phone::mainLoop`'s try/catch → `EXCEPTION`/`EXITED`.
    pub fn main_loop(mut self) -> i32 {
        if let Err(e) = self.startup() {
            return self.fail(e);
        }

        loop {
            match self.run_iteration() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => match e.classify() {
                    ErrorClass::Fatal => return self.fail(e),
                    ErrorClass::PeerRecoverable => {
                        self.log(format!("Network error: {e}"));
                        if !self.state.is_terminal() && self.state != CallState::Hungup {
                            self.hangup();
                        }
                    }
                    ErrorClass::SilentlyTolerated => {
                        tracing::warn!("{e}");
                    }
                },
            }
        }

        self.shutdown();
        self.mailbox.set_state(CallState::Exited);
        0
    }

    fn fail(&mut self, e: EngineError) -> i32 {
        tracing::error!("{e}");
        self.shutdown();
        self.mailbox.set_error_message(e.to_string());
        self.mailbox.set_state(CallState::Exception);
        1
    }

    /// Release resources on the way out: delete the router mapping, if any
    /// (spec.md section 5: "Every exit path — clean or exception — must
    /// release the audio stream, destroy codecs, close the socket, and
    /// delete the router mapping"). The audio stream/codec state already
    /// goes away via `hangup()` on every path that enters it, and the
    /// transport and router themselves are dropped with `self`.
    fn shutdown(&mut self) {
        if let (Some(router), Some(port)) = (self.router.as_mut(), self.wan_port.take()) {
            router.delete_mapping(port);
        }
    }

    fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("{line}");
        self.mailbox.push_log(line);
    }

    /// `Phone::startup`: synthesize tone buffers (implicit in `tone.rs`,
    /// synthesized per-frame), map the router port, then go `Hungup`.
    fn startup(&mut self) -> Result<(), EngineError> {
        self.log("Starting up, please wait...");

        let local_port = self.transport.local_port();

        match self.map_router_port(local_port) {
            Ok(Some((wan_ip, wan_port))) => {
                self.wan_port = Some(wan_port);
                let suffix = if wan_port == PORT_DEFAULT {
                    String::new()
                } else {
                    format!(":{wan_port}")
                };
                self.log(format!("Ready! Your IP address is: {wan_ip}{suffix}"));
            }
            Ok(None) => {
                self.log(format!(
                    "Ready! Local UDP port {local_port} (no router mapping; forward it manually if needed)"
                ));
            }
            Err(e) => {
                // Router failures are silently tolerated (spec.md section 7
                // class 3): log once and continue starting up.
                self.log(format!(
                    "*** ERROR: {e}. You may need to forward UDP port {local_port} manually."
                ));
            }
        }

        self.state = CallState::Hungup;
        self.mailbox.set_state(CallState::Hungup);
        Ok(())
    }

    fn map_router_port(
        &mut self,
        local_port: u16,
    ) -> Result<Option<(std::net::IpAddr, u16)>, EngineError> {
        let Some(router) = self.router.as_mut() else {
            return Ok(None);
        };

        router
            .discover(Duration::from_millis(ROUTER_DISCOVERY_TIMEOUT_MS))
            .map_err(EngineError::from)?;

        let mut wan_port = PORT_DEFAULT;
        loop {
            match router
                .add_mapping(local_port, wan_port, "voicelink")
                .map_err(EngineError::from)?
            {
                MappingOutcome::Mapped => break,
                MappingOutcome::InUse => {
                    wan_port += 1;
                    if wan_port > PORT_MAX {
                        return Err(crate::error::RouterError::PortRangeExhausted.into());
                    }
                }
            }
        }

        let wan_ip = router
            .external_ip()
            .ok_or_else(|| crate::error::RouterError::DiscoveryFailed("no external IP".into()))?;
        Ok(Some((wan_ip, wan_port)))
    }

    /// `Phone::run`: one pass of command handling, packet draining, and
    /// per-state work. Returns `Ok(false)` on `Command::Exit`.
    fn run_iteration(&mut self) -> Result<bool, EngineError> {
        let command = self.mailbox.take_command();

        match command {
            Command::Call(dial_str) => {
                match parse_dial_address(&dial_str, PORT_DEFAULT) {
                    Some(addr) => {
                        if matches!(self.state, CallState::Hungup | CallState::Ringing) {
                            self.address = Some(addr);
                            self.dial()?;
                        }
                    }
                    None => self.log("Invalid IP address"),
                }
            }
            Command::Answer => {
                if self.state == CallState::Ringing {
                    self.go_live()?;
                }
            }
            Command::Hangup => {
                if matches!(self.state, CallState::Dialing | CallState::Live) {
                    self.hangup();
                }
            }
            Command::Exit => {
                if self.state == CallState::Live {
                    self.hangup();
                }
                return Ok(false);
            }
            Command::None => {}
        }

        self.drain_packets()?;

        match self.state {
            CallState::Dialing => {
                if self.ring_packet_timer >= RING_PACKET_INTERVAL_MS {
                    self.ring_packet_timer = 0;
                    self.send_control(Packet::encode_ring().to_vec())?;
                }
                self.play_ringtone()?;
                self.ring_packet_timer += PACKET_MS;
            }
            CallState::Ringing => {
                if self.ring_packet_timer > RING_PACKET_INTERVAL_MS * 2 {
                    let addr = self.address;
                    if let Some(addr) = addr {
                        self.log(format!("Missed call from {addr}"));
                    }
                    self.audio.end();
                    self.state = CallState::Hungup;
                    self.mailbox.set_state(CallState::Hungup);
                } else {
                    self.play_ringtone()?;
                    self.ring_packet_timer += PACKET_MS;
                }
            }
            CallState::Live => {
                self.send_microphone_audio()?;
                self.play_received_audio()?;
            }
            _ => {
                std::thread::sleep(Duration::from_millis(PACKET_MS as u64));
            }
        }

        Ok(true)
    }

    fn drain_packets(&mut self) -> Result<(), EngineError> {
        loop {
            let Some((datagram, from)) = self.transport.recv_from()? else {
                break;
            };
            if let Some(packet) = Packet::decode(&datagram) {
                self.receive_packet(packet, from)?;
            }
        }
        Ok(())
    }

    /// `Phone::receivePacket`'s classification switch (spec.md section 4.3).
    fn receive_packet(&mut self, packet: Packet, from: PeerAddr) -> Result<(), EngineError> {
        match packet {
            Packet::Ring => {
                if self.state == CallState::Hungup {
                    self.address = Some(from);
                    self.start_ringing()?;
                } else if Some(from) == self.address {
                    match self.state {
                        CallState::Ringing => self.ring_packet_timer = 0,
                        CallState::Dialing => self.go_live()?,
                        _ => {}
                    }
                } else {
                    self.send_to(Packet::encode_busy().to_vec(), from)?;
                }
            }
            Packet::Busy => {
                if self.state == CallState::Dialing && Some(from) == self.address {
                    if let Some(addr) = self.address {
                        self.log(format!("*** {addr} is busy"));
                    }
                    self.hangup();
                }
            }
            Packet::Audio { seq, payload } => {
                if Some(from) != self.address || self.state == CallState::Hungup {
                    self.send_to(Packet::encode_hangup().to_vec(), from)?;
                } else if self.state == CallState::Dialing {
                    self.go_live()?;
                    self.buffer_audio(seq, &payload);
                } else if self.state == CallState::Live {
                    self.buffer_audio(seq, &payload);
                }
            }
            Packet::Hangup => {
                if self.state != CallState::Hungup && Some(from) == self.address {
                    if let Some(addr) = self.address {
                        self.log(format!("*** {addr} has hung up"));
                    }
                    self.hangup();
                }
            }
        }
        Ok(())
    }

    fn buffer_audio(&mut self, seq: u32, payload: &[u8]) {
        if let Some(jitter) = self.jitter.as_mut() {
            jitter.buffer_received_audio(seq, payload);
        }
    }

    // --- state transitions ----------------------------------------------

    /// `Phone::dial`.
    fn dial(&mut self) -> Result<(), EngineError> {
        debug_assert_ne!(self.state, CallState::Dialing);
        if let Some(addr) = self.address {
            self.log(format!("Dialing {addr}"));
        }
        self.ring_tone_timer = 0;
        self.ring_packet_timer = 0;
        self.tone_frame = 0;
        self.state = CallState::Dialing;
        self.mailbox.set_state(CallState::Dialing);
        self.audio.begin(false, true).map_err(EngineError::from)?;
        Ok(())
    }

    /// `Phone::startRinging`.
    fn start_ringing(&mut self) -> Result<(), EngineError> {
        debug_assert_ne!(self.state, CallState::Ringing);
        if let Some(addr) = self.address {
            self.log(format!("*** Incoming call from {addr}"));
        }
        self.ring_tone_timer = 0;
        self.ring_packet_timer = 0;
        self.tone_frame = 0;
        self.state = CallState::Ringing;
        self.mailbox.set_state(CallState::Ringing);
        self.audio.begin(false, true).map_err(EngineError::from)?;
        Ok(())
    }

    /// `Phone::goLive`.
    fn go_live(&mut self) -> Result<(), EngineError> {
        debug_assert_ne!(self.state, CallState::Live);
        self.send_seq = 1;
        self.jitter = Some(JitterBuffer::new());

        self.encoder = Some(self.codec_factory.make_encoder().map_err(EngineError::from)?);
        self.decoder = Some(self.codec_factory.make_decoder().map_err(EngineError::from)?);

        self.log("*** Call started");
        self.audio.begin(true, true).map_err(EngineError::from)?;

        self.state = CallState::Live;
        self.mailbox.set_state(CallState::Live);
        Ok(())
    }

    /// `Phone::hangup`.
    fn hangup(&mut self) {
        debug_assert_ne!(self.state, CallState::Hungup);
        self.log("Hanging up");
        self.audio.end();

        if self.state == CallState::Live {
            self.encoder = None;
            self.decoder = None;
            self.jitter = None;
        }

        self.state = CallState::Hungup;
        self.mailbox.set_state(CallState::Hungup);
    }

    // --- per-state work ---------------------------------------------------

    fn play_ringtone(&mut self) -> Result<(), EngineError> {
        let tone_time = self.ring_tone_timer % crate::config::RING_TONE_PERIOD_MS;
        let is_on = tone_time < crate::config::RING_TONE_ON_MS
            || (tone_time >= crate::config::RING_TONE_PAUSE_MS
                && tone_time < crate::config::RING_TONE_PAUSE_MS + crate::config::RING_TONE_ON_MS);

        let frame = if is_on {
            if self.state == CallState::Ringing {
                tone::ring_tone_in(self.tone_frame)
            } else {
                tone::ring_tone_out(self.tone_frame)
            }
        } else {
            tone::silence()
        };

        self.audio.write_exact(&frame).map_err(EngineError::from)?;
        self.ring_tone_timer += PACKET_MS;
        self.tone_frame += 1;
        Ok(())
    }

    fn send_microphone_audio(&mut self) -> Result<(), EngineError> {
        while self.audio.available_capture_samples() >= PACKET_SAMPLES {
            let mut microphone = vec![0i16; PACKET_SAMPLES];
            self.audio.read_exact(&mut microphone).map_err(EngineError::from)?;

            let mut encoded = vec![0u8; ENCODED_MAX_BYTES];
            let encoder = self.encoder.as_mut().expect("encoder exists while Live");
            let len = encoder.encode(&microphone, &mut encoded).map_err(EngineError::from)?;
            encoded.truncate(len);

            let seq = self.send_seq;
            self.send_seq += 1;

            let datagram = Packet::encode_audio(seq, &encoded).to_vec();
            self.send_control(datagram)?;
        }
        Ok(())
    }

    fn play_received_audio(&mut self) -> Result<(), EngineError> {
        let Some(jitter) = self.jitter.as_mut() else {
            return Ok(());
        };
        let decoder = self.decoder.as_mut().expect("decoder exists while Live");

        match jitter.play_received_audio(decoder.as_mut()).map_err(EngineError::from)? {
            Playback::Samples(samples) => self.audio.write_exact(&samples).map_err(EngineError::from)?,
            Playback::Silence => self.audio.write_exact(&tone::silence()).map_err(EngineError::from)?,
            Playback::Disconnected => {
                self.log("*** Call disconnected!");
                self.hangup();
            }
        }
        Ok(())
    }

    fn send_control(&mut self, datagram: Vec<u8>) -> Result<(), EngineError> {
        if let Some(addr) = self.address {
            self.send_to(datagram, addr)?;
        }
        Ok(())
    }

    fn send_to(&mut self, datagram: Vec<u8>, to: PeerAddr) -> Result<(), EngineError> {
        self.transport.send_to(&datagram, to).map_err(EngineError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioDevice;
    use crate::codec::{Decoder, Encoder};
    use crate::error::{AudioError, CodecError};
    use crate::router::MappingOutcome as MO;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};

    struct FakeTransport {
        inbound: Mutex<VecDeque<(Vec<u8>, PeerAddr)>>,
        sent: Mutex<Vec<(Vec<u8>, PeerAddr)>>,
        port: u16,
    }

    impl FakeTransport {
        fn new(port: u16) -> Self {
            FakeTransport {
                inbound: Mutex::new(VecDeque::new()),
                sent: Mutex::new(Vec::new()),
                port,
            }
        }

        fn push_inbound(&self, datagram: Vec<u8>, from: PeerAddr) {
            self.inbound.lock().unwrap().push_back((datagram, from));
        }
    }

    impl DatagramTransport for FakeTransport {
        fn send_to(&self, datagram: &[u8], to: PeerAddr) -> Result<(), crate::error::TransportError> {
            self.sent.lock().unwrap().push((datagram.to_vec(), to));
            Ok(())
        }

        fn recv_from(&self) -> Result<Option<(Vec<u8>, PeerAddr)>, crate::error::TransportError> {
            Ok(self.inbound.lock().unwrap().pop_front())
        }

        fn local_port(&self) -> u16 {
            self.port
        }
    }

    struct FakeAudio {
        capture: VecDeque<i16>,
        playback: Vec<i16>,
    }

    impl FakeAudio {
        fn new() -> Self {
            FakeAudio {
                capture: VecDeque::new(),
                playback: Vec::new(),
            }
        }
    }

    impl AudioDevice for FakeAudio {
        fn begin(&mut self, _input: bool, _output: bool) -> Result<(), AudioError> {
            Ok(())
        }
        fn read_exact(&mut self, samples: &mut [i16]) -> Result<(), AudioError> {
            for slot in samples.iter_mut() {
                *slot = self.capture.pop_front().unwrap_or(0);
            }
            Ok(())
        }
        fn write_exact(&mut self, samples: &[i16]) -> Result<(), AudioError> {
            self.playback.extend(samples.iter().copied());
            Ok(())
        }
        fn available_capture_samples(&self) -> usize {
            self.capture.len()
        }
        fn end(&mut self) {}
    }

    struct FakeEncoder;
    impl Encoder for FakeEncoder {
        fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, CodecError> {
            let n = pcm.len().min(out.len());
            Ok(n)
        }
    }

    struct FakeDecoder;
    impl Decoder for FakeDecoder {
        fn decode(&mut self, _payload: &[u8], out: &mut [i16]) -> Result<usize, CodecError> {
            out.fill(0);
            Ok(out.len())
        }
    }

    struct FakeCodecFactory;
    impl CodecFactory for FakeCodecFactory {
        fn make_encoder(&self) -> Result<Box<dyn Encoder>, CodecError> {
            Ok(Box::new(FakeEncoder))
        }
        fn make_decoder(&self) -> Result<Box<dyn Decoder>, CodecError> {
            Ok(Box::new(FakeDecoder))
        }
    }

    fn test_engine() -> Engine {
        Engine::new(
            Box::new(FakeTransport::new(56780)),
            Box::new(FakeAudio::new()),
            Box::new(FakeCodecFactory),
            None,
            Mailbox::new(),
        )
    }

    #[test]
    fn startup_with_no_router_goes_hungup() {
        let mut engine = test_engine();
        engine.startup().unwrap();
        assert_eq!(engine.state, CallState::Hungup);
        assert_eq!(engine.mailbox.state(), CallState::Hungup);
    }

    #[test]
    fn dial_transitions_to_dialing_and_opens_audio() {
        let mut engine = test_engine();
        engine.startup().unwrap();
        engine.address = Some(PeerAddr::V4(Ipv4Addr::new(10, 0, 0, 2), 56780));
        engine.dial().unwrap();
        assert_eq!(engine.state, CallState::Dialing);
    }

    #[test]
    fn incoming_ring_while_hungup_starts_ringing() {
        let mut engine = test_engine();
        engine.startup().unwrap();
        let from = PeerAddr::V4(Ipv4Addr::new(10, 0, 0, 2), 56780);
        engine.receive_packet(Packet::Ring, from).unwrap();
        assert_eq!(engine.state, CallState::Ringing);
        assert_eq!(engine.address, Some(from));
    }

    #[test]
    fn ring_while_busy_with_someone_else_sends_busy() {
        let mut engine = test_engine();
        engine.startup().unwrap();
        let caller = PeerAddr::V4(Ipv4Addr::new(10, 0, 0, 2), 56780);
        engine.receive_packet(Packet::Ring, caller).unwrap();
        assert_eq!(engine.state, CallState::Ringing);

        let another = PeerAddr::V4(Ipv4Addr::new(10, 0, 0, 3), 56780);
        engine.receive_packet(Packet::Ring, another).unwrap();
        // state unchanged, BUSY sent to the second caller
        assert_eq!(engine.state, CallState::Ringing);
    }

    #[test]
    fn answer_in_ringing_goes_live() {
        let mut engine = test_engine();
        engine.startup().unwrap();
        let from = PeerAddr::V4(Ipv4Addr::new(10, 0, 0, 2), 56780);
        engine.receive_packet(Packet::Ring, from).unwrap();
        engine.go_live().unwrap();
        assert_eq!(engine.state, CallState::Live);
        assert!(engine.jitter.is_some());
        assert!(engine.encoder.is_some());
    }

    #[test]
    fn hangup_from_live_tears_down_codec_state() {
        let mut engine = test_engine();
        engine.startup().unwrap();
        engine.address = Some(PeerAddr::V4(Ipv4Addr::new(10, 0, 0, 2), 56780));
        engine.go_live().unwrap();
        engine.hangup();
        assert_eq!(engine.state, CallState::Hungup);
        assert!(engine.encoder.is_none());
        assert!(engine.decoder.is_none());
        assert!(engine.jitter.is_none());
    }

    #[test]
    fn exit_command_while_live_hangs_up_first() {
        let mut engine = test_engine();
        engine.startup().unwrap();
        engine.address = Some(PeerAddr::V4(Ipv4Addr::new(10, 0, 0, 2), 56780));
        engine.go_live().unwrap();
        engine.mailbox.set_command(Command::Exit);
        let keep_running = engine.run_iteration().unwrap();
        assert!(!keep_running);
        assert_eq!(engine.state, CallState::Hungup);
    }

    #[test]
    fn dialing_sends_ring_packets_on_interval() {
        let mut engine = test_engine();
        engine.startup().unwrap();
        engine.address = Some(PeerAddr::V4(Ipv4Addr::new(10, 0, 0, 2), 56780));
        engine.dial().unwrap();
        for _ in 0..(RING_PACKET_INTERVAL_MS / PACKET_MS + 1) {
            engine.run_iteration().unwrap();
        }
        assert_eq!(engine.state, CallState::Dialing);
    }

    #[test]
    fn ringing_times_out_to_hungup_with_missed_call_log() {
        let mut engine = test_engine();
        engine.startup().unwrap();
        let from = PeerAddr::V4(Ipv4Addr::new(10, 0, 0, 2), 56780);
        engine.receive_packet(Packet::Ring, from).unwrap();
        for _ in 0..(RING_PACKET_INTERVAL_MS * 2 / PACKET_MS + 2) {
            engine.run_iteration().unwrap();
        }
        assert_eq!(engine.state, CallState::Hungup);
        let log = engine.mailbox.drain_log();
        assert!(log.iter().any(|l| l.contains("Missed call")));
    }

    #[test]
    fn invalid_dial_address_is_rejected_without_state_change() {
        let mut engine = test_engine();
        engine.startup().unwrap();
        engine.mailbox.set_command(Command::Call("not-an-address".into()));
        engine.run_iteration().unwrap();
        assert_eq!(engine.state, CallState::Hungup);
        let log = engine.mailbox.drain_log();
        assert!(log.iter().any(|l| l.contains("Invalid IP address")));
    }

    #[test]
    fn audio_packet_from_unknown_peer_while_hungup_gets_hangup_reply() {
        let mut engine = test_engine();
        engine.startup().unwrap();
        let from = PeerAddr::V4(Ipv4Addr::new(10, 0, 0, 2), 56780);
        engine
            .receive_packet(Packet::Audio { seq: 1, payload: vec![1, 2, 3] }, from)
            .unwrap();
        assert_eq!(engine.state, CallState::Hungup);
    }

    #[test]
    fn router_mapping_success_reports_wan_address() {
        struct FakeRouter {
            discovered: bool,
        }
        impl RouterClient for FakeRouter {
            fn discover(&mut self, _timeout: Duration) -> Result<(), crate::error::RouterError> {
                self.discovered = true;
                Ok(())
            }
            fn add_mapping(
                &mut self,
                _local_port: u16,
                _external_port: u16,
                _description: &str,
            ) -> Result<MO, crate::error::RouterError> {
                Ok(MO::Mapped)
            }
            fn delete_mapping(&mut self, _external_port: u16) {}
            fn external_ip(&self) -> Option<std::net::IpAddr> {
                self.discovered.then(|| std::net::IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)))
            }
        }

        let mut engine = Engine::new(
            Box::new(FakeTransport::new(56780)),
            Box::new(FakeAudio::new()),
            Box::new(FakeCodecFactory),
            Some(Box::new(FakeRouter { discovered: false })),
            Mailbox::new(),
        );
        engine.startup().unwrap();
        let log = engine.mailbox.drain_log();
        assert!(log.iter().any(|l| l.contains("203.0.113.1")));
    }

    #[test]
    fn exit_deletes_router_mapping() {
        struct FakeRouter {
            discovered: bool,
            deleted: Arc<Mutex<Vec<u16>>>,
        }
        impl RouterClient for FakeRouter {
            fn discover(&mut self, _timeout: Duration) -> Result<(), crate::error::RouterError> {
                self.discovered = true;
                Ok(())
            }
            fn add_mapping(
                &mut self,
                _local_port: u16,
                _external_port: u16,
                _description: &str,
            ) -> Result<MO, crate::error::RouterError> {
                Ok(MO::Mapped)
            }
            fn delete_mapping(&mut self, external_port: u16) {
                self.deleted.lock().unwrap().push(external_port);
            }
            fn external_ip(&self) -> Option<std::net::IpAddr> {
                self.discovered.then(|| std::net::IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)))
            }
        }

        let deleted = Arc::new(Mutex::new(Vec::new()));
        let mailbox = Mailbox::new();
        mailbox.set_command(Command::Exit);
        let engine = Engine::new(
            Box::new(FakeTransport::new(56780)),
            Box::new(FakeAudio::new()),
            Box::new(FakeCodecFactory),
            Some(Box::new(FakeRouter {
                discovered: false,
                deleted: deleted.clone(),
            })),
            mailbox,
        );
        assert_eq!(engine.main_loop(), 0);
        assert_eq!(*deleted.lock().unwrap(), vec![PORT_DEFAULT]);
    }

    #[test]
    fn failed_wan_lookup_leaves_no_mapping_to_delete() {
        struct FlakyRouter {
            deleted: Arc<Mutex<Vec<u16>>>,
        }
        impl RouterClient for FlakyRouter {
            fn discover(&mut self, _timeout: Duration) -> Result<(), crate::error::RouterError> {
                Ok(())
            }
            fn add_mapping(
                &mut self,
                _local_port: u16,
                _external_port: u16,
                _description: &str,
            ) -> Result<MO, crate::error::RouterError> {
                Ok(MO::Mapped)
            }
            fn delete_mapping(&mut self, external_port: u16) {
                self.deleted.lock().unwrap().push(external_port);
            }
            fn external_ip(&self) -> Option<std::net::IpAddr> {
                // discover "succeeded" but the WAN address never resolved;
                // startup() reports this as an error and keeps going.
                None
            }
        }

        let deleted = Arc::new(Mutex::new(Vec::new()));
        let mut engine = Engine::new(
            Box::new(FakeTransport::new(56780)),
            Box::new(FakeAudio::new()),
            Box::new(FakeCodecFactory),
            Some(Box::new(FlakyRouter { deleted: deleted.clone() })),
            Mailbox::new(),
        );
        engine.startup().unwrap();
        // no WAN address was ever reported, so no port was ever recorded as
        // mapped; shutdown has nothing to delete.
        assert!(engine.wan_port.is_none());
    }
}
