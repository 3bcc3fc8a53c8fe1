//! Duplex audio I/O behind a blocking `AudioDevice` trait, so the engine's
//! single-threaded loop can treat the audio device as its clock exactly as
//! `Phone.cpp` does with PortAudio's blocking `Pa_WriteStream`/
//! `Pa_ReadStream` (spec.md section 9 "Audio device as clock").
//!
//! `cpal` only offers callback-driven streams (the teacher's
//! `build_input_stream`/`build_output_stream` over a `ringbuf::HeapRb`
//! producer/consumer split), so `RealAudioDevice` reuses that same split and
//! adds a `Condvar` doorbell alongside it to bridge callback delivery into
//! blocking calls, the pattern `ac97_bus_master.rs` uses to turn
//! buffer-ready callbacks into a thread that can block and wait.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};

use crate::config::{CHANNELS, PACKET_SAMPLES, SAMPLE_RATE};
use crate::error::AudioError;

pub trait AudioDevice: Send {
    /// Open input and/or output for the current call (`Phone::beginAudioStream`).
    fn begin(&mut self, input: bool, output: bool) -> Result<(), AudioError>;

    /// Block until `samples.len()` captured samples are available and copy
    /// them out. Used while `Live` to pull one 20 ms mic frame.
    fn read_exact(&mut self, samples: &mut [i16]) -> Result<(), AudioError>;

    /// Block until `samples` has been pushed to the output device.
    fn write_exact(&mut self, samples: &[i16]) -> Result<(), AudioError>;

    /// Non-blocking: how many captured samples are ready right now, without
    /// consuming them. Not currently required by the engine loop but kept
    /// on the trait since spec.md section 6.3 names it as part of the
    /// audio interface contract.
    fn available_capture_samples(&self) -> usize;

    /// Close the stream (`Phone::endAudioStream`).
    fn end(&mut self);
}

/// Capture ring capacity: a couple of seconds at 48 kHz, generous enough
/// that a slow consumer doesn't starve (teacher's `HeapRb<f32>` sized
/// similarly for its output jitter buffer).
const CAPTURE_RING_CAPACITY: usize = PACKET_SAMPLES * 100;

/// Playback ring capacity: just a couple of frames. This is what makes
/// `write_exact` act as the engine's clock (spec.md section 9): with a
/// shallow buffer, pushing one frame blocks almost immediately behind the
/// previous frame draining at the output device's real-time rate, the same
/// way `Pa_WriteStream`'s small internal buffer paces `Phone.cpp::run()`.
const PLAYBACK_RING_CAPACITY: usize = PACKET_SAMPLES * 2;

/// A `Mutex<()>`/`Condvar` doorbell: notified whenever the capture callback
/// pushes samples, so `read_exact` can block without polling. The ring
/// buffer endpoints themselves stay lock-free (teacher's
/// `ringbuf::Producer`/`Consumer` split, one side per thread).
struct Doorbell {
    lock: Mutex<()>,
    ready: Condvar,
}

impl Doorbell {
    fn new() -> Self {
        Doorbell {
            lock: Mutex::new(()),
            ready: Condvar::new(),
        }
    }

    fn ring(&self) {
        let _guard = self.lock.lock().unwrap();
        self.ready.notify_one();
    }
}

pub struct RealAudioDevice {
    host: cpal::Host,
    capture_consumer: Option<HeapConsumer<i16>>,
    capture_doorbell: Arc<Doorbell>,
    playback_producer: Option<HeapProducer<i16>>,
    playback_doorbell: Arc<Doorbell>,
    input_stream: Option<Stream>,
    output_stream: Option<Stream>,
}

impl RealAudioDevice {
    pub fn new() -> Self {
        RealAudioDevice {
            host: cpal::default_host(),
            capture_consumer: None,
            capture_doorbell: Arc::new(Doorbell::new()),
            playback_producer: None,
            playback_doorbell: Arc::new(Doorbell::new()),
            input_stream: None,
            output_stream: None,
        }
    }

    fn stream_config() -> StreamConfig {
        StreamConfig {
            channels: CHANNELS,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        }
    }
}

impl Default for RealAudioDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for RealAudioDevice {
    fn begin(&mut self, input: bool, output: bool) -> Result<(), AudioError> {
        if self.input_stream.is_some() || self.output_stream.is_some() {
            self.end();
        }

        let config = Self::stream_config();

        if input {
            let device = self
                .host
                .default_input_device()
                .ok_or_else(|| AudioError::OpenFailed("no input device".into()))?;
            let (mut producer, consumer) = HeapRb::<i16>::new(CAPTURE_RING_CAPACITY).split();
            let doorbell = self.capture_doorbell.clone();
            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _| {
                        producer.push_slice(data);
                        doorbell.ring();
                    },
                    |err| tracing::error!("input stream error: {err}"),
                    None,
                )
                .map_err(|e| AudioError::OpenFailed(e.to_string()))?;
            stream.play().map_err(|e| AudioError::DeviceError(e.to_string()))?;
            self.capture_consumer = Some(consumer);
            self.input_stream = Some(stream);
        }

        if output {
            let device = self
                .host
                .default_output_device()
                .ok_or_else(|| AudioError::OpenFailed("no output device".into()))?;
            let (producer, mut consumer) = HeapRb::<i16>::new(PLAYBACK_RING_CAPACITY).split();
            let doorbell = self.playback_doorbell.clone();
            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _| {
                        let filled = consumer.pop_slice(data);
                        for slot in data[filled..].iter_mut() {
                            *slot = 0;
                        }
                        doorbell.ring();
                    },
                    |err| tracing::error!("output stream error: {err}"),
                    None,
                )
                .map_err(|e| AudioError::OpenFailed(e.to_string()))?;
            stream.play().map_err(|e| AudioError::DeviceError(e.to_string()))?;
            self.playback_producer = Some(producer);
            self.output_stream = Some(stream);
        }

        Ok(())
    }

    fn read_exact(&mut self, samples: &mut [i16]) -> Result<(), AudioError> {
        let doorbell = self.capture_doorbell.clone();
        let consumer = self
            .capture_consumer
            .as_mut()
            .ok_or_else(|| AudioError::DeviceError("input not open".into()))?;

        let mut guard = doorbell.lock.lock().unwrap();
        while consumer.len() < samples.len() {
            let (locked, timeout) = doorbell
                .ready
                .wait_timeout(guard, Duration::from_millis(500))
                .unwrap();
            guard = locked;
            if timeout.timed_out() && consumer.len() < samples.len() {
                return Err(AudioError::InputOverflow);
            }
        }
        drop(guard);

        let filled = consumer.pop_slice(samples);
        debug_assert_eq!(filled, samples.len());
        Ok(())
    }

    fn write_exact(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        let doorbell = self.playback_doorbell.clone();
        let producer = self
            .playback_producer
            .as_mut()
            .ok_or_else(|| AudioError::DeviceError("output not open".into()))?;

        let mut written = 0;
        while written < samples.len() {
            written += producer.push_slice(&samples[written..]);
            if written == samples.len() {
                break;
            }
            let guard = doorbell.lock.lock().unwrap();
            let (_guard, timeout) = doorbell
                .ready
                .wait_timeout(guard, Duration::from_millis(500))
                .unwrap();
            if timeout.timed_out() && written < samples.len() {
                return Err(AudioError::OutputStalled);
            }
        }
        Ok(())
    }

    fn available_capture_samples(&self) -> usize {
        self.capture_consumer.as_ref().map_or(0, |c| c.len())
    }

    fn end(&mut self) {
        self.input_stream = None;
        self.output_stream = None;
        self.capture_consumer = None;
        self.playback_producer = None;
    }
}

impl Drop for RealAudioDevice {
    fn drop(&mut self) {
        self.end();
    }
}
