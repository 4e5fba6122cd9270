//! cpal-backed microphone and speaker.

use crate::capture::{CaptureSource, CaptureStream};
use crate::event::{EventSender, SessionEvent};
use crate::playback::{PlaybackSink, SinkFactory, WriteTicket};
use crate::types::AudioFragment;
use anyhow::{Context, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use voice_session_utils::audio::{
    create_resampler, decode_pcm16, downmix, encode_pcm16, playback_ring, resample_buffered,
    resample_padded, RingWriter, RESAMPLER_CHUNK_SIZE,
};
use voice_session_utils::device::{get_or_default_input, get_or_default_output};

/// Length of the output ring buffer.
const OUTPUT_LATENCY_MS: usize = 1000;
/// Output resampler chunk; kept small so per-fragment padding stays inaudible.
const OUTPUT_RESAMPLER_CHUNK_SIZE: usize = 100;
/// How long a feeder waits for room in a full ring buffer.
const FEED_RETRY_INTERVAL: Duration = Duration::from_millis(20);

pub struct CpalCaptureSource {
    device_name: Option<String>,
    wire_sample_rate: u32,
    chunk_ms: u32,
}

impl CpalCaptureSource {
    pub fn new(device_name: Option<String>, wire_sample_rate: u32, chunk_ms: u32) -> Self {
        Self {
            device_name,
            wire_sample_rate,
            chunk_ms,
        }
    }

    fn chunk_samples(&self) -> usize {
        (self.wire_sample_rate as usize * self.chunk_ms as usize / 1000).max(1)
    }
}

#[async_trait(?Send)]
impl CaptureSource for CpalCaptureSource {
    async fn acquire(&self, events: EventSender) -> Result<Box<dyn CaptureStream>> {
        let input = get_or_default_input(self.device_name.clone())?;
        tracing::info!("Using input device: {:?}", input.name()?);

        let default_config = input
            .default_input_config()
            .context("Failed to get default input config")?;
        let input_config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        tracing::info!("Input stream config: {:?}", &input_config);

        let channels = input_config.channels as usize;
        let input_rate = input_config.sample_rate.0;
        let mut resampler = if input_rate == self.wire_sample_rate {
            None
        } else {
            Some(create_resampler(
                input_rate as f64,
                self.wire_sample_rate as f64,
                RESAMPLER_CHUNK_SIZE,
            )?)
        };
        let chunk_samples = self.chunk_samples();
        let mut raw = Vec::new();
        let mut ready: Vec<f32> = Vec::with_capacity(chunk_samples * 2);

        let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let mono = downmix(data, channels);
            let wire = match resampler.as_mut() {
                Some(resampler) => {
                    raw.extend_from_slice(&mono);
                    resample_buffered(resampler, &mut raw)
                }
                None => mono,
            };
            ready.extend_from_slice(&wire);
            while ready.len() >= chunk_samples {
                let chunk: Vec<f32> = ready.drain(..chunk_samples).collect();
                let fragment = AudioFragment::from(encode_pcm16(&chunk));
                if events.send(SessionEvent::Capture(fragment)).is_err() {
                    ready.clear();
                    return;
                }
            }
        };

        let stream = input
            .build_input_stream(
                &input_config,
                input_data_fn,
                move |err| tracing::error!("An error occurred on input stream: {}", err),
                None,
            )
            .context("Failed to build input stream")?;
        stream.play().context("Failed to start input stream")?;

        Ok(Box::new(CpalCapture {
            stream: Some(stream),
        }))
    }
}

struct CpalCapture {
    stream: Option<cpal::Stream>,
}

impl CaptureStream for CpalCapture {
    fn pause(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_ref() {
            stream.pause().context("Failed to pause input stream")?;
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_ref() {
            stream.play().context("Failed to resume input stream")?;
        }
        Ok(())
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("input stream closed");
        }
    }
}

pub struct CpalSinkFactory {
    device_name: Option<String>,
    wire_sample_rate: u32,
}

impl CpalSinkFactory {
    pub fn new(device_name: Option<String>, wire_sample_rate: u32) -> Self {
        Self {
            device_name,
            wire_sample_rate,
        }
    }
}

impl SinkFactory for CpalSinkFactory {
    fn create(&self, events: EventSender) -> Result<Box<dyn PlaybackSink>> {
        let output = get_or_default_output(self.device_name.clone())?;
        tracing::info!("Using output device: {:?}", output.name()?);

        let default_config = output
            .default_output_config()
            .context("Failed to get default output config")?;
        let output_config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        tracing::info!("Output stream config: {:?}", &output_config);

        let channels = (output_config.channels as usize).max(1);
        let output_rate = output_config.sample_rate.0;

        let (writer, mut reader) = playback_ring(output_rate as usize * OUTPUT_LATENCY_MS / 1000);
        let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            reader.fill(data, channels);
        };

        let stream = output
            .build_output_stream(
                &output_config,
                output_data_fn,
                move |err| tracing::error!("An error occurred on output stream: {}", err),
                None,
            )
            .context("Failed to build output stream")?;
        stream.play().context("Failed to start output stream")?;

        let resampler = if output_rate == self.wire_sample_rate {
            None
        } else {
            Some(create_resampler(
                self.wire_sample_rate as f64,
                output_rate as f64,
                OUTPUT_RESAMPLER_CHUNK_SIZE,
            )?)
        };

        Ok(Box::new(CpalSink {
            stream: Some(stream),
            writer: Arc::new(Mutex::new(writer)),
            resampler,
            busy: Arc::new(AtomicBool::new(false)),
            feeder: None,
            events,
        }))
    }
}

/// Speaker fed through a ring buffer.
///
/// Each write is pushed into the ring by its own task, which reports completion once
/// the last sample is in; until then the sink is busy.
struct CpalSink {
    stream: Option<cpal::Stream>,
    writer: Arc<Mutex<RingWriter>>,
    resampler: Option<rubato::FastFixedIn<f32>>,
    busy: Arc<AtomicBool>,
    feeder: Option<tokio::task::JoinHandle<()>>,
    events: EventSender,
}

impl PlaybackSink for CpalSink {
    fn write(&mut self, ticket: WriteTicket, fragment: AudioFragment) -> Result<()> {
        if self.stream.is_none() {
            anyhow::bail!("output stream closed");
        }
        let decoded = decode_pcm16(fragment.as_bytes());
        let samples = match self.resampler.as_mut() {
            Some(resampler) => resample_padded(resampler, &decoded),
            None => decoded,
        };

        self.busy.store(true, Ordering::Release);
        let writer = self.writer.clone();
        let busy = self.busy.clone();
        let events = self.events.clone();
        self.feeder = Some(tokio::spawn(async move {
            let mut offset = 0;
            while offset < samples.len() {
                let pushed = match writer.lock() {
                    Ok(mut writer) => writer.push(&samples[offset..]),
                    Err(_) => {
                        busy.store(false, Ordering::Release);
                        let _ = events.send(SessionEvent::write_failed(ticket, "output buffer poisoned"));
                        return;
                    }
                };
                offset += pushed;
                if offset < samples.len() {
                    tokio::time::sleep(FEED_RETRY_INTERVAL).await;
                }
            }
            busy.store(false, Ordering::Release);
            let _ = events.send(SessionEvent::write_finished(ticket));
        }));
        Ok(())
    }

    fn busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn cancel_pending(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
        self.busy.store(false, Ordering::Release);
    }

    /// Skips what is already in the ring; samples written after this call still play.
    fn seek_to_end(&mut self) {
        match self.writer.lock() {
            Ok(writer) => writer.skip_written(),
            Err(_) => tracing::warn!("output buffer poisoned, cannot skip"),
        }
    }

    fn dispose(&mut self) {
        self.cancel_pending();
        if self.stream.take().is_some() {
            tracing::debug!("output stream closed");
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.dispose();
    }
}
