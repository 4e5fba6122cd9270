use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Number of input frames the resamplers consume per call.
pub const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// Creates a mono resampler converting between two sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Splits samples into fixed-size chunks, padding the last one with silence.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Creates a heap ring buffer shared between a feeder and an audio callback.
pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Feeding half of a playback ring.
///
/// Counts every sample it pushes so that [`RingWriter::skip_written`] can mark exactly
/// the samples already committed as skipped; samples pushed afterwards are kept.
pub struct RingWriter {
    producer: HeapProd<f32>,
    written: u64,
    skip_until: Arc<AtomicU64>,
}

/// Draining half of a playback ring, owned by the output callback.
pub struct RingReader {
    consumer: HeapCons<f32>,
    read: u64,
    skip_until: Arc<AtomicU64>,
}

/// Creates a mono playback ring of `capacity` samples.
pub fn playback_ring(capacity: usize) -> (RingWriter, RingReader) {
    let (producer, consumer) = shared_buffer(capacity.max(1)).split();
    let skip_until = Arc::new(AtomicU64::new(0));
    (
        RingWriter {
            producer,
            written: 0,
            skip_until: skip_until.clone(),
        },
        RingReader {
            consumer,
            read: 0,
            skip_until,
        },
    )
}

impl RingWriter {
    /// Pushes as many samples as fit. Returns how many went in.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        let pushed = self.producer.push_slice(samples);
        self.written += pushed as u64;
        pushed
    }

    /// Drops everything written so far that the reader has not played yet.
    pub fn skip_written(&self) {
        self.skip_until.fetch_max(self.written, Ordering::AcqRel);
    }
}

impl RingReader {
    /// Fills interleaved `data` with the next samples, one per frame, padding with silence.
    pub fn fill(&mut self, data: &mut [f32], channels: usize) {
        let skip_until = self.skip_until.load(Ordering::Acquire);
        if self.read < skip_until {
            let skipped = self.consumer.skip((skip_until - self.read) as usize);
            self.read += skipped as u64;
        }
        for frame in data.chunks_mut(channels.max(1)) {
            let sample = match self.consumer.try_pop() {
                Some(sample) => {
                    self.read += 1;
                    sample
                }
                None => 0.0,
            };
            frame.fill(sample);
        }
    }
}

/// Resamples a complete fragment. The tail is padded to a full resampler chunk.
pub fn resample_padded(resampler: &mut FastFixedIn<f32>, samples: &[f32]) -> Vec<f32> {
    let chunk_size = resampler.input_frames_next();
    let mut out = Vec::with_capacity(samples.len());
    for chunk in split_for_chunks(samples, chunk_size) {
        match resampler.process(&[chunk.as_slice()], None) {
            Ok(resampled) => {
                if let Some(channel) = resampled.first() {
                    out.extend_from_slice(channel);
                }
            }
            Err(e) => tracing::error!("failed to resample audio: {}", e),
        }
    }
    out
}

/// Resamples as many whole chunks as `buffer` holds, leaving the remainder for the next call.
pub fn resample_buffered(resampler: &mut FastFixedIn<f32>, buffer: &mut Vec<f32>) -> Vec<f32> {
    let mut out = Vec::new();
    loop {
        let chunk_size = resampler.input_frames_next();
        if buffer.len() < chunk_size {
            break;
        }
        let chunk: Vec<f32> = buffer.drain(..chunk_size).collect();
        match resampler.process(&[chunk.as_slice()], None) {
            Ok(resampled) => {
                if let Some(channel) = resampled.first() {
                    out.extend_from_slice(channel);
                }
            }
            Err(e) => tracing::error!("failed to resample audio: {}", e),
        }
    }
    out
}

/// Averages interleaved frames down to one channel.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Decodes little-endian PCM16 bytes into f32 samples in `[-1.0, 1.0]`.
/// A trailing odd byte is ignored.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| {
            let v = i16::from_le_bytes([pair[0], pair[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect()
}

/// Encodes f32 samples as little-endian PCM16 bytes.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect()
}
