//! Mono PCM clips and the 16-bit WAV container they travel in.

use std::io::Write;
use std::path::Path;

use crate::{Result, SonifyError};

/// Read-only block of mono samples in `[-1, 1]` at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    sample_rate: u32,
    samples: Vec<f32>,
}

impl Clip {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in whole milliseconds, rounded down.
    pub fn duration_ms(&self) -> u64 {
        samples_to_ms(self.samples.len(), self.sample_rate)
    }

    /// Linearly resamples the clip to `target_rate`.
    pub fn resampled(&self, target_rate: u32) -> Clip {
        if target_rate == self.sample_rate || self.samples.len() < 2 || self.sample_rate == 0 {
            return Clip::new(target_rate, self.samples.clone());
        }

        let ratio = self.sample_rate as f64 / target_rate as f64;
        let out_len = ((self.samples.len() as f64) / ratio).round().max(1.0) as usize;
        let last = self.samples.len() - 1;
        let samples = (0..out_len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let index = (pos.floor() as usize).min(last);
                let next = (index + 1).min(last);
                let frac = (pos - index as f64) as f32;
                self.samples[index] + (self.samples[next] - self.samples[index]) * frac
            })
            .collect();

        Clip::new(target_rate, samples)
    }
}

pub fn ms_to_samples(ms: u64, sample_rate: u32) -> usize {
    (ms * sample_rate as u64 / 1000) as usize
}

pub fn samples_to_ms(samples: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    samples as u64 * 1000 / sample_rate as u64
}

// --- Writing ---

const NUM_CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;
const BLOCK_ALIGN: u16 = NUM_CHANNELS * (BITS_PER_SAMPLE / 8);
/// Bytes of the RIFF payload that precede the sample data.
const HEADER_PAYLOAD: u32 = 36;

/// Size of the data chunk for `len` mono 16-bit samples. RIFF sizes are
/// 32-bit, so mixes whose file size would not fit are rejected.
fn data_chunk_size(len: usize) -> Result<u32> {
    u32::try_from(len)
        .ok()
        .and_then(|len| len.checked_mul(BLOCK_ALIGN as u32))
        .filter(|size| size.checked_add(HEADER_PAYLOAD).is_some())
        .ok_or(SonifyError::InvalidInput("mix is too long for a WAV file"))
}

/// Writes `samples` as 16-bit mono PCM, clamping to the representable range.
pub fn write_wav(w: &mut impl Write, samples: &[f32], sample_rate: u32) -> Result<()> {
    let data_size = data_chunk_size(samples.len())?;

    write_riff_header(w, data_size)?;
    write_fmt_chunk(w, NUM_CHANNELS, sample_rate, BLOCK_ALIGN, BITS_PER_SAMPLE)?;
    write_data_chunk(w, samples, data_size)?;
    Ok(())
}

/// Encodes and writes a WAV file to `path`. Oversize mixes fail before the
/// file is created.
pub fn save_wav(path: impl AsRef<Path>, samples: &[f32], sample_rate: u32) -> Result<()> {
    data_chunk_size(samples.len())?;
    let file = std::fs::File::create(path.as_ref())?;
    let mut writer = std::io::BufWriter::new(file);
    write_wav(&mut writer, samples, sample_rate)?;
    writer.flush()?;
    Ok(())
}

fn write_riff_header(w: &mut impl Write, data_size: u32) -> std::io::Result<()> {
    w.write_all(b"RIFF")?;
    w.write_all(&(HEADER_PAYLOAD + data_size).to_le_bytes())?;
    w.write_all(b"WAVE")
}

fn write_fmt_chunk(
    w: &mut impl Write,
    num_channels: u16,
    sample_rate: u32,
    block_align: u16,
    bits_per_sample: u16,
) -> std::io::Result<()> {
    w.write_all(b"fmt ")?;
    w.write_all(&16u32.to_le_bytes())?;
    w.write_all(&1u16.to_le_bytes())?;
    w.write_all(&num_channels.to_le_bytes())?;
    w.write_all(&sample_rate.to_le_bytes())?;
    w.write_all(&(sample_rate * block_align as u32).to_le_bytes())?;
    w.write_all(&block_align.to_le_bytes())?;
    w.write_all(&bits_per_sample.to_le_bytes())
}

fn write_data_chunk(w: &mut impl Write, samples: &[f32], data_size: u32) -> std::io::Result<()> {
    w.write_all(b"data")?;
    w.write_all(&data_size.to_le_bytes())?;
    for &sample in samples {
        let pcm = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        w.write_all(&pcm.to_le_bytes())?;
    }
    Ok(())
}

// --- Reading ---

/// Decodes 8 or 16-bit PCM WAV bytes into a mono clip. Stereo input is
/// averaged down to one channel.
pub fn load_wav(data: &[u8]) -> Result<Clip> {
    let header = parse_header(data)?;
    let end = (header.data_offset + header.data_size).min(data.len());
    let raw = &data[header.data_offset..end];

    let interleaved: Vec<f32> = match header.bits_per_sample {
        8 => raw.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
        _ => raw
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
            .collect(),
    };

    let channels = header.num_channels as usize;
    let samples = interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    Ok(Clip::new(header.sample_rate, samples))
}

/// Reads and decodes a WAV file from disk.
pub fn read_wav(path: impl AsRef<Path>) -> Result<Clip> {
    let data = std::fs::read(path.as_ref())?;
    load_wav(&data)
}

struct WavHeader {
    num_channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    data_offset: usize,
    data_size: usize,
}

fn parse_header(data: &[u8]) -> Result<WavHeader> {
    if data.len() < 44 {
        return Err(SonifyError::InvalidWav("file shorter than a WAV header".into()));
    }
    if &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return Err(SonifyError::InvalidWav("missing RIFF/WAVE magic".into()));
    }

    let mut pos = 12;
    let mut fmt: Option<(u16, u32, u16)> = None;
    let mut data_chunk: Option<(usize, usize)> = None;

    while pos + 8 <= data.len() {
        let chunk_id = &data[pos..pos + 4];
        let chunk_size = read_u32_le(data, pos + 4) as usize;

        if chunk_id == b"fmt " && chunk_size >= 16 && pos + 24 <= data.len() {
            let format = read_u16_le(data, pos + 8);
            if format != 1 {
                return Err(SonifyError::InvalidWav(format!(
                    "unsupported format tag {format}"
                )));
            }
            let channels = read_u16_le(data, pos + 10);
            let rate = read_u32_le(data, pos + 12);
            let bits = read_u16_le(data, pos + 22);
            fmt = Some((channels, rate, bits));
        } else if chunk_id == b"data" {
            data_chunk = Some((pos + 8, chunk_size));
        }

        pos = pos.saturating_add(8).saturating_add(chunk_size);
        if pos % 2 != 0 {
            pos += 1;
        }
    }

    let (num_channels, sample_rate, bits_per_sample) =
        fmt.ok_or_else(|| SonifyError::InvalidWav("missing fmt chunk".into()))?;
    let (data_offset, data_size) =
        data_chunk.ok_or_else(|| SonifyError::InvalidWav("missing data chunk".into()))?;

    if bits_per_sample != 8 && bits_per_sample != 16 {
        return Err(SonifyError::InvalidWav(format!(
            "unsupported bit depth {bits_per_sample}"
        )));
    }
    if !(1..=2).contains(&num_channels) {
        return Err(SonifyError::InvalidWav(format!(
            "unsupported channel count {num_channels}"
        )));
    }

    Ok(WavHeader {
        num_channels,
        sample_rate,
        bits_per_sample,
        data_offset,
        data_size,
    })
}

fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}
