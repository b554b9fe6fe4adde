//! Audio decoder using symphonia for multi-format support.
//!
//! Decodes a fully downloaded stream held in memory. Supported formats:
//! - FLAC
//! - AAC (in MP4 container)
//! - MP3
//! - OGG Vorbis
//! - WAV/PCM

use std::io::Cursor;
use std::time::Duration;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use super::traits::DeviceError;

/// Audio decoder wrapper for symphonia.
pub struct AudioDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    duration: Duration,
    time_base: Option<TimeBase>,
}

impl AudioDecoder {
    /// Open an in-memory stream. `extension` helps the probe ("flac", "m4a").
    pub fn from_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<Self, DeviceError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| DeviceError::Load(format!("unsupported format: {}", e)))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DeviceError::Load("no audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| DeviceError::Load("unknown sample rate".to_string()))?;
        let channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(2);

        let time_base = codec_params.time_base;
        let duration = match (codec_params.n_frames, time_base) {
            (Some(n_frames), Some(tb)) => to_duration(tb.calc_time(n_frames)),
            (Some(n_frames), None) => Duration::from_secs_f64(n_frames as f64 / sample_rate as f64),
            _ => Duration::ZERO,
        };

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| DeviceError::Load(format!("no decoder: {}", e)))?;

        Ok(Self {
            reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            duration,
            time_base,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Total duration; zero when the container doesn't say.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Seek to `seconds` from the start.
    pub fn seek(&mut self, seconds: f64) -> Result<(), DeviceError> {
        let seek_to = SeekTo::Time {
            time: Time::from(seconds.max(0.0)),
            track_id: Some(self.track_id),
        };

        self.reader
            .seek(SeekMode::Accurate, seek_to)
            .map_err(|e| DeviceError::Output(format!("seek failed: {}", e)))?;

        // Reset decoder state after seeking
        self.decoder.reset();
        Ok(())
    }

    /// Decode the next packet into interleaved f32 samples.
    ///
    /// Returns `Ok(None)` at end of stream.
    pub fn decode_next(&mut self) -> Result<Option<DecodedChunk>, DeviceError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(DeviceError::Output(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let timestamp = self
                .time_base
                .map(|tb| to_duration(tb.calc_time(packet.ts())))
                .unwrap_or_default();

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                // Skip bad frame
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(DeviceError::Output(e.to_string())),
            };

            return Ok(Some(DecodedChunk {
                samples: interleave(&decoded),
                timestamp,
            }));
        }
    }
}

/// One decoded packet.
#[derive(Debug, Clone)]
pub struct DecodedChunk {
    /// Interleaved samples
    pub samples: Vec<f32>,
    /// Presentation time of the first sample
    pub timestamp: Duration,
}

fn to_duration(time: Time) -> Duration {
    Duration::from_secs_f64(time.seconds as f64 + time.frac)
}

/// Convert a planar buffer of any supported sample type to interleaved f32.
fn interleave(buffer: &AudioBufferRef) -> Vec<f32> {
    fn collect<S: Copy>(frames: usize, planes: &[&[S]], convert: impl Fn(S) -> f32) -> Vec<f32> {
        let mut output = Vec::with_capacity(frames * planes.len());
        for frame in 0..frames {
            for plane in planes {
                output.push(convert(plane[frame]));
            }
        }
        output
    }

    match buffer {
        AudioBufferRef::F32(buf) => collect(buf.frames(), buf.planes().planes(), |s| s),
        AudioBufferRef::S16(buf) => collect(buf.frames(), buf.planes().planes(), |s| s as f32 / 32768.0),
        AudioBufferRef::S24(buf) => {
            collect(buf.frames(), buf.planes().planes(), |s| s.0 as f32 / 8388608.0)
        }
        AudioBufferRef::S32(buf) => {
            collect(buf.frames(), buf.planes().planes(), |s| s as f32 / 2147483648.0)
        }
        AudioBufferRef::U8(buf) => {
            collect(buf.frames(), buf.planes().planes(), |s| (s as f32 - 128.0) / 128.0)
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 0.1 s of 16-bit stereo silence at 8 kHz as a WAV file.
    fn silent_wav() -> Vec<u8> {
        let sample_rate: u32 = 8000;
        let frames: u32 = 800;
        let data_len = frames * 4;
        let mut wav = Vec::new();
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVEfmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
        wav.extend_from_slice(&2u16.to_le_bytes()); // channels
        wav.extend_from_slice(&sample_rate.to_le_bytes());
        wav.extend_from_slice(&(sample_rate * 4).to_le_bytes());
        wav.extend_from_slice(&4u16.to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        wav.resize(wav.len() + data_len as usize, 0);
        wav
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(AudioDecoder::from_bytes(vec![0u8; 64], None).is_err());
    }

    #[test]
    fn test_decodes_wav_to_end() {
        let mut decoder = AudioDecoder::from_bytes(silent_wav(), Some("wav")).unwrap();
        assert_eq!(decoder.sample_rate(), 8000);
        assert_eq!(decoder.channels(), 2);
        assert!((decoder.duration().as_secs_f64() - 0.1).abs() < 0.01);

        let mut total = 0;
        while let Some(chunk) = decoder.decode_next().unwrap() {
            assert!(chunk.samples.iter().all(|s| *s == 0.0));
            total += chunk.samples.len();
        }
        assert_eq!(total, 1600);
    }
}
