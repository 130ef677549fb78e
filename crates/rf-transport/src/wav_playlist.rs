//! WAV-file backed audio playlist
//!
//! Reads go straight to the file through a seekable `hound` reader, one
//! channel at a time. Only the butler calls `read`, so the reader lock is
//! uncontended in practice.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec};
use parking_lot::Mutex;

use rf_core::{Gain, RfError, RfResult, Sample, SampleCnt, SamplePos};

use crate::playlist::AudioPlaylist;

fn wav_error(err: hound::Error) -> RfError {
    match err {
        hound::Error::IoError(e) => RfError::Io(e),
        other => RfError::UnsupportedFormat(other.to_string()),
    }
}

pub struct WavPlaylist {
    path: PathBuf,
    spec: WavSpec,
    /// Frames in the file
    length: SampleCnt,
    reader: Mutex<WavReader<BufReader<File>>>,
}

impl WavPlaylist {
    pub fn open<P: AsRef<Path>>(path: P) -> RfResult<Self> {
        let path = path.as_ref();
        let reader = WavReader::open(path).map_err(wav_error)?;
        let spec = reader.spec();

        match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Float, 32) | (SampleFormat::Int, 16 | 24 | 32) => {}
            (format, bits) => {
                return Err(RfError::UnsupportedFormat(format!(
                    "{}: {:?} {}-bit WAV",
                    path.display(),
                    format,
                    bits
                )));
            }
        }
        if spec.channels == 0 {
            return Err(RfError::UnsupportedFormat(format!("{}: no channels", path.display())));
        }

        let length = reader.duration() as SampleCnt;
        log::debug!(
            "Opened {} ({} ch, {} Hz, {} frames)",
            path.display(),
            spec.channels,
            spec.sample_rate,
            length
        );

        Ok(Self {
            path: path.to_path_buf(),
            spec,
            length,
            reader: Mutex::new(reader),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    pub fn spec(&self) -> WavSpec {
        self.spec
    }

    /// Decode frames `first..first + out.len()` of `channel` into `out`
    fn read_frames(&self, out: &mut [Sample], first: SamplePos, channel: usize) -> RfResult<()> {
        let n_channels = self.spec.channels as usize;
        let wanted = out.len() as SampleCnt;
        let mut reader = self.reader.lock();
        reader.seek(first as u32)?;

        match self.spec.sample_format {
            SampleFormat::Float => {
                let mut samples = reader.samples::<f32>();
                for (i, dst) in out.iter_mut().enumerate() {
                    for c in 0..n_channels {
                        let s = samples
                            .next()
                            .ok_or_else(|| RfError::short_read(first, wanted, i as SampleCnt))?
                            .map_err(wav_error)?;
                        if c == channel {
                            *dst = s;
                        }
                    }
                }
            }
            SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (self.spec.bits_per_sample - 1)) as f32;
                let mut samples = reader.samples::<i32>();
                for (i, dst) in out.iter_mut().enumerate() {
                    for c in 0..n_channels {
                        let s = samples
                            .next()
                            .ok_or_else(|| RfError::short_read(first, wanted, i as SampleCnt))?
                            .map_err(wav_error)?;
                        if c == channel {
                            *dst = s as f32 * scale;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl AudioPlaylist for WavPlaylist {
    fn n_channels(&self) -> usize {
        self.spec.channels as usize
    }

    fn length(&self) -> SampleCnt {
        self.length
    }

    fn read(
        &self,
        sum: &mut [Sample],
        _mixdown: &mut [Sample],
        _gain: &mut [Gain],
        start: SamplePos,
        cnt: SampleCnt,
        channel: usize,
    ) -> RfResult<SampleCnt> {
        let cnt = (cnt.max(0) as usize).min(sum.len());
        let out = &mut sum[..cnt];
        out.fill(0.0);

        let first = start.max(0);
        let end = (start + cnt as SamplePos).min(self.length);
        if first < end {
            let channel = channel.min(self.n_channels() - 1);
            let offset = (first - start) as usize;
            let frames = (end - first) as usize;
            self.read_frames(&mut out[offset..offset + frames], first, channel)?;
        }

        Ok(cnt as SampleCnt)
    }
}

impl std::fmt::Debug for WavPlaylist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavPlaylist")
            .field("path", &self.path)
            .field("channels", &self.spec.channels)
            .field("length", &self.length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use hound::WavWriter;

    fn write_stereo_i16(path: &Path, frames: usize) {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            writer.write_sample((i * 100) as i16).unwrap();
            writer.write_sample(-((i * 100) as i16)).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn read(playlist: &WavPlaylist, start: SamplePos, cnt: usize, channel: usize) -> Vec<Sample> {
        let mut sum = vec![9.0; cnt];
        let mut mix = vec![0.0; cnt];
        let mut gain = vec![0.0; cnt];
        let n = playlist
            .read(&mut sum, &mut mix, &mut gain, start, cnt as SampleCnt, channel)
            .unwrap();
        assert_eq!(n, cnt as SampleCnt);
        sum
    }

    #[test]
    fn test_open_reports_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_stereo_i16(&path, 100);

        let playlist = WavPlaylist::open(&path).unwrap();
        assert_eq!(playlist.n_channels(), 2);
        assert_eq!(playlist.length(), 100);
        assert_eq!(playlist.sample_rate(), 48000);
    }

    #[test]
    fn test_read_channel_with_zero_fill() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_stereo_i16(&path, 10);
        let playlist = WavPlaylist::open(&path).unwrap();

        let left = read(&playlist, -2, 6, 0);
        assert_eq!(left[..2], [0.0, 0.0]);
        assert_relative_eq!(left[3], 100.0 / 32768.0);
        assert_relative_eq!(left[5], 300.0 / 32768.0);

        let right = read(&playlist, 8, 4, 1);
        assert_relative_eq!(right[0], -800.0 / 32768.0);
        assert_relative_eq!(right[1], -900.0 / 32768.0);
        assert_eq!(right[2..], [0.0, 0.0]);
    }

    #[test]
    fn test_float_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for i in 0..8 {
            writer.write_sample(i as f32 * 0.125).unwrap();
        }
        writer.finalize().unwrap();

        let playlist = WavPlaylist::open(&path).unwrap();
        // mono material feeds any channel
        assert_eq!(read(&playlist, 4, 2, 1), vec![0.5, 0.625]);
    }

    #[test]
    fn test_rejects_8_bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eight.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 8,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        writer.write_sample(1i8).unwrap();
        writer.finalize().unwrap();

        assert!(matches!(WavPlaylist::open(&path), Err(RfError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            WavPlaylist::open(dir.path().join("nope.wav")),
            Err(RfError::Io(_))
        ));
    }
}
