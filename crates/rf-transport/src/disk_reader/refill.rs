//! Butler-side buffer refill

use rf_core::{MAX_SAMPLEPOS, RfError, RfResult, Sample, SampleCnt, SamplePos};

use super::{DataType, DiskReader, ReaderChannel};
use crate::buffers::RefillBuffers;
use crate::midi_buffer::{MidiPlaybackBuffer, TimedMidiEvent};
use crate::playlist::{AudioPlaylist, MidiPlaylist};
use crate::ring_buffer::PlaybackBuffer;

/// Smallest storage read worth issuing
const MIN_READ_BYTES: usize = 256 * 1024;
/// Largest single storage read
const MAX_READ_BYTES: usize = 4 * 1024 * 1024;
/// Reads are a multiple of this
const READ_ALIGN_BYTES: usize = 16384;

impl DiskReader {
    /// Top up audio and MIDI buffers.
    ///
    /// `fill_level` leaves that many samples of write space unfilled.
    /// Returns true while another pass would still find a chunk to read.
    pub fn refill(&self, bufs: &mut RefillBuffers, fill_level: usize) -> RfResult<bool> {
        let more = self.refill_audio(bufs, fill_level)?;
        self.refill_midi()?;
        Ok(more)
    }

    /// Samples to read for `total_space` of free buffer, sized so the
    /// storage read lands between 256 KiB and 4 MiB in 16 KiB units
    pub(crate) fn refill_read_size(total_space: SampleCnt, bits_per_sample: usize) -> SampleCnt {
        let bytes_per_sample = (bits_per_sample / 8).max(1);
        let total_bytes = (total_space.max(0) as usize).saturating_mul(bytes_per_sample);
        let byte_size = total_bytes.clamp(MIN_READ_BYTES, MAX_READ_BYTES);
        let byte_size = byte_size - byte_size % READ_ALIGN_BYTES;
        (byte_size / bytes_per_sample) as SampleCnt
    }

    fn refill_audio(&self, bufs: &mut RefillBuffers, fill_level: usize) -> RfResult<bool> {
        if self.session.loading() {
            return Ok(false);
        }

        let channels = self.channels.read();
        let Some(front) = channels.first() else {
            return Ok(false);
        };

        let reversed = self.session.reversed();
        let mut total_space = front.rbuf.write_space() as SampleCnt;
        if total_space == 0 {
            return Ok(false);
        }

        let fill_level = fill_level as SampleCnt;
        if fill_level > 0 && fill_level < total_space {
            total_space -= fill_level;
        }

        let chunk = self.config.chunk_samples as SampleCnt;
        if total_space < chunk && self.session.transport_speed().abs() < 2.0 {
            return Ok(false);
        }
        if self.slaved() && total_space < (front.rbuf.bufsize() / 2) as SampleCnt {
            return Ok(false);
        }

        let ffa = self.file_sample(DataType::Audio);

        if reversed {
            if ffa == 0 {
                // at the start of material: only silence left to play
                zero_fill(&channels);
                return Ok(false);
            }
            if ffa < total_space {
                total_space = ffa;
            }
        } else {
            if ffa == MAX_SAMPLEPOS {
                zero_fill(&channels);
                return Ok(false);
            }
            if ffa > MAX_SAMPLEPOS - total_space {
                total_space = MAX_SAMPLEPOS - ffa;
            }
        }

        let samples_to_read =
            Self::refill_read_size(total_space, self.config.native_file_format.bits_per_sample());
        let playlist = self.playlist.read().clone();

        let mut file_sample_tmp = ffa;
        for (chan_n, chan) in channels.iter().enumerate() {
            file_sample_tmp = ffa;
            let to_read = total_space
                .min(chan.rbuf.write_space() as SampleCnt)
                .min(samples_to_read);
            if to_read <= 0 {
                continue;
            }

            if let Err(e) = self.audio_read(
                &chan.rbuf,
                playlist.as_deref(),
                bufs,
                &mut file_sample_tmp,
                to_read,
                chan_n,
                reversed,
            ) {
                for c in channels.iter() {
                    c.rbuf.discard_staged();
                }
                log::error!(
                    "{}: refill of {} samples at {} failed: {}",
                    self.name,
                    to_read,
                    ffa,
                    e
                );
                return Err(e);
            }
        }

        for chan in channels.iter() {
            chan.rbuf.commit_staged();
        }
        self.set_file_sample(DataType::Audio, file_sample_tmp);

        Ok(total_space - samples_to_read > chunk)
    }

    /// Stage `cnt` samples of `channel` starting at `*start` into `rb`,
    /// wrapping at the loop end. `*start` is left where the next read
    /// continues. Nothing is published; the caller commits or discards.
    pub(crate) fn audio_read(
        &self,
        rb: &PlaybackBuffer<Sample>,
        playlist: Option<&dyn AudioPlaylist>,
        bufs: &mut RefillBuffers,
        start: &mut SamplePos,
        cnt: SampleCnt,
        channel: usize,
        reversed: bool,
    ) -> RfResult<()> {
        let Some(playlist) = playlist else {
            bufs.reserve(cnt as usize);
            let zeros = &mut bufs.sum[..cnt as usize];
            zeros.fill(0.0);
            rb.stage(zeros);
            return Ok(());
        };

        // reverse play never loops
        let loop_range = if reversed { None } else { self.loop_location.region() };

        if let Some(lp) = loop_range {
            if *start >= lp.end {
                *start = lp.squish(*start);
            }
        }
        if reversed {
            *start -= cnt;
        }

        let mut remaining = cnt;
        while remaining > 0 {
            let mut this_read = remaining;
            let mut reloop = None;

            if let Some(lp) = loop_range {
                if lp.end - *start <= remaining {
                    this_read = lp.end - *start;
                    reloop = Some(lp.start);
                }
            }
            if this_read <= 0 {
                break;
            }

            let n = this_read as usize;
            bufs.reserve(n);
            let got = playlist.read(
                &mut bufs.sum[..n],
                &mut bufs.mixdown[..n],
                &mut bufs.gain[..n],
                *start,
                this_read,
                channel,
            )?;
            if got != this_read {
                return Err(RfError::short_read(*start, this_read, got));
            }

            if reversed {
                bufs.sum[..n].reverse();
            } else if let Some(loop_start) = reloop {
                *start = loop_start;
            } else {
                *start += this_read;
            }

            let staged = rb.stage(&bufs.sum[..n]);
            if staged != n {
                log::warn!("{}: ring buffer took {} of {} samples", self.name, staged, n);
                return Err(RfError::BufferOverrun);
            }

            remaining -= this_read;
        }

        Ok(())
    }

    fn refill_midi(&self) -> RfResult<()> {
        let Some(midi) = &self.midi else {
            return Ok(());
        };
        let Some(playlist) = self.midi_playlist.read().clone() else {
            return Ok(());
        };
        if self.session.reversed() || midi.write_space() == 0 {
            return Ok(());
        }

        let ahead = self.midi_counters.lookahead();
        let readahead = self.config.midi_readahead as SampleCnt;
        if ahead >= readahead {
            return Ok(());
        }

        let ffm = self.file_sample(DataType::Midi);
        let to_read = (readahead - ahead).min(MAX_SAMPLEPOS - ffm);
        if to_read <= 0 {
            return Ok(());
        }

        let mut next = ffm;
        self.midi_read(playlist.as_ref(), midi, &mut next, to_read, false)?;
        self.set_file_sample(DataType::Midi, next);
        Ok(())
    }

    /// Pull `dur` samples of MIDI starting at stream time `*start` into the
    /// ring, splitting at the loop end. Events are stamped in stream time.
    pub(crate) fn midi_read(
        &self,
        playlist: &dyn MidiPlaylist,
        midi: &MidiPlaybackBuffer,
        start: &mut SamplePos,
        dur: SampleCnt,
        reversed: bool,
    ) -> RfResult<()> {
        let loop_range = self.loop_location.region();
        let mut remaining = dur;
        let mut dropped = 0usize;

        while remaining > 0 {
            let effective_start = loop_range.map_or(*start, |lp| lp.squish(*start));
            let this_read = match loop_range {
                Some(lp) if lp.end > effective_start && lp.end - effective_start <= remaining => {
                    lp.end - effective_start
                }
                _ => remaining,
            };

            let stream_base = *start;
            let covered = playlist.read(
                &mut |ev: TimedMidiEvent| {
                    let stamped =
                        TimedMidiEvent::new(stream_base + (ev.time - effective_start), ev.event);
                    if !midi.write(stamped) {
                        dropped += 1;
                    }
                },
                effective_start,
                this_read,
                loop_range,
            )?;
            if covered != this_read {
                return Err(RfError::short_read(effective_start, this_read, covered));
            }

            self.midi_counters.add_written(this_read as u32);
            if reversed {
                *start -= this_read;
            } else {
                *start += this_read;
            }
            remaining -= this_read;
        }

        if dropped > 0 {
            log::warn!("{}: MIDI playback ring full, dropped {} events", self.name, dropped);
        }
        let skipped = midi.take_dropped();
        if skipped > 0 {
            log::debug!("{}: {} MIDI events skipped on full cycle buffers", self.name, skipped);
        }
        Ok(())
    }
}

/// Fill every channel's free space with silence
fn zero_fill(channels: &[ReaderChannel]) {
    for chan in channels {
        chan.rbuf.write_zero(chan.rbuf.write_space());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_size_bounds() {
        // small requests still read 256 KiB
        assert_eq!(DiskReader::refill_read_size(1000, 32), 65536);
        // large requests cap at 4 MiB
        assert_eq!(DiskReader::refill_read_size(10_000_000, 32), 1_048_576);
        assert_eq!(DiskReader::refill_read_size(10_000_000, 16), 2_097_152);
    }

    #[test]
    fn test_read_size_alignment() {
        // 100_000 floats = 400_000 bytes -> 393_216 bytes
        assert_eq!(DiskReader::refill_read_size(100_000, 32), 98_304);
        // 24-bit at the cap: 4 MiB / 3 bytes
        assert_eq!(DiskReader::refill_read_size(5_000_000, 24), 1_398_101);
    }
}
