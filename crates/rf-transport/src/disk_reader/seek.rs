//! Repositioning: full seeks, in-buffer seeks and buffer overwrites

use std::sync::atomic::Ordering;

use rf_core::{RfError, RfResult, SampleCnt, SamplePos};

use super::{DataType, DiskReader, ReaderChannel};
use crate::buffers::RefillBuffers;

impl DiskReader {
    // ═══════════════════════════════════════════════════════════════════════
    // SEEK (butler)
    // ═══════════════════════════════════════════════════════════════════════

    /// Discard buffered material and restart streaming at `sample`.
    ///
    /// With `complete_refill` the buffers are filled until no chunk fits;
    /// otherwise a single pass leaves one chunk of space. Returns whether
    /// more refill work remains.
    pub fn seek(&self, sample: SamplePos, complete_refill: bool) -> RfResult<bool> {
        let mut bufs = RefillBuffers::new();
        self.seek_with_buffers(&mut bufs, sample, complete_refill)
    }

    /// `seek` using caller-owned refill memory
    pub fn seek_with_buffers(
        &self,
        bufs: &mut RefillBuffers,
        sample: SamplePos,
        complete_refill: bool,
    ) -> RfResult<bool> {
        self.pending_overwrite.store(false, Ordering::Release);

        for chan in self.channels.read().iter() {
            chan.rbuf.reset();
        }

        if let Some(midi) = &self.midi {
            if self.midi_counters.nothing_read() {
                midi.reset_tracker();
            }
            midi.reset();
            if let Some(playlist) = self.midi_playlist.read().as_ref() {
                playlist.reset_note_trackers();
            }
        }
        self.midi_counters.reset();

        self.playback_sample.store(sample, Ordering::Release);
        self.set_file_sample(DataType::Audio, sample);
        self.set_file_sample(DataType::Midi, sample);

        log::debug!("{}: seek to {} (complete: {})", self.name, sample, complete_refill);

        if complete_refill {
            while self.refill(bufs, 0)? {}
            Ok(false)
        } else {
            self.refill(bufs, self.config.chunk_samples)
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // INTERNAL SEEK (audio thread)
    // ═══════════════════════════════════════════════════════════════════════

    /// Whether a move of `distance` samples can be served from buffered data
    pub fn can_internal_playback_seek(&self, distance: SampleCnt) -> bool {
        match self.channels.try_read() {
            Some(channels) => self.channels_can_seek(&channels, distance),
            None => false,
        }
    }

    /// Move the read position by `distance` without touching storage.
    /// Only valid after `can_internal_playback_seek(distance)`.
    pub fn internal_playback_seek(&self, distance: SampleCnt) {
        if let Some(channels) = self.channels.try_read() {
            self.seek_channels(&channels, distance);
        }
    }

    pub(crate) fn channels_can_seek(&self, channels: &[ReaderChannel], distance: SampleCnt) -> bool {
        if !channels.iter().all(|c| c.rbuf.can_seek(distance)) {
            return false;
        }
        if self.midi.is_some() && self.has_midi_playlist.load(Ordering::Acquire) {
            // the MIDI ring only moves forward, within what is queued
            return distance >= 0 && distance <= self.midi_counters.lookahead();
        }
        true
    }

    pub(crate) fn seek_channels(&self, channels: &[ReaderChannel], distance: SampleCnt) {
        let mut moved = distance;
        for chan in channels {
            moved = if distance < 0 {
                -(chan.rbuf.decrement_read_ptr(distance.unsigned_abs() as usize) as SampleCnt)
            } else {
                chan.rbuf.increment_read_ptr(distance as usize) as SampleCnt
            };
        }
        if self.midi.is_some() && moved > 0 {
            self.midi_counters.add_read(moved as u32);
        }
        self.playback_sample.fetch_add(moved, Ordering::AcqRel);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // OVERWRITE
    // ═══════════════════════════════════════════════════════════════════════

    /// Audio thread: freeze playback at the current position and flush the
    /// buffers so the butler can refill them from changed material
    pub fn set_pending_overwrite(&self) {
        debug_assert!(!self.pending_overwrite(), "overwrite already pending");

        self.overwrite_sample.store(self.playback_sample(), Ordering::Release);
        if let Some(channels) = self.channels.try_read() {
            for chan in channels.iter() {
                chan.rbuf.read_flush();
            }
        }
        self.pending_overwrite.store(true, Ordering::Release);
    }

    /// Butler: refill everything from the position captured by
    /// `set_pending_overwrite()`, then release playback
    pub fn overwrite_existing_buffers(&self) -> RfResult<()> {
        if !self.pending_overwrite() {
            debug_assert!(false, "overwrite without a pending request");
            return Err(RfError::State(format!("{}: no overwrite pending", self.name)));
        }

        let overwrite_sample = self.overwrite_sample.load(Ordering::Acquire);
        let reversed = self.session.reversed();
        let mut result = Ok(());

        {
            let channels = self.channels.read();
            if let Some(front) = channels.first() {
                let size = front.rbuf.write_space();
                let mut bufs = RefillBuffers::with_capacity(size);
                let playlist = self.playlist.read().clone();
                let mut next = overwrite_sample;

                for (n, chan) in channels.iter().enumerate() {
                    next = overwrite_sample;
                    if let Err(e) = self.audio_read(
                        &chan.rbuf,
                        playlist.as_deref(),
                        &mut bufs,
                        &mut next,
                        size as SampleCnt,
                        n,
                        reversed,
                    ) {
                        log::error!(
                            "{}: overwrite of {} samples at {} failed: {}",
                            self.name,
                            size,
                            overwrite_sample,
                            e
                        );
                        result = Err(e);
                        break;
                    }
                }

                if result.is_ok() {
                    for chan in channels.iter() {
                        chan.rbuf.commit_staged();
                    }
                    self.set_file_sample(DataType::Audio, next);
                } else {
                    for chan in channels.iter() {
                        chan.rbuf.discard_staged();
                    }
                    // the buffers were flushed: streaming restarts at the frozen position
                    self.set_file_sample(DataType::Audio, overwrite_sample);
                }
            }
        }

        let midi_playlist = self.midi_playlist.read().clone();
        if let (Some(midi), Some(playlist)) = (&self.midi, midi_playlist) {
            midi.reset();
            midi.reset_tracker();
            self.midi_counters.reset();

            let mut skipped = 0usize;
            playlist.resolve_note_trackers(
                &mut |ev| {
                    if !midi.write(ev) {
                        skipped += 1;
                    }
                },
                overwrite_sample,
            );
            if skipped > 0 {
                log::debug!("{}: {} resolving note-offs skipped", self.name, skipped);
            }

            let mut next = overwrite_sample;
            match self.midi_read(
                playlist.as_ref(),
                midi,
                &mut next,
                self.config.chunk_samples as SampleCnt,
                reversed,
            ) {
                Ok(()) => self.set_file_sample(DataType::Midi, next),
                Err(e) => {
                    log::error!("{}: MIDI overwrite at {} failed: {}", self.name, overwrite_sample, e);
                    self.set_file_sample(DataType::Midi, overwrite_sample);
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }

        self.pending_overwrite.store(false, Ordering::Release);
        self.overwrite_queued.store(false, Ordering::Release);
        result
    }
}
