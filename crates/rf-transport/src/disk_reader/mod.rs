//! Disk reader
//!
//! One per track. Streams playlist material into per-channel playback
//! buffers from the butler thread, and serves them to the audio callback
//! through `run()`.
//!
//! ## Threading
//!
//! - `run()`, `set_pending_overwrite()` and the internal seek calls are
//!   audio-thread only. They never lock: shared state is read with
//!   `try_read`/`try_lock` and a failed attempt produces silence.
//! - `refill()`, `seek()`, `overwrite_existing_buffers()` and
//!   `adjust_buffering()` are butler-only.
//! - Everything else may be called from any thread.
//!
//! ## Time base
//!
//! `playback_sample` and the MIDI ring use stream time: a monotonic
//! position that keeps counting through loop wraps. Audio file positions
//! are folded back into the loop range by the butler.

mod refill;
mod seek;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicUsize, Ordering};

use parking_lot::RwLock;

use rf_core::{
    Gain, MidiBuffer, RfError, RfResult, Sample, SampleCnt, SamplePos, apply_simple_gain,
    mix_buffers_no_gain,
};

use crate::buffers::BufferSet;
use crate::config::DiskConfig;
use crate::counters::MidiCounters;
use crate::declick::DeclickAmp;
use crate::location::LoopLocation;
use crate::midi_buffer::MidiPlaybackBuffer;
use crate::playlist::{AudioPlaylist, MidiPlaylist};
use crate::ring_buffer::PlaybackBuffer;
use crate::session::{MonitorState, SessionState};
use crate::signal::UnderrunSignal;

// ═══════════════════════════════════════════════════════════════════════════
// SHARED CONTEXT
// ═══════════════════════════════════════════════════════════════════════════

/// Session-wide collaborators every disk reader of a session shares
#[derive(Debug, Clone)]
pub struct DiskContext {
    pub session: Arc<SessionState>,
    pub config: DiskConfig,
    pub underrun: Arc<UnderrunSignal>,
    pub loop_location: Arc<LoopLocation>,
}

impl DiskContext {
    pub fn new(sample_rate: u32, config: DiskConfig) -> Self {
        Self {
            session: Arc::new(SessionState::new(sample_rate)),
            config,
            underrun: Arc::new(UnderrunSignal::new()),
            loop_location: Arc::new(LoopLocation::new()),
        }
    }
}

/// Kind of material a file position refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Audio = 0,
    Midi = 1,
}

/// Per-channel playback state
pub(crate) struct ReaderChannel {
    pub(crate) rbuf: PlaybackBuffer<Sample>,
}

impl ReaderChannel {
    fn new(buffer_samples: usize, reservation: usize) -> Self {
        Self {
            rbuf: PlaybackBuffer::with_reservation(buffer_samples, reservation),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DISK READER
// ═══════════════════════════════════════════════════════════════════════════

pub struct DiskReader {
    name: String,
    session: Arc<SessionState>,
    config: DiskConfig,
    underrun: Arc<UnderrunSignal>,
    loop_location: Arc<LoopLocation>,

    channels: RwLock<Vec<ReaderChannel>>,
    /// Size used next time channel buffers are (re)allocated
    buffer_samples: AtomicUsize,

    playlist: RwLock<Option<Arc<dyn AudioPlaylist>>>,
    has_playlist: AtomicBool,
    midi_playlist: RwLock<Option<Arc<dyn MidiPlaylist>>>,
    has_midi_playlist: AtomicBool,

    midi: Option<MidiPlaybackBuffer>,
    midi_counters: MidiCounters,

    /// Next sample the audio thread will play
    playback_sample: AtomicI64,
    /// Next sample the butler will read, per data type
    file_sample: [AtomicI64; 2],
    overwrite_sample: AtomicI64,
    pending_overwrite: AtomicBool,
    overwrite_queued: AtomicBool,

    declick: DeclickAmp,
    /// Read offset into the buffers while fading out at zero speed
    declick_offs: AtomicUsize,
    need_butler: AtomicBool,

    active: AtomicBool,
    pending_active: AtomicBool,
    monitoring: AtomicU8,
    slaved: AtomicBool,
}

impl DiskReader {
    pub fn new(name: impl Into<String>, n_channels: usize, with_midi: bool, ctx: &DiskContext) -> Self {
        let config = ctx.config.clone();
        let channels = (0..n_channels)
            .map(|_| ReaderChannel::new(config.playback_buffer_samples, config.reservation_samples))
            .collect();
        let midi = with_midi.then(|| MidiPlaybackBuffer::new(config.midi_buffer_events));

        Self {
            name: name.into(),
            session: Arc::clone(&ctx.session),
            underrun: Arc::clone(&ctx.underrun),
            loop_location: Arc::clone(&ctx.loop_location),
            declick: DeclickAmp::with_coefficient(ctx.session.sample_rate(), config.declick_coefficient),
            buffer_samples: AtomicUsize::new(config.playback_buffer_samples),
            config,
            channels: RwLock::new(channels),
            playlist: RwLock::new(None),
            has_playlist: AtomicBool::new(false),
            midi_playlist: RwLock::new(None),
            has_midi_playlist: AtomicBool::new(false),
            midi,
            midi_counters: MidiCounters::new(),
            playback_sample: AtomicI64::new(0),
            file_sample: [AtomicI64::new(0), AtomicI64::new(0)],
            overwrite_sample: AtomicI64::new(0),
            pending_overwrite: AtomicBool::new(false),
            overwrite_queued: AtomicBool::new(false),
            declick_offs: AtomicUsize::new(0),
            need_butler: AtomicBool::new(false),
            active: AtomicBool::new(true),
            pending_active: AtomicBool::new(true),
            monitoring: AtomicU8::new(MonitorState::Disk as u8),
            slaved: AtomicBool::new(false),
        }
    }

    // ─── Accessors ─────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DiskConfig {
        &self.config
    }

    pub fn n_channels(&self) -> usize {
        self.channels.read().len()
    }

    pub fn has_midi(&self) -> bool {
        self.midi.is_some()
    }

    pub fn midi_counters(&self) -> &MidiCounters {
        &self.midi_counters
    }

    /// Events waiting in the MIDI playback ring
    pub fn midi_read_space(&self) -> usize {
        self.midi.as_ref().map_or(0, |m| m.read_space())
    }

    #[inline]
    pub fn playback_sample(&self) -> SamplePos {
        self.playback_sample.load(Ordering::Acquire)
    }

    #[inline]
    pub fn file_sample(&self, kind: DataType) -> SamplePos {
        self.file_sample[kind as usize].load(Ordering::Acquire)
    }

    #[inline]
    fn set_file_sample(&self, kind: DataType, pos: SamplePos) {
        self.file_sample[kind as usize].store(pos, Ordering::Release);
    }

    #[inline]
    pub fn pending_overwrite(&self) -> bool {
        self.pending_overwrite.load(Ordering::Acquire)
    }

    /// The playlist changed and buffered material is stale
    #[inline]
    pub fn overwrite_queued(&self) -> bool {
        self.overwrite_queued.load(Ordering::Acquire)
    }

    /// Last `run()` left the buffers wanting a refill
    #[inline]
    pub fn need_butler(&self) -> bool {
        self.need_butler.load(Ordering::Acquire)
    }

    pub fn declick_gain(&self) -> Gain {
        self.declick.gain()
    }

    /// A fade-out is still ramping down
    pub fn declick_in_progress(&self) -> bool {
        self.declick.in_progress()
    }

    pub fn set_monitoring(&self, state: MonitorState) {
        self.monitoring.store(state as u8, Ordering::Release);
    }

    pub fn monitoring(&self) -> MonitorState {
        MonitorState::from(self.monitoring.load(Ordering::Acquire))
    }

    /// Following an external clock: refills wait for half a buffer
    pub fn set_slaved(&self, slaved: bool) {
        self.slaved.store(slaved, Ordering::Release);
    }

    pub fn slaved(&self) -> bool {
        self.slaved.load(Ordering::Acquire)
    }

    /// Takes effect at the start of the next `run()`
    pub fn set_active(&self, active: bool) {
        self.pending_active.store(active, Ordering::Release);
    }

    pub fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Readable samples in `channel`'s buffer
    pub fn read_space(&self, channel: usize) -> Option<usize> {
        self.channels.read().get(channel).map(|c| c.rbuf.read_space())
    }

    /// Writable samples in `channel`'s buffer
    pub fn write_space(&self, channel: usize) -> Option<usize> {
        self.channels.read().get(channel).map(|c| c.rbuf.write_space())
    }

    /// Fill ratio of the emptiest channel, 1.0 when there are no channels
    pub fn buffer_load(&self) -> f32 {
        self.channels
            .read()
            .iter()
            .map(|c| (c.rbuf.read_space() as f64 / c.rbuf.bufsize() as f64) as f32)
            .fold(1.0, f32::min)
    }

    // ─── Playlists ─────────────────────────────────────────────────────────

    pub fn use_playlist(&self, playlist: Arc<dyn AudioPlaylist>) {
        let prior = self.playlist.write().replace(playlist).is_some();
        self.has_playlist.store(true, Ordering::Release);
        if prior {
            self.playlist_modified();
        }
    }

    pub fn use_midi_playlist(&self, playlist: Arc<dyn MidiPlaylist>) {
        let prior = self.midi_playlist.write().replace(playlist).is_some();
        self.has_midi_playlist.store(true, Ordering::Release);
        if prior {
            self.playlist_modified();
        }
    }

    pub fn playlist(&self) -> Option<Arc<dyn AudioPlaylist>> {
        self.playlist.read().clone()
    }

    pub fn midi_playlist(&self) -> Option<Arc<dyn MidiPlaylist>> {
        self.midi_playlist.read().clone()
    }

    /// Mark buffered material stale. The owner follows up with
    /// `set_pending_overwrite()` on the audio thread and an overwrite
    /// request to the butler.
    pub fn playlist_modified(&self) {
        if !self.overwrite_queued.swap(true, Ordering::AcqRel) {
            log::debug!("{}: playlist modified, overwrite queued", self.name);
        }
    }

    // ─── Channels / buffering ──────────────────────────────────────────────

    /// Add or drop channels. New channels start empty; the next locate
    /// fills them. Not for the audio thread.
    pub fn set_channel_count(&self, n: usize) {
        let size = self.buffer_samples.load(Ordering::Acquire);
        let reservation = self.config.reservation_samples;
        let mut channels = self.channels.write();
        channels.resize_with(n, || ReaderChannel::new(size, reservation));
        log::debug!("{}: {} channels", self.name, n);
    }

    /// Buffer size applied by the next `adjust_buffering()`
    pub fn set_buffer_size(&self, samples: usize) {
        self.buffer_samples.store(samples, Ordering::Release);
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_samples.load(Ordering::Acquire)
    }

    /// Reallocate every channel buffer at the configured size if it differs.
    /// Buffered material is discarded; the caller re-seeks afterwards.
    /// Returns whether anything was reallocated.
    pub fn adjust_buffering(&self) -> RfResult<bool> {
        let size = self.buffer_samples.load(Ordering::Acquire);
        if size <= self.config.chunk_samples * 2 {
            return Err(RfError::InvalidParam(format!(
                "{}: buffer size {} must exceed two chunks ({})",
                self.name,
                size,
                self.config.chunk_samples * 2
            )));
        }

        let reservation = self.config.reservation_samples;
        let mut channels = self.channels.write();
        let wanted = size.max(2).next_power_of_two();
        if channels.iter().all(|c| c.rbuf.bufsize() == wanted) {
            return Ok(false);
        }
        for chan in channels.iter_mut() {
            *chan = ReaderChannel::new(size, reservation);
        }
        log::info!("{}: playback buffers resized to {} samples", self.name, wanted);
        Ok(true)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PROCESS (audio thread)
    // ═══════════════════════════════════════════════════════════════════════

    /// Deliver one cycle of disk material into `bufs`.
    ///
    /// `start_sample..end_sample` is the stream-time window of this cycle,
    /// `speed` is -1, 0 or 1. With `result_required` false the buffers are
    /// consumed but outputs are left alone.
    pub fn run(
        &self,
        bufs: &mut BufferSet,
        start_sample: SamplePos,
        end_sample: SamplePos,
        speed: f64,
        nframes: usize,
        result_required: bool,
    ) {
        let pending_active = self.pending_active.load(Ordering::Acquire);
        if pending_active != self.active.load(Ordering::Relaxed) {
            self.active.store(pending_active, Ordering::Release);
        }
        if !pending_active {
            return;
        }

        debug_assert!(speed == -1.0 || speed == 0.0 || speed == 1.0);

        let nframes = nframes.min(bufs.max_frames());
        let mut ms = self.monitoring();
        let target_gain: Gain = if speed == 0.0 || !ms.disk() { 0.0 } else { 1.0 };

        if !self.config.use_transport_fades {
            self.declick.set_gain(target_gain);
        }

        if speed == 0.0 && ms == MonitorState::Disk && self.declick.gain() == target_gain {
            // stopped, no fade in progress
            return;
        }

        let still_locating = self.session.locate_pending() || self.pending_overwrite();
        let no_disk_output = self.session.no_disk_output();
        let disk_samples_to_consume = if speed == 0.0 { 0 } else { nframes };
        let mut result_required = result_required;

        let Some(channels) = self.channels.try_read() else {
            // channel set is being rebuilt
            bufs.silence(nframes);
            return;
        };

        if !channels.is_empty() {
            if self.declick.gain() != target_gain && target_gain == 0.0 {
                // fade-out: keep delivering disk material until silent
                ms = ms.with_disk();
                result_required = true;
            } else {
                self.declick_offs.store(0, Ordering::Relaxed);
            }

            if !result_required || !ms.disk() || still_locating || no_disk_output {
                if !still_locating || no_disk_output {
                    for chan in channels.iter() {
                        chan.rbuf.increment_read_ptr(disk_samples_to_consume);
                    }
                }
                if (still_locating || no_disk_output) && ms == MonitorState::Disk {
                    bufs.silence(nframes);
                }
            } else if !self.read_channels(
                &channels,
                bufs,
                start_sample,
                speed,
                nframes,
                disk_samples_to_consume,
                ms,
                target_gain,
            ) {
                return;
            }
        }

        if let Some(midi) = &self.midi {
            if ms.disk() && !still_locating {
                let midi_frames = (end_sample - start_sample).unsigned_abs() as usize;
                let (out, scratch) = bufs.split_midi();
                if no_disk_output || ms.input() {
                    scratch.clear();
                    self.get_midi_playback(midi, scratch, start_sample, midi_frames);
                    if !no_disk_output {
                        out.merge(scratch);
                    }
                } else {
                    self.get_midi_playback(midi, out, start_sample, midi_frames);
                }
            }
        }

        if !still_locating {
            let consumed = disk_samples_to_consume as SampleCnt;
            if speed < 0.0 {
                self.playback_sample.fetch_sub(consumed, Ordering::AcqRel);
            } else {
                self.playback_sample.fetch_add(consumed, Ordering::AcqRel);
            }

            let mut butler_required = false;

            if self.has_playlist.load(Ordering::Acquire) {
                if let Some(front) = channels.first() {
                    let write_space = front.rbuf.write_space();
                    butler_required = if self.slaved() {
                        write_space >= front.rbuf.bufsize() / 2
                    } else {
                        write_space >= self.config.chunk_samples
                    };
                }
            }

            if self.midi.is_some() && self.has_midi_playlist.load(Ordering::Acquire) {
                let ahead = self.midi_counters.lookahead();
                if ahead < 0 || ahead + consumed < self.config.midi_readahead as SampleCnt {
                    butler_required = true;
                }
            }

            self.need_butler.store(butler_required, Ordering::Release);
        }
    }

    /// Copy buffered audio into the outputs with declick and scaling.
    /// Returns false when the cycle was abandoned (underrun or unseekable
    /// position); outputs are silent then.
    fn read_channels(
        &self,
        channels: &[ReaderChannel],
        bufs: &mut BufferSet,
        start_sample: SamplePos,
        speed: f64,
        nframes: usize,
        disk_samples_to_consume: usize,
        ms: MonitorState,
        target_gain: Gain,
    ) -> bool {
        let n_buffers = bufs.n_audio();
        if n_buffers == 0 {
            for chan in channels {
                chan.rbuf.increment_read_ptr(disk_samples_to_consume);
            }
            return true;
        }

        let playback_sample = self.playback_sample();
        let distance = if start_sample != playback_sample && target_gain != 0.0 {
            start_sample - playback_sample
        } else {
            0
        };
        if distance != 0 && !self.channels_can_seek(channels, distance) {
            bufs.silence(nframes);
            return false;
        }

        // judged as if the seek had happened, so an underrun moves nothing
        let wanted = disk_samples_to_consume as SampleCnt;
        if wanted > 0
            && channels
                .iter()
                .any(|c| (c.rbuf.read_space() as SampleCnt) - distance < wanted)
        {
            self.underrun.raise();
            self.need_butler.store(true, Ordering::Release);
            bufs.silence(nframes);
            return false;
        }

        if distance != 0 {
            self.seek_channels(channels, distance);
        }

        let n_chans = channels.len();
        let scaling: Gain = if n_chans > n_buffers {
            n_buffers as Gain / n_chans as Gain
        } else {
            1.0
        };

        let g0 = self.declick.gain();
        let offs = self.declick_offs.load(Ordering::Relaxed);
        let mut g_end = g0;
        let mut fetched = 0;

        let (outputs, scratch) = bufs.split_audio();
        for (n, chan) in channels.iter().enumerate() {
            let out_idx = n % n_buffers;

            // input monitoring and folded channels mix in instead of replacing.
            // The scratch slot of the target output is free again once mixed.
            if ms.input() || n >= n_buffers {
                let disk_buf = &mut scratch[out_idx][..nframes];
                let (g, got) = self.fill_disk_buf(chan, disk_buf, speed, g0, target_gain, offs);
                apply_simple_gain(disk_buf, scaling);
                mix_buffers_no_gain(&mut outputs[out_idx][..nframes], disk_buf);
                g_end = g;
                fetched = fetched.max(got);
                continue;
            }

            let disk_buf = &mut outputs[out_idx][..nframes];
            let (g, got) = self.fill_disk_buf(chan, disk_buf, speed, g0, target_gain, offs);
            apply_simple_gain(disk_buf, scaling);
            g_end = g;
            fetched = fetched.max(got);
        }

        self.declick.set_gain(g_end);
        if fetched > 0 {
            self.declick_offs.store(offs + fetched, Ordering::Relaxed);
        }
        true
    }

    /// One channel's worth of disk material, ramped from `g0`.
    /// Returns the gain reached and how many samples were peeked ahead.
    fn fill_disk_buf(
        &self,
        chan: &ReaderChannel,
        disk_buf: &mut [Sample],
        speed: f64,
        g0: Gain,
        target_gain: Gain,
        offs: usize,
    ) -> (Gain, usize) {
        let mut fetched = 0;
        if speed != 0.0 {
            chan.rbuf.read(disk_buf);
        } else if g0 != target_gain {
            // stopped mid fade-out: look ahead without consuming
            let got = chan.rbuf.read_at(disk_buf, offs);
            disk_buf[got..].fill(0.0);
            fetched = got;
        }

        let g = self.declick.ramp(g0, disk_buf, target_gain);
        (g, fetched)
    }

    /// Move this cycle's events from the MIDI ring into `dst`, resolving
    /// sounding notes at the loop seam
    fn get_midi_playback(
        &self,
        midi: &MidiPlaybackBuffer,
        dst: &mut MidiBuffer,
        start_sample: SamplePos,
        nframes: usize,
    ) {
        let Some(mut reader) = midi.try_reader() else {
            return;
        };

        if nframes > 0 {
            let span = nframes as SampleCnt;
            let end_sample = start_sample + span;
            reader.skip_to(start_sample);

            match self.loop_location.region() {
                Some(lp) => {
                    let effective_start = lp.squish(start_sample);
                    if effective_start == lp.start {
                        reader.resolve_tracker(dst, 0);
                    }
                    if lp.end > effective_start && lp.end < effective_start + span {
                        let first = lp.end - effective_start;
                        reader.read(dst, start_sample, start_sample + first, 0);
                        reader.resolve_tracker(dst, first as u32);
                        reader.read(dst, start_sample + first, end_sample, first as u32);
                    } else {
                        reader.read(dst, start_sample, end_sample, 0);
                    }
                }
                None => {
                    reader.read(dst, start_sample, end_sample, 0);
                }
            }
        }

        self.midi_counters.add_read(nframes as u32);
    }
}

impl std::fmt::Debug for DiskReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskReader")
            .field("name", &self.name)
            .field("playback_sample", &self.playback_sample())
            .field("file_sample_audio", &self.file_sample(DataType::Audio))
            .field("pending_overwrite", &self.pending_overwrite())
            .finish_non_exhaustive()
    }
}
