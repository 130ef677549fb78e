//! Butler: background worker for disk I/O
//!
//! The audio thread never touches storage. When a track's buffers run low
//! it summons the butler, which refills every registered track. Transport
//! work (locates, overwrites, buffer resizes) is also done here and
//! reported back to the transport state machine as `ButlerDone`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::RwLock;

use rf_core::{RfError, RfResult, SamplePos};

use crate::buffers::RefillBuffers;
use crate::config::ButlerConfig;
use crate::disk_reader::DiskReader;
use crate::transport_fsm::{TransportEvent, TransportEventSender};

// ═══════════════════════════════════════════════════════════════════════════
// REQUESTS / STATS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButlerRequest {
    /// Refill whatever needs it
    Summon,
    /// Reposition every track
    Locate { target: SamplePos, complete_refill: bool },
    /// Rebuild buffers of tracks with a pending overwrite
    Overwrite,
    /// Apply new buffer sizes
    AdjustBuffering,
    Shutdown,
}

#[derive(Debug, Default)]
pub struct ButlerStats {
    /// Successful track refill passes
    pub refills: AtomicU64,
    pub seeks: AtomicU64,
    pub overwrites: AtomicU64,
    /// Failed refills, seeks and overwrites
    pub errors: AtomicU64,
}

impl ButlerStats {
    pub fn refills(&self) -> u64 {
        self.refills.load(Ordering::Relaxed)
    }

    pub fn seeks(&self) -> u64 {
        self.seeks.load(Ordering::Relaxed)
    }

    pub fn overwrites(&self) -> u64 {
        self.overwrites.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BUTLER
// ═══════════════════════════════════════════════════════════════════════════

pub struct Butler {
    tracks: Arc<RwLock<Vec<Arc<DiskReader>>>>,
    request_tx: Sender<ButlerRequest>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    stats: Arc<ButlerStats>,
}

impl Butler {
    /// Start the worker thread. Completed transport work is posted to
    /// `transport`.
    pub fn spawn(config: ButlerConfig, transport: TransportEventSender) -> RfResult<Self> {
        let (request_tx, request_rx) = bounded(config.request_queue_depth.max(1));
        let tracks = Arc::new(RwLock::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(ButlerStats::default());

        let worker = Worker {
            idle_timeout: Duration::from_millis(config.idle_timeout_ms.max(1)),
            max_refill_passes: config.max_refill_passes.max(1),
            tracks: Arc::clone(&tracks),
            request_tx: request_tx.clone(),
            transport,
            stats: Arc::clone(&stats),
            bufs: RefillBuffers::new(),
        };

        let thread_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("rf-butler".into())
            .spawn(move || worker.run(request_rx, thread_running))
            .map_err(|e| RfError::Thread(format!("butler spawn failed: {}", e)))?;

        log::info!("Butler thread started");

        Ok(Self {
            tracks,
            request_tx,
            running,
            thread: Some(handle),
            stats,
        })
    }

    pub fn add_track(&self, track: Arc<DiskReader>) {
        log::debug!("Butler: tracking {}", track.name());
        self.tracks.write().push(track);
    }

    pub fn remove_track(&self, name: &str) -> Option<Arc<DiskReader>> {
        let mut tracks = self.tracks.write();
        let idx = tracks.iter().position(|t| t.name() == name)?;
        Some(tracks.remove(idx))
    }

    pub fn track_count(&self) -> usize {
        self.tracks.read().len()
    }

    /// Ask for a refill pass. Audio-thread safe; false if the request
    /// queue is full.
    pub fn summon(&self) -> bool {
        self.request_tx.try_send(ButlerRequest::Summon).is_ok()
    }

    pub fn request_locate(&self, target: SamplePos, complete_refill: bool) -> bool {
        self.request(ButlerRequest::Locate {
            target,
            complete_refill,
        })
    }

    pub fn request_overwrite(&self) -> bool {
        self.request(ButlerRequest::Overwrite)
    }

    pub fn request_adjust_buffering(&self) -> bool {
        self.request(ButlerRequest::AdjustBuffering)
    }

    fn request(&self, req: ButlerRequest) -> bool {
        match self.request_tx.try_send(req) {
            Ok(()) => true,
            Err(_) => {
                log::warn!("Butler: request queue full, dropped {:?}", req);
                false
            }
        }
    }

    pub fn stats(&self) -> &ButlerStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.thread.is_some()
    }

    /// Stop and join the worker
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.request_tx.try_send(ButlerRequest::Shutdown);

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("Butler thread panicked");
            }
        }
    }
}

impl Drop for Butler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// WORKER
// ═══════════════════════════════════════════════════════════════════════════

struct Worker {
    idle_timeout: Duration,
    max_refill_passes: usize,
    tracks: Arc<RwLock<Vec<Arc<DiskReader>>>>,
    /// For re-summoning after a capped refill
    request_tx: Sender<ButlerRequest>,
    transport: TransportEventSender,
    stats: Arc<ButlerStats>,
    bufs: RefillBuffers,
}

impl Worker {
    fn run(mut self, request_rx: Receiver<ButlerRequest>, running: Arc<AtomicBool>) {
        while running.load(Ordering::Relaxed) {
            match request_rx.recv_timeout(self.idle_timeout) {
                Ok(ButlerRequest::Shutdown) => break,
                Ok(req) => self.handle(req),
                Err(RecvTimeoutError::Timeout) => {
                    if self.snapshot().iter().any(|t| t.need_butler()) {
                        self.refill_all();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        log::info!("Butler thread exiting");
    }

    fn snapshot(&self) -> Vec<Arc<DiskReader>> {
        self.tracks.read().clone()
    }

    fn handle(&mut self, req: ButlerRequest) {
        match req {
            ButlerRequest::Summon => self.refill_all(),
            ButlerRequest::Locate {
                target,
                complete_refill,
            } => {
                self.locate(target, complete_refill);
                self.transport_work_done();
            }
            ButlerRequest::Overwrite => {
                self.overwrite();
                self.transport_work_done();
            }
            ButlerRequest::AdjustBuffering => {
                self.adjust_buffering();
                self.transport_work_done();
            }
            ButlerRequest::Shutdown => {}
        }
    }

    fn transport_work_done(&self) {
        if !self.transport.post(TransportEvent::ButlerDone) {
            log::warn!("Butler: transport queue full, ButlerDone lost");
        }
    }

    fn refill_all(&mut self) {
        let tracks = self.snapshot();

        for _ in 0..self.max_refill_passes {
            let mut more = false;
            for track in &tracks {
                match track.refill(&mut self.bufs, 0) {
                    Ok(m) => {
                        more |= m;
                        self.stats.refills.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        self.stats.errors.fetch_add(1, Ordering::Relaxed);
                        log::error!("Butler: refill of {} failed: {}", track.name(), e);
                    }
                }
            }
            if !more {
                return;
            }
        }

        // still behind: let queued transport work in first
        let _ = self.request_tx.try_send(ButlerRequest::Summon);
    }

    fn locate(&mut self, target: SamplePos, complete_refill: bool) {
        for track in self.snapshot() {
            match track.seek_with_buffers(&mut self.bufs, target, complete_refill) {
                Ok(_) => {
                    self.stats.seeks.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    log::error!("Butler: seek of {} to {} failed: {}", track.name(), target, e);
                }
            }
        }
    }

    fn overwrite(&mut self) {
        for track in self.snapshot() {
            if !track.pending_overwrite() {
                continue;
            }
            match track.overwrite_existing_buffers() {
                Ok(()) => {
                    self.stats.overwrites.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    log::error!("Butler: overwrite of {} failed: {}", track.name(), e);
                }
            }
        }
    }

    fn adjust_buffering(&mut self) {
        for track in self.snapshot() {
            let result = track.adjust_buffering().and_then(|resized| {
                if resized {
                    track.seek_with_buffers(&mut self.bufs, track.playback_sample(), false)?;
                }
                Ok(())
            });
            if let Err(e) = result {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                log::error!("Butler: buffer adjustment of {} failed: {}", track.name(), e);
            }
        }
    }
}
