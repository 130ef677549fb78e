//! Butler Integration Tests
//!
//! Tests for:
//! - Locate requests filling every track and reporting ButlerDone
//! - Summoned refills after the audio thread consumed material
//! - Overwrite of tracks with a pending request
//! - Buffer resizing
//! - Error accounting on storage failures

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rf_core::{Gain, RfError, RfResult, Sample, SampleCnt, SamplePos};
use rf_transport::{
    AudioPlaylist, BufferSet, Butler, ButlerConfig, DataType, DiskConfig, DiskContext, DiskReader,
    MemoryPlaylist, TransportEvent, TransportEventQueue,
};

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

const BLOCK: usize = 256;
const WAIT: Duration = Duration::from_secs(2);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn context() -> DiskContext {
    init_logging();
    let ctx = DiskContext::new(
        48000,
        DiskConfig {
            chunk_samples: 1024,
            playback_buffer_samples: 16384,
            reservation_samples: 0,
            use_transport_fades: false,
            ..DiskConfig::default()
        },
    );
    ctx.session.set_transport_speed(1.0);
    ctx
}

fn butler_config() -> ButlerConfig {
    ButlerConfig {
        idle_timeout_ms: 5,
        ..ButlerConfig::default()
    }
}

fn track(ctx: &DiskContext, name: &str, offset: f32) -> Arc<DiskReader> {
    let reader = DiskReader::new(name, 1, false, ctx);
    reader.use_playlist(Arc::new(MemoryPlaylist::from_fn(1, 100_000, move |_, i| {
        i as Sample + offset
    })));
    Arc::new(reader)
}

fn wait_for_done(queue: &TransportEventQueue) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if queue.try_recv() == Some(TransportEvent::ButlerDone) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

fn run_forward(reader: &DiskReader, bufs: &mut BufferSet) {
    let start = reader.playback_sample();
    reader.run(bufs, start, start + BLOCK as SamplePos, 1.0, BLOCK, true);
}

struct FlakyPlaylist {
    inner: MemoryPlaylist,
    failing: AtomicUsize,
}

impl AudioPlaylist for FlakyPlaylist {
    fn n_channels(&self) -> usize {
        self.inner.n_channels()
    }

    fn length(&self) -> SampleCnt {
        self.inner.length()
    }

    fn read(
        &self,
        sum: &mut [Sample],
        mixdown: &mut [Sample],
        gain: &mut [Gain],
        start: SamplePos,
        cnt: SampleCnt,
        channel: usize,
    ) -> RfResult<SampleCnt> {
        if self.failing.load(Ordering::Relaxed) != 0 {
            return Err(RfError::StorageRead {
                position: start,
                count: cnt,
                reason: "injected".into(),
            });
        }
        self.inner.read(sum, mixdown, gain, start, cnt, channel)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOCATE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_locate_fills_every_track() {
    let ctx = context();
    let queue = TransportEventQueue::default();
    let butler = Butler::spawn(butler_config(), queue.sender()).unwrap();
    let a = track(&ctx, "a", 0.0);
    let b = track(&ctx, "b", 0.5);
    butler.add_track(Arc::clone(&a));
    butler.add_track(Arc::clone(&b));

    assert!(butler.request_locate(5000, true));
    assert!(wait_for_done(&queue));

    for t in [&a, &b] {
        assert_eq!(t.read_space(0), Some(16383));
        assert_eq!(t.playback_sample(), 5000);
        assert_eq!(t.file_sample(DataType::Audio), 5000 + 16383);
    }
    assert_eq!(butler.stats().seeks(), 2);
    assert_eq!(butler.stats().errors(), 0);

    let mut bufs = BufferSet::new(1, BLOCK);
    run_forward(&b, &mut bufs);
    assert_eq!(bufs.audio(0)[0], 5000.5);
}

#[test]
fn test_partial_locate_leaves_work_for_refill() {
    let ctx = context();
    let queue = TransportEventQueue::default();
    let butler = Butler::spawn(butler_config(), queue.sender()).unwrap();
    let a = track(&ctx, "a", 0.0);
    butler.add_track(Arc::clone(&a));

    assert!(butler.request_locate(0, false));
    assert!(wait_for_done(&queue));
    assert_eq!(butler.stats().seeks(), 1);
    assert!(a.read_space(0).unwrap() >= 16383 - 1024);
}

// ═══════════════════════════════════════════════════════════════════════════════
// REFILL
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_summon_refills_after_consumption() {
    let ctx = context();
    let queue = TransportEventQueue::default();
    // no idle wake-ups: only the summon refills
    let config = ButlerConfig {
        idle_timeout_ms: 60_000,
        ..ButlerConfig::default()
    };
    let butler = Butler::spawn(config, queue.sender()).unwrap();
    let a = track(&ctx, "a", 0.0);
    butler.add_track(Arc::clone(&a));
    butler.request_locate(0, true);
    assert!(wait_for_done(&queue));

    let mut bufs = BufferSet::new(1, BLOCK);
    for _ in 0..8 {
        run_forward(&a, &mut bufs);
    }
    assert!(a.need_butler());
    assert_eq!(a.write_space(0), Some(8 * BLOCK));
    assert!(butler.summon());

    assert!(wait_until(|| a.read_space(0) == Some(16383)));
    assert!(butler.stats().refills() >= 1);
    assert_eq!(a.file_sample(DataType::Audio), 16383 + 8 * BLOCK as SamplePos);

    // refill work never reports transport completion
    assert!(queue.is_empty());

    run_forward(&a, &mut bufs);
    assert_eq!(bufs.audio(0)[0], (8 * BLOCK) as Sample);
}

#[test]
fn test_idle_wakeup_refills_without_summon() {
    let ctx = context();
    let queue = TransportEventQueue::default();
    let butler = Butler::spawn(butler_config(), queue.sender()).unwrap();
    let a = track(&ctx, "a", 0.0);
    butler.add_track(Arc::clone(&a));
    butler.request_locate(0, true);
    assert!(wait_for_done(&queue));

    let mut bufs = BufferSet::new(1, BLOCK);
    for _ in 0..4 {
        run_forward(&a, &mut bufs);
    }
    assert!(wait_until(|| a.read_space(0) == Some(16383)));
}

// ═══════════════════════════════════════════════════════════════════════════════
// OVERWRITE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_overwrite_only_touches_pending_tracks() {
    let ctx = context();
    let queue = TransportEventQueue::default();
    let butler = Butler::spawn(butler_config(), queue.sender()).unwrap();
    let a = track(&ctx, "a", 0.0);
    let b = track(&ctx, "b", 0.0);
    butler.add_track(Arc::clone(&a));
    butler.add_track(Arc::clone(&b));
    butler.request_locate(1000, true);
    assert!(wait_for_done(&queue));

    a.use_playlist(Arc::new(MemoryPlaylist::from_fn(1, 100_000, |_, i| {
        -(i as Sample)
    })));
    assert!(a.overwrite_queued());
    a.set_pending_overwrite();

    assert!(butler.request_overwrite());
    assert!(wait_for_done(&queue));

    assert!(!a.pending_overwrite());
    assert_eq!(butler.stats().overwrites(), 1);
    assert_eq!(a.read_space(0), Some(16383));
    assert_eq!(b.read_space(0), Some(16383));

    let mut bufs = BufferSet::new(1, BLOCK);
    run_forward(&a, &mut bufs);
    assert_eq!(bufs.audio(0)[0], -1000.0);
    run_forward(&b, &mut bufs);
    assert_eq!(bufs.audio(0)[0], 1000.0);
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUFFER ADJUSTMENT
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_adjust_buffering_resizes_and_reseeks() {
    let ctx = context();
    let queue = TransportEventQueue::default();
    let butler = Butler::spawn(butler_config(), queue.sender()).unwrap();
    let a = track(&ctx, "a", 0.0);
    butler.add_track(Arc::clone(&a));
    butler.request_locate(2000, true);
    assert!(wait_for_done(&queue));

    a.set_buffer_size(8192);
    assert!(butler.request_adjust_buffering());
    assert!(wait_for_done(&queue));

    assert_eq!(a.playback_sample(), 2000);
    assert_eq!(a.read_space(0), Some(8191 - 1024));
    assert_eq!(a.write_space(0), Some(1024));
    assert_eq!(butler.stats().errors(), 0);
}

#[test]
fn test_adjust_buffering_rejects_tiny_buffers() {
    let ctx = context();
    let queue = TransportEventQueue::default();
    let butler = Butler::spawn(butler_config(), queue.sender()).unwrap();
    let a = track(&ctx, "a", 0.0);
    butler.add_track(Arc::clone(&a));

    a.set_buffer_size(2048);
    butler.request_adjust_buffering();
    assert!(wait_for_done(&queue));
    assert_eq!(butler.stats().errors(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAILURES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_failed_locate_counts_error_and_still_completes() {
    let ctx = context();
    let queue = TransportEventQueue::default();
    let butler = Butler::spawn(butler_config(), queue.sender()).unwrap();

    let playlist = Arc::new(FlakyPlaylist {
        inner: MemoryPlaylist::from_fn(1, 100_000, |_, i| i as Sample),
        failing: AtomicUsize::new(1),
    });
    let reader = DiskReader::new("flaky", 1, false, &ctx);
    reader.use_playlist(playlist.clone());
    let reader = Arc::new(reader);
    butler.add_track(Arc::clone(&reader));

    butler.request_locate(0, true);
    assert!(wait_for_done(&queue));
    assert_eq!(butler.stats().errors(), 1);
    assert_eq!(butler.stats().seeks(), 0);
    assert_eq!(reader.read_space(0), Some(0));

    playlist.failing.store(0, Ordering::Relaxed);
    butler.request_locate(0, true);
    assert!(wait_for_done(&queue));
    assert_eq!(butler.stats().seeks(), 1);
    assert_eq!(reader.read_space(0), Some(16383));
}

#[test]
fn test_remove_track_stops_servicing_it() {
    let ctx = context();
    let queue = TransportEventQueue::default();
    let mut butler = Butler::spawn(butler_config(), queue.sender()).unwrap();
    let a = track(&ctx, "a", 0.0);
    butler.add_track(Arc::clone(&a));
    assert!(butler.remove_track("a").is_some());

    butler.request_locate(3000, true);
    assert!(wait_for_done(&queue));
    assert_eq!(a.read_space(0), Some(0));
    assert_eq!(butler.stats().seeks(), 0);

    butler.shutdown();
    assert!(!butler.is_running());
}
