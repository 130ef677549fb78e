//! Transport state machine
//!
//! Decides what the transport does next for each request or completion
//! notice. The machine holds no I/O; every action is a call into a
//! `TransportApi` supplied at construction.
//!
//! ## States
//!
//! ```text
//! Stopped ──Start──► Rolling ──Stop/Locate──► DeclickOut ──DeclickDone──► Stopped
//!    │                  ▲                          │                    └────► Locating
//!    │ Locate           │ LocateDone (roll)        │ ButlerRequired
//!    ▼                  │                          ▼
//! Locating ─────────────┘◄───ButlerDone─────── ButlerWait
//! ```
//!
//! Start and Stop arriving in ButlerWait are queued and replayed once the
//! machine leaves it. Events without a rule for the current state are
//! ignored.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use rf_core::SamplePos;

/// Events the owning thread can hold before `post` starts dropping
pub const DEFAULT_EVENT_QUEUE_DEPTH: usize = 256;

// ═══════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stop {
    pub abort: bool,
    pub clear_state: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Locate {
    pub target: SamplePos,
    pub with_roll: bool,
    pub with_flush: bool,
    pub with_loop: bool,
    pub force: bool,
}

impl Locate {
    pub fn to(target: SamplePos) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Start,
    Stop(Stop),
    Locate(Locate),
    LocateDone,
    ButlerDone,
    ButlerRequired,
    DeclickDone,
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Start => write!(f, "Start"),
            TransportEvent::Stop(s) => write!(f, "Stop(abort={}, clear={})", s.abort, s.clear_state),
            TransportEvent::Locate(l) => write!(f, "Locate({}, roll={})", l.target, l.with_roll),
            TransportEvent::LocateDone => write!(f, "LocateDone"),
            TransportEvent::ButlerDone => write!(f, "ButlerDone"),
            TransportEvent::ButlerRequired => write!(f, "ButlerRequired"),
            TransportEvent::DeclickDone => write!(f, "DeclickDone"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Rolling,
    /// Fading out before a stop or locate
    DeclickOut,
    Locating,
    /// Waiting on the butler to finish transport work
    ButlerWait,
    /// Reserved for external-clock sync; ignores every event
    MasterWait,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Stopped => "Stopped",
            TransportState::Rolling => "Rolling",
            TransportState::DeclickOut => "DeclickOut",
            TransportState::Locating => "Locating",
            TransportState::ButlerWait => "ButlerWait",
            TransportState::MasterWait => "MasterWait",
        };
        f.write_str(name)
    }
}

/// Where the transport goes once the current declick or butler work ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Stop,
    Locate,
}

// ═══════════════════════════════════════════════════════════════════════════
// TRANSPORT API
// ═══════════════════════════════════════════════════════════════════════════

/// Actions the state machine drives
pub trait TransportApi {
    fn start_playback(&mut self);
    fn stop_playback(&mut self, abort: bool, clear_state: bool);
    /// Driven by `TransportFsm::begin_pending_locate`, not by the table
    fn start_locate(&mut self, locate: &Locate);
    fn butler_completed_transport_work(&mut self);
    fn schedule_butler_for_transport_work(&mut self);
    fn exit_declick(&mut self);
    fn locate_phase_two(&mut self, locate: &Locate);
    fn roll_after_locate(&mut self);

    /// Queried when a locate completes
    fn should_roll_after_locate(&self) -> bool {
        false
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STATE MACHINE
// ═══════════════════════════════════════════════════════════════════════════

pub struct TransportFsm<A: TransportApi> {
    api: A,
    state: TransportState,
    direction: Direction,
    /// Locate recorded by the last mark, consumed when locating begins
    pending_locate: Option<Locate>,
    last_locate: Locate,
    deferred: VecDeque<TransportEvent>,
}

impl<A: TransportApi> TransportFsm<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            state: TransportState::Stopped,
            direction: Direction::Stop,
            pending_locate: None,
            last_locate: Locate::default(),
            deferred: VecDeque::new(),
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn pending_locate(&self) -> Option<&Locate> {
        self.pending_locate.as_ref()
    }

    pub fn last_locate(&self) -> &Locate {
        &self.last_locate
    }

    /// Events waiting for the machine to leave ButlerWait
    pub fn deferred(&self) -> usize {
        self.deferred.len()
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    pub fn into_api(self) -> A {
        self.api
    }

    /// Apply everything posted to `queue` so far. Returns how many events
    /// were taken.
    pub fn drain(&mut self, queue: &TransportEventQueue) -> usize {
        let mut n = 0;
        while let Some(event) = queue.try_recv() {
            self.process_event(event);
            n += 1;
        }
        n
    }

    pub fn process_event(&mut self, event: TransportEvent) {
        if self.dispatch(event) {
            self.replay_deferred();
        }
    }

    fn replay_deferred(&mut self) {
        while self.state != TransportState::ButlerWait {
            let Some(event) = self.deferred.pop_front() else {
                break;
            };
            log::debug!("transport: replaying deferred {}", event);
            self.dispatch(event);
        }
    }

    /// Run one event through the table. Returns whether the state changed.
    fn dispatch(&mut self, event: TransportEvent) -> bool {
        use TransportEvent as E;
        use TransportState as S;

        let from = self.state;
        let to = match (from, event) {
            (S::Stopped, E::Start) => {
                self.api.start_playback();
                S::Rolling
            }
            (S::Stopped, E::Stop(_)) => S::Stopped,
            (S::Stopped, E::Locate(l)) => {
                self.mark_for_locate(l);
                S::Locating
            }
            (S::Stopped, E::ButlerDone) => {
                self.api.butler_completed_transport_work();
                S::Stopped
            }
            (S::Stopped, E::ButlerRequired) => {
                self.api.schedule_butler_for_transport_work();
                S::ButlerWait
            }

            (S::Rolling, E::Stop(s)) => {
                self.mark_for_stop(s);
                S::DeclickOut
            }
            (S::Rolling, E::Start) => S::Rolling,
            (S::Rolling, E::Locate(l)) => {
                self.mark_for_locate(l);
                S::DeclickOut
            }
            (S::Rolling, E::ButlerDone) => S::Rolling,

            (S::DeclickOut, E::DeclickDone) => {
                self.api.exit_declick();
                match self.direction {
                    Direction::Locate => S::Locating,
                    Direction::Stop => S::Stopped,
                }
            }
            (S::DeclickOut, E::ButlerRequired) => {
                self.api.schedule_butler_for_transport_work();
                S::ButlerWait
            }
            (S::DeclickOut, E::Locate(l)) | (S::ButlerWait, E::Locate(l)) => {
                self.remember_locate(l);
                from
            }

            (S::Locating, E::LocateDone) => {
                if self.api.should_roll_after_locate() {
                    self.api.roll_after_locate();
                    S::Rolling
                } else {
                    S::Stopped
                }
            }
            (S::Locating, E::Stop(s)) => {
                self.api.stop_playback(s.abort, s.clear_state);
                S::Stopped
            }
            (S::Locating, E::Start) => S::Rolling,
            // kept as observed: a second locate while locating rolls
            (S::Locating, E::Locate(_)) => S::Rolling,
            (S::Locating, E::ButlerDone) => S::Locating,
            (S::Locating, E::ButlerRequired) => {
                self.api.schedule_butler_for_transport_work();
                S::ButlerWait
            }

            (S::ButlerWait, E::ButlerDone) => match self.direction {
                Direction::Stop => {
                    self.api.butler_completed_transport_work();
                    S::Stopped
                }
                Direction::Locate => {
                    let locate = self.pending_locate.take().unwrap_or(self.last_locate);
                    self.api.locate_phase_two(&locate);
                    S::Locating
                }
            },
            (S::ButlerWait, E::Start) | (S::ButlerWait, E::Stop(_)) => {
                log::debug!("transport: deferring {} in {}", event, from);
                self.deferred.push_back(event);
                S::ButlerWait
            }
            (S::ButlerWait, E::ButlerRequired) => {
                self.api.schedule_butler_for_transport_work();
                S::ButlerWait
            }

            _ => {
                log::trace!("transport: ignoring {} in {}", event, from);
                return false;
            }
        };

        if to == from {
            return false;
        }

        self.state = to;
        if matches!(to, S::Stopped | S::Rolling) {
            self.direction = Direction::Stop;
            self.pending_locate = None;
        }
        log::debug!("transport: {} + {} -> {}", from, event, to);
        true
    }

    fn remember_locate(&mut self, locate: Locate) {
        self.direction = Direction::Locate;
        self.pending_locate = Some(locate);
        self.last_locate = locate;
    }

    fn mark_for_locate(&mut self, locate: Locate) {
        self.remember_locate(locate);
        self.api.stop_playback(false, false);
    }

    fn mark_for_stop(&mut self, stop: Stop) {
        self.direction = Direction::Stop;
        self.api.stop_playback(stop.abort, stop.clear_state);
    }

    /// Consume the pending locate and hand it to `start_locate`. The owner
    /// calls this once the machine has entered Locating from Stopped or
    /// DeclickOut. False when nothing was pending.
    pub fn begin_pending_locate(&mut self) -> bool {
        if self.state != TransportState::Locating {
            return false;
        }
        match self.pending_locate.take() {
            Some(locate) => {
                self.api.start_locate(&locate);
                true
            }
            None => false,
        }
    }
}

impl<A: TransportApi> fmt::Debug for TransportFsm<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportFsm")
            .field("state", &self.state)
            .field("direction", &self.direction)
            .field("pending_locate", &self.pending_locate)
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// EVENT QUEUE
// ═══════════════════════════════════════════════════════════════════════════

/// Events posted from other threads, applied by the state machine's owner
#[derive(Debug)]
pub struct TransportEventQueue {
    tx: Sender<TransportEvent>,
    rx: Receiver<TransportEvent>,
    dropped: Arc<AtomicU64>,
}

impl TransportEventQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn sender(&self) -> TransportEventSender {
        TransportEventSender {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }

    pub fn try_recv(&self) -> Option<TransportEvent> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Events lost to a full queue
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for TransportEventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_QUEUE_DEPTH)
    }
}

/// Posting side of a `TransportEventQueue`. Never blocks.
#[derive(Debug, Clone)]
pub struct TransportEventSender {
    tx: Sender<TransportEvent>,
    dropped: Arc<AtomicU64>,
}

impl TransportEventSender {
    /// Queue `event`. False if the queue was full or its owner is gone.
    pub fn post(&self, event: TransportEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingApi {
        starts: usize,
        stops: usize,
        locates: Vec<SamplePos>,
        roll: bool,
    }

    impl TransportApi for CountingApi {
        fn start_playback(&mut self) {
            self.starts += 1;
        }
        fn stop_playback(&mut self, _abort: bool, _clear_state: bool) {
            self.stops += 1;
        }
        fn start_locate(&mut self, locate: &Locate) {
            self.locates.push(locate.target);
        }
        fn butler_completed_transport_work(&mut self) {}
        fn schedule_butler_for_transport_work(&mut self) {}
        fn exit_declick(&mut self) {}
        fn locate_phase_two(&mut self, _locate: &Locate) {}
        fn roll_after_locate(&mut self) {}
        fn should_roll_after_locate(&self) -> bool {
            self.roll
        }
    }

    #[test]
    fn test_initial_state() {
        let fsm = TransportFsm::new(CountingApi::default());
        assert_eq!(fsm.state(), TransportState::Stopped);
        assert_eq!(fsm.direction(), Direction::Stop);
        assert!(fsm.pending_locate().is_none());
    }

    #[test]
    fn test_stop_roll_stop_cycle() {
        let mut fsm = TransportFsm::new(CountingApi::default());
        fsm.process_event(TransportEvent::Start);
        assert_eq!(fsm.state(), TransportState::Rolling);

        fsm.process_event(TransportEvent::Stop(Stop::default()));
        assert_eq!(fsm.state(), TransportState::DeclickOut);

        fsm.process_event(TransportEvent::DeclickDone);
        assert_eq!(fsm.state(), TransportState::Stopped);
        assert_eq!(fsm.api().starts, 1);
        assert_eq!(fsm.api().stops, 1);
    }

    #[test]
    fn test_locate_from_rolling_goes_through_declick() {
        let mut fsm = TransportFsm::new(CountingApi {
            roll: true,
            ..Default::default()
        });
        fsm.process_event(TransportEvent::Start);
        fsm.process_event(TransportEvent::Locate(Locate::to(48000)));
        assert_eq!(fsm.state(), TransportState::DeclickOut);
        assert!(fsm.api().locates.is_empty());

        fsm.process_event(TransportEvent::DeclickDone);
        assert_eq!(fsm.state(), TransportState::Locating);
        assert!(fsm.api().locates.is_empty());
        assert_eq!(fsm.pending_locate().map(|l| l.target), Some(48000));

        assert!(fsm.begin_pending_locate());
        assert_eq!(fsm.api().locates, vec![48000]);
        assert!(fsm.pending_locate().is_none());
        assert!(!fsm.begin_pending_locate());

        fsm.process_event(TransportEvent::LocateDone);
        assert_eq!(fsm.state(), TransportState::Rolling);
    }

    #[test]
    fn test_master_wait_ignores_events() {
        let mut fsm = TransportFsm::new(CountingApi::default());
        fsm.state = TransportState::MasterWait;
        fsm.process_event(TransportEvent::Start);
        fsm.process_event(TransportEvent::ButlerRequired);
        assert_eq!(fsm.state(), TransportState::MasterWait);
        assert_eq!(fsm.api().starts, 0);
    }

    #[test]
    fn test_queue_drops_when_full() {
        let queue = TransportEventQueue::new(2);
        let tx = queue.sender();
        assert!(tx.post(TransportEvent::Start));
        assert!(tx.post(TransportEvent::ButlerDone));
        assert!(!tx.post(TransportEvent::LocateDone));
        assert_eq!(queue.dropped(), 1);

        let mut fsm = TransportFsm::new(CountingApi::default());
        assert_eq!(fsm.drain(&queue), 2);
        assert!(queue.is_empty());
        assert_eq!(fsm.state(), TransportState::Rolling);
    }
}
