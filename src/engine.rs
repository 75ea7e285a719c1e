//! Reorder engine entry points and delivery dispatch.
//!
//! The engine owns the session pool, the `(peer, tid) -> slot` table, and
//! the delivery queue. The MAC RX path calls [`ReorderEngine::frame_in`]
//! for every received data frame; the Block-Ack control handler calls
//! [`ReorderEngine::start_session`] / [`ReorderEngine::stop_session`] on
//! ADDBA/DELBA and [`ReorderEngine::scroll`] on BAR or BA-error events; the
//! aging timers fire on their own tasks.
//!
//! Locking discipline: the table lock and the pool's bitmap lock are held
//! only for lookups and claim/release; each session's own lock is held
//! across the whole of `frame_in`, a timer fire, and `stop` for that
//! session, leaving unrelated sessions fully concurrent. Released frames
//! are pushed onto the delivery queue before the session lock is dropped,
//! so batches from concurrent callers on one session reach the queue in
//! window order; the push never blocks, and the dispatch task calls the
//! sink with no engine lock held at all, so sink-side locking cannot
//! invert against the engine.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::frame::{OwnedFrame, SessionKey};
use crate::pool::{SessionHandle, SessionPool, SlotState};
use crate::seq::SequenceNum;
use crate::session::{EngineError, ReorderSession, SessionStats};
use crate::timer::AgingTimer;

/// Upper-layer delivery target.
///
/// Called by the dispatch task only, never under a session lock, so
/// implementations are free to take their own locks.
pub trait FrameSink: Send + Sync + 'static {
    /// Hand one in-order frame to the upper layer.
    fn deliver(&self, frame: OwnedFrame);
}

/// State shared between the engine handle, its timer tasks, and the
/// dispatch task.
struct Shared {
    config: EngineConfig,
    pool: SessionPool,
    table: Mutex<HashMap<SessionKey, SessionHandle>>,
    delivery_tx: mpsc::UnboundedSender<OwnedFrame>,
}

impl Shared {
    async fn lookup(&self, key: &SessionKey) -> Option<SessionHandle> {
        self.table.lock().await.get(key).copied()
    }

    /// Queue released frames for the dispatch task. The channel send never
    /// blocks, so this is called while the session lock is still held: a
    /// later batch for the same session can then never overtake an earlier
    /// one on its way to the queue.
    fn push_released(&self, released: Vec<OwnedFrame>) {
        for frame in released {
            if self.delivery_tx.send(frame).is_err() {
                warn!("delivery queue closed, dropping released frames");
                break;
            }
        }
    }

    /// Arm the aging timer when frames are buffered, cancel it when the
    /// buffer is empty. Runs under the session lock after every mutation.
    fn reconcile_timer(self: &Arc<Self>, state: &mut SlotState, handle: SessionHandle) {
        if state.session.occupied() > 0 {
            if state.timer.is_none() {
                state.timer_epoch += 1;
                let epoch = state.timer_epoch;
                let shared = Arc::clone(self);
                state.timer = Some(AgingTimer::arm(
                    self.config.aging_timeout,
                    epoch,
                    async move { shared.aging_fire(handle, epoch).await },
                ));
            }
        } else {
            state.timer = None;
        }
    }

    async fn aging_fire(self: Arc<Self>, handle: SessionHandle, epoch: u64) {
        let mut released = Vec::new();
        let slot = self.pool.slot(handle.index());
        let mut state = slot.state.lock().await;
        // A fire that lost the race against cancellation or slot reuse
        // must not touch the session.
        if slot.generation() != handle.generation()
            || state.timer.as_ref().map(AgingTimer::epoch) != Some(epoch)
        {
            return;
        }
        state.timer = None;
        if !state.session.is_active() {
            return;
        }
        state.session.aging_timeout(&mut released);
        if let Some(key) = state.owner {
            debug!(
                "aging timeout on reorder session {}: released {} frame(s)",
                key,
                released.len()
            );
        }
        self.reconcile_timer(&mut state, handle);
        self.push_released(released);
    }

    async fn start_session(
        self: &Arc<Self>,
        key: SessionKey,
        capacity: u16,
        start_sn: SequenceNum,
    ) -> Result<(), EngineError> {
        ReorderSession::validate_params(capacity, start_sn)?;
        let mut released = Vec::new();
        let mut table = self.table.lock().await;
        match table.get(&key).copied() {
            Some(handle) => {
                let slot = self.pool.slot(handle.index());
                let mut state = slot.state.lock().await;
                if state.session.has_params(capacity, start_sn) {
                    // ADDBA retransmission: keep the window as-is.
                    debug!("reorder session {} restart ignored", key);
                    Ok(())
                } else {
                    debug!(
                        "reorder session {} reinitialized (capacity={}, start_sn={})",
                        key, capacity, start_sn
                    );
                    state.timer = None;
                    let result = state.session.start(capacity, start_sn, &mut released);
                    self.push_released(released);
                    result
                }
            }
            None => {
                let handle = self.pool.acquire()?;
                let slot = self.pool.slot(handle.index());
                let mut state = slot.state.lock().await;
                state.session = ReorderSession::new(key.tid);
                state.owner = Some(key);
                state.timer = None;
                let result = state.session.start(capacity, start_sn, &mut released);
                table.insert(key, handle);
                debug!(
                    "reorder session {} started (capacity={}, start_sn={}, slot={})",
                    key,
                    capacity,
                    start_sn,
                    handle.index()
                );
                self.push_released(released);
                result
            }
        }
    }

    async fn frame_in(
        self: &Arc<Self>,
        key: SessionKey,
        sn: SequenceNum,
        frame: OwnedFrame,
    ) -> Result<(), EngineError> {
        let Some(handle) = self.lookup(&key).await else {
            return Err(EngineError::NotActive);
        };
        let mut released = Vec::new();
        let slot = self.pool.slot(handle.index());
        let mut state = slot.state.lock().await;
        if slot.generation() != handle.generation() || !state.session.is_active() {
            return Err(EngineError::NotActive);
        }
        let result = state.session.frame_in(sn, frame, &mut released);
        if result.is_ok() {
            self.reconcile_timer(&mut state, handle);
        }
        self.push_released(released);
        result
    }

    async fn stop_session(&self, key: SessionKey, flush: bool) -> Result<(), EngineError> {
        // Removing the table entry first means no new frames can route to
        // the slot while it is being torn down.
        let handle = {
            let mut table = self.table.lock().await;
            table.remove(&key).ok_or(EngineError::NotActive)?
        };
        let mut released = Vec::new();
        let result = {
            let slot = self.pool.slot(handle.index());
            let mut state = slot.state.lock().await;
            state.timer = None;
            state.owner = None;
            let result = state.session.stop(flush, &mut released);
            self.push_released(released);
            result
        };
        self.pool.release(handle);
        debug!("reorder session {} stopped (flush={})", key, flush);
        result
    }

    async fn scroll(
        self: &Arc<Self>,
        key: SessionKey,
        new_sn: SequenceNum,
    ) -> Result<(), EngineError> {
        let Some(handle) = self.lookup(&key).await else {
            return Err(EngineError::NotActive);
        };
        let mut released = Vec::new();
        let slot = self.pool.slot(handle.index());
        let mut state = slot.state.lock().await;
        if slot.generation() != handle.generation() || !state.session.is_active() {
            return Err(EngineError::NotActive);
        }
        let result = state.session.scroll(new_sn, &mut released);
        if result.is_ok() {
            self.reconcile_timer(&mut state, handle);
        }
        self.push_released(released);
        result
    }

    async fn session_stats(&self, key: SessionKey) -> Option<SessionStats> {
        let handle = self.lookup(&key).await?;
        let slot = self.pool.slot(handle.index());
        let state = slot.state.lock().await;
        Some(state.session.stats())
    }
}

/// Receive-side Block-Ack reorder engine.
///
/// Construct with [`ReorderEngine::new`] inside a tokio runtime; the
/// engine spawns its dispatch task immediately. Dropping the engine shuts
/// the dispatch task down; frames still queued at that point are discarded.
pub struct ReorderEngine {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    _dispatch: tokio::task::JoinHandle<()>,
}

impl ReorderEngine {
    /// Create an engine delivering in-order frames to `sink`.
    pub fn new(config: EngineConfig, sink: Arc<dyn FrameSink>) -> Result<Self, EngineError> {
        config.validate()?;
        let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel::<OwnedFrame>();
        let cancel = CancellationToken::new();
        let dispatch_cancel = cancel.clone();
        let dispatch = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = dispatch_cancel.cancelled() => break,
                    frame = delivery_rx.recv() => match frame {
                        Some(frame) => sink.deliver(frame),
                        None => break,
                    },
                }
            }
        });
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                pool: SessionPool::new(config.max_sessions),
                table: Mutex::new(HashMap::new()),
                delivery_tx,
            }),
            cancel,
            _dispatch: dispatch,
        })
    }

    /// Start (or restart) the Block-Ack session for `key`.
    ///
    /// Fails with [`EngineError::InvalidParameter`] for a zero or oversized
    /// window, and with [`EngineError::PoolExhausted`] when no session slot
    /// is free; the caller should then deny the ADDBA and fall back to
    /// unordered delivery for that peer/TID.
    pub async fn start_session(
        &self,
        key: SessionKey,
        capacity: u16,
        start_sn: SequenceNum,
    ) -> Result<(), EngineError> {
        self.shared.start_session(key, capacity, start_sn).await
    }

    /// Feed one received data frame through the session for `key`.
    ///
    /// Any frames that become deliverable are queued for the sink in order.
    /// Fails with [`EngineError::NotActive`] when no session exists; the RX
    /// path is expected to log and continue.
    pub async fn frame_in(
        &self,
        key: SessionKey,
        sn: SequenceNum,
        frame: OwnedFrame,
    ) -> Result<(), EngineError> {
        self.shared.frame_in(key, sn, frame).await
    }

    /// Tear down the session for `key`, discarding buffered frames when
    /// `flush` is set and delivering them best-effort otherwise.
    ///
    /// The aging timer is cancelled before the slot returns to the pool; a
    /// fire already in flight is neutralized by the slot generation check,
    /// so it can never touch the slot's next occupant.
    pub async fn stop_session(&self, key: SessionKey, flush: bool) -> Result<(), EngineError> {
        self.shared.stop_session(key, flush).await
    }

    /// Authoritatively move the window head for `key` to `new_sn` (BAR or
    /// Block-Ack error event). A `new_sn` behind the window is ignored.
    pub async fn scroll(&self, key: SessionKey, new_sn: SequenceNum) -> Result<(), EngineError> {
        self.shared.scroll(key, new_sn).await
    }

    /// Snapshot the counters of the session for `key`, if one is active.
    pub async fn session_stats(&self, key: SessionKey) -> Option<SessionStats> {
        self.shared.session_stats(key).await
    }

    /// Number of currently active sessions.
    pub async fn active_sessions(&self) -> usize {
        self.shared.table.lock().await.len()
    }
}

impl Drop for ReorderEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MacAddr;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Sink that records delivered frames for later inspection.
    #[derive(Default)]
    struct CollectSink {
        frames: StdMutex<Vec<OwnedFrame>>,
    }

    impl FrameSink for CollectSink {
        fn deliver(&self, frame: OwnedFrame) {
            self.frames.lock().unwrap().push(frame);
        }
    }

    impl CollectSink {
        fn sns(&self) -> Vec<u16> {
            self.frames
                .lock()
                .unwrap()
                .iter()
                .map(|fr| u16::from_be_bytes([fr.payload()[0], fr.payload()[1]]))
                .collect()
        }
    }

    fn f(sn: u16) -> OwnedFrame {
        OwnedFrame::new(sn.to_be_bytes().to_vec())
    }

    fn key(n: u8) -> SessionKey {
        SessionKey::new(MacAddr::new([n, 0, 0, 0, 0, n]), 0)
    }

    fn engine_with(config: EngineConfig) -> (ReorderEngine, Arc<CollectSink>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let sink = Arc::new(CollectSink::default());
        let engine = ReorderEngine::new(config, sink.clone()).unwrap();
        (engine, sink)
    }

    fn engine() -> (ReorderEngine, Arc<CollectSink>) {
        engine_with(EngineConfig::default())
    }

    /// Let the dispatch task drain and any due timers fire. The paused
    /// clock auto-advances only when every task is idle, so one short sleep
    /// is enough.
    async fn drain() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn in_order_catch_up_reaches_sink_in_sequence() {
        let (engine, sink) = engine();
        let k = key(1);
        engine.start_session(k, 4, 0).await.unwrap();

        engine.frame_in(k, 0, f(0)).await.unwrap();
        engine.frame_in(k, 2, f(2)).await.unwrap();
        engine.frame_in(k, 3, f(3)).await.unwrap();
        engine.frame_in(k, 1, f(1)).await.unwrap();
        drain().await;

        assert_eq!(sink.sns(), vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn aging_timeout_forces_progress() {
        let (engine, sink) = engine();
        let k = key(1);
        engine.start_session(k, 4, 0).await.unwrap();

        // sn 0 is lost for good.
        engine.frame_in(k, 1, f(1)).await.unwrap();
        engine.frame_in(k, 2, f(2)).await.unwrap();
        drain().await;
        assert!(sink.sns().is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sink.sns(), vec![1, 2]);
        assert_eq!(engine.session_stats(k).await.unwrap().aging_skips, 1);

        // The window moved to 3: in-order traffic resumes immediately.
        engine.frame_in(k, 3, f(3)).await.unwrap();
        drain().await;
        assert_eq!(sink.sns(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_cancelled_when_buffer_drains() {
        let (engine, sink) = engine();
        let k = key(1);
        engine.start_session(k, 4, 0).await.unwrap();

        engine.frame_in(k, 1, f(1)).await.unwrap();
        engine.frame_in(k, 0, f(0)).await.unwrap();
        drain().await;
        assert_eq!(sink.sns(), vec![0, 1]);

        // Buffer drained before the deadline: no forced skip later.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(engine.session_stats(k).await.unwrap().aging_skips, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_cancelled_on_stop() {
        let (engine, sink) = engine();
        let k = key(1);
        engine.start_session(k, 4, 0).await.unwrap();
        engine.frame_in(k, 2, f(2)).await.unwrap();

        engine.stop_session(k, true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        // Flushed frame discarded, and the armed timer never delivered it.
        assert!(sink.sns().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_stop_makes_slot_reusable() {
        let config = EngineConfig {
            max_sessions: 1,
            ..EngineConfig::default()
        };
        let (engine, sink) = engine_with(config);

        engine.start_session(key(1), 4, 0).await.unwrap();
        engine.frame_in(key(1), 1, f(1)).await.unwrap();
        engine.frame_in(key(1), 2, f(2)).await.unwrap();
        engine.stop_session(key(1), true).await.unwrap();
        drain().await;
        assert!(sink.sns().is_empty());
        assert_eq!(engine.active_sessions().await, 0);

        // The single pool slot is free again for a different peer.
        engine.start_session(key(2), 8, 100).await.unwrap();
        engine.frame_in(key(2), 100, f(100)).await.unwrap();
        drain().await;
        assert_eq!(sink.sns(), vec![100]);
    }

    #[tokio::test(start_paused = true)]
    async fn pool_exhaustion_denies_new_session() {
        let config = EngineConfig {
            max_sessions: 1,
            ..EngineConfig::default()
        };
        let (engine, _sink) = engine_with(config);

        engine.start_session(key(1), 4, 0).await.unwrap();
        assert_eq!(
            engine.start_session(key(2), 4, 0).await,
            Err(EngineError::PoolExhausted)
        );

        // Restarting the existing session does not need a new slot.
        engine.start_session(key(1), 4, 0).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn operations_on_unknown_key_are_not_active() {
        let (engine, _sink) = engine();
        let k = key(9);
        assert_eq!(
            engine.frame_in(k, 0, f(0)).await,
            Err(EngineError::NotActive)
        );
        assert_eq!(
            engine.stop_session(k, true).await,
            Err(EngineError::NotActive)
        );
        assert_eq!(engine.scroll(k, 0).await, Err(EngineError::NotActive));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_with_identical_params_keeps_buffer() {
        let (engine, sink) = engine();
        let k = key(1);
        engine.start_session(k, 4, 0).await.unwrap();
        engine.frame_in(k, 2, f(2)).await.unwrap();

        engine.start_session(k, 4, 0).await.unwrap();
        engine.frame_in(k, 0, f(0)).await.unwrap();
        engine.frame_in(k, 1, f(1)).await.unwrap();
        drain().await;
        assert_eq!(sink.sns(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_with_new_params_releases_buffer() {
        let (engine, sink) = engine();
        let k = key(1);
        engine.start_session(k, 4, 0).await.unwrap();
        engine.frame_in(k, 1, f(1)).await.unwrap();
        engine.frame_in(k, 3, f(3)).await.unwrap();

        engine.start_session(k, 8, 200).await.unwrap();
        drain().await;
        assert_eq!(sink.sns(), vec![1, 3]);
        assert_eq!(engine.active_sessions().await, 1);

        // New window is live at the new head.
        engine.frame_in(k, 200, f(200)).await.unwrap();
        drain().await;
        assert_eq!(sink.sns(), vec![1, 3, 200]);
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_releases_and_cancels_timer() {
        let (engine, sink) = engine();
        let k = key(1);
        engine.start_session(k, 4, 0).await.unwrap();
        engine.frame_in(k, 2, f(2)).await.unwrap();

        engine.scroll(k, 4).await.unwrap();
        drain().await;
        assert_eq!(sink.sns(), vec![2]);

        // Buffer is empty after the scroll, so no aging skip ever fires.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(engine.session_stats(k).await.unwrap().aging_skips, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_for_different_peers_are_independent() {
        let (engine, sink) = engine();
        engine.start_session(key(1), 4, 0).await.unwrap();
        engine.start_session(key(2), 4, 1000).await.unwrap();
        assert_eq!(engine.active_sessions().await, 2);

        engine.frame_in(key(1), 1, f(1)).await.unwrap();
        engine.frame_in(key(2), 1000, f(1000)).await.unwrap();
        engine.frame_in(key(1), 0, f(0)).await.unwrap();
        engine.frame_in(key(2), 1001, f(1001)).await.unwrap();
        drain().await;

        // Peer 2's in-order frames were never held behind peer 1's gap.
        assert_eq!(sink.sns(), vec![1000, 0, 1, 1001]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_feeders_reach_sink_in_window_order() {
        // Runs on the real clock; park the aging timer out of the way.
        let config = EngineConfig {
            aging_timeout: Duration::from_secs(60),
            ..EngineConfig::default()
        };
        let (engine, sink) = engine_with(config);
        let engine = Arc::new(engine);
        let k = key(1);
        engine.start_session(k, 64, 0).await.unwrap();

        // Two workers race frames for the same session. Releases are queued
        // under the session lock, so one worker's batch can never overtake
        // another's between the session and the delivery queue.
        let evens = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                for sn in (0..64u16).step_by(2) {
                    engine.frame_in(k, sn, f(sn)).await.unwrap();
                }
            })
        };
        let odds = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                for sn in (1..64u16).step_by(2) {
                    engine.frame_in(k, sn, f(sn)).await.unwrap();
                }
            })
        };
        evens.await.unwrap();
        odds.await.unwrap();

        // Every sequence number arrived, so the whole window drains.
        for _ in 0..100 {
            if sink.sns().len() == 64 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.sns(), (0..64u16).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_and_stale_are_counted_not_errors() {
        let (engine, sink) = engine();
        let k = key(1);
        engine.start_session(k, 4, 0).await.unwrap();

        engine.frame_in(k, 0, f(0)).await.unwrap();
        engine.frame_in(k, 2, f(2)).await.unwrap();
        engine.frame_in(k, 2, f(2)).await.unwrap();
        engine.frame_in(k, 0, f(0)).await.unwrap();
        drain().await;

        assert_eq!(sink.sns(), vec![0]);
        let stats = engine.session_stats(k).await.unwrap();
        assert_eq!(stats.duplicates_dropped, 1);
        assert_eq!(stats.stale_dropped, 1);
    }
}
