//! Coordination hub: the single owner of the board.
//!
//! Architecture:
//! ```text
//!  Session A ──┐                                   ┌──► queue A ──► outbound pump A
//!  Session B ──┼── HubCommand ──► [mpsc 1024] ──► Hub ─► queue B ──► outbound pump B
//!  Api       ──┘   (+ oneshot reply)               │   └──► queue C ──► outbound pump C
//!                                                  ├── Board + TileMeta
//!                                                  ├── RateGovernor
//!                                                  └── BoardStore / AuditLog
//! ```
//!
//! Every mutation of the board, the governor or the session set happens on
//! the hub task, one command at a time. Accepted updates therefore reach all
//! sessions in one total order, and the reply to `submit` is sent only after
//! the notification has been queued for every live session.
//!
//! Fan-out never blocks: a session whose bounded queue is full (or whose pump
//! is gone) is evicted on the spot.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use place_core::{Board, BoardError, Color, Coordinate, Identity, TileMeta, CELL_COUNT};

use crate::governor::RateGovernor;
use crate::protocol::{encode_board, Notification};
use crate::storage::{AuditLog, BoardStore, StoreError, TileRecord};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Minimum time between two accepted writes of one identity
    pub min_interval: Duration,
    /// Capacity of the command queue; producers wait when it is full
    pub command_capacity: usize,
    /// Keep the latest editor and timestamp of every cell in memory
    pub track_tile_meta: bool,
    /// How often the governor forgets identities that would pass anyway
    pub prune_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            command_capacity: 1024,
            track_tile_meta: true,
            prune_interval: Duration::from_secs(60),
        }
    }
}

impl HubConfig {
    /// Check the values a running hub cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.command_capacity == 0 {
            return Err("command_capacity must be at least 1".to_string());
        }
        if self.prune_interval.is_zero() {
            return Err("prune_interval must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Hub counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub sessions: usize,
    pub accepted: u64,
    pub rejected: u64,
    pub evicted: u64,
    pub store_failures: u64,
}

/// A message waiting in a session's outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// One changed cell
    Tile(Notification),
    /// The whole board, one line per cell
    Board(Arc<Board>),
}

impl Outbound {
    pub fn encode(&self) -> String {
        match self {
            Outbound::Tile(n) => n.encode(),
            Outbound::Board(board) => encode_board(board),
        }
    }
}

/// The hub's side of a session: its id, its actor and the only sender of
/// its outbound queue.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: Uuid,
    pub identity: Identity,
    sender: mpsc::Sender<Outbound>,
    // Alive while the last queued resync frame has not been written out
    pending_resync: Weak<Board>,
}

impl SessionHandle {
    /// Create a session with a bounded outbound queue of `capacity`.
    pub fn new(identity: Identity, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            identity,
            sender,
            pending_resync: Weak::new(),
        };
        (handle, receiver)
    }
}

/// Color as submitted: a numeric code (live protocol) or a name (API).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorRef {
    Code(i64),
    Name(String),
}

impl ColorRef {
    fn resolve(&self) -> Result<Color, UpdateError> {
        match self {
            ColorRef::Code(code) => u8::try_from(*code)
                .ok()
                .and_then(|c| Color::from_code(c).ok())
                .ok_or_else(|| UpdateError::UnknownColor(code.to_string())),
            ColorRef::Name(name) => {
                Color::from_name(name).map_err(|_| UpdateError::UnknownColor(name.clone()))
            }
        }
    }
}

impl From<Color> for ColorRef {
    fn from(color: Color) -> Self {
        ColorRef::Code(color.code().into())
    }
}

impl From<&str> for ColorRef {
    fn from(name: &str) -> Self {
        ColorRef::Name(name.to_string())
    }
}

/// An update request. Bounds and color are validated by the hub.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub x: i64,
    pub y: i64,
    pub color: ColorRef,
    pub identity: Identity,
    pub timestamp: DateTime<Utc>,
}

impl UpdateEvent {
    pub fn new(x: i64, y: i64, color: impl Into<ColorRef>, identity: Identity) -> Self {
        Self {
            x,
            y,
            color: color.into(),
            identity,
            timestamp: Utc::now(),
        }
    }
}

/// Current state of one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileInfo {
    pub coord: Coordinate,
    pub color: Color,
    pub meta: Option<TileMeta>,
}

/// Why an update was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    OutOfBounds { x: i64, y: i64 },
    UnknownColor(String),
    RateLimited,
    HubStopped,
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds { x, y } => write!(f, "Coordinate ({x}, {y}) is out of bounds"),
            Self::UnknownColor(c) => write!(f, "Unknown color: {c}"),
            Self::RateLimited => write!(f, "Too many updates, slow down"),
            Self::HubStopped => write!(f, "Hub is not running"),
        }
    }
}

impl std::error::Error for UpdateError {}

/// The hub task is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    Stopped,
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "Hub is not running"),
        }
    }
}

impl std::error::Error for HubError {}

enum HubCommand {
    Register {
        session: SessionHandle,
        reply: oneshot::Sender<Board>,
    },
    Unregister {
        id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    Submit {
        event: UpdateEvent,
        reply: oneshot::Sender<Result<(), UpdateError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Board>,
    },
    Resync {
        id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    Tile {
        coord: Coordinate,
        reply: oneshot::Sender<TileInfo>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Authoritative board state plus the set of live sessions.
pub struct Hub {
    config: HubConfig,
    board: Board,
    tile_meta: Option<Vec<Option<TileMeta>>>,
    sessions: HashMap<Uuid, SessionHandle>,
    governor: RateGovernor,
    store: Arc<dyn BoardStore>,
    audit: Option<Arc<dyn AuditLog>>,
    stats: HubStats,
}

impl Hub {
    pub fn new(board: Board, store: Arc<dyn BoardStore>, config: HubConfig) -> Self {
        let tile_meta = config.track_tile_meta.then(|| vec![None; CELL_COUNT]);
        Self {
            governor: RateGovernor::new(config.min_interval),
            config,
            board,
            tile_meta,
            sessions: HashMap::new(),
            store,
            audit: None,
            stats: HubStats::default(),
        }
    }

    /// Build a hub from the store's snapshot (initializing it if absent).
    pub fn load(store: Arc<dyn BoardStore>, config: HubConfig) -> Result<Self, StoreError> {
        let packed = store.load_snapshot()?;
        let board = Board::from_packed(&packed)?;
        Ok(Self::new(board, store, config))
    }

    /// Record the latest editor of every accepted write.
    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Move the hub onto its own task and return a handle to it.
    ///
    /// The task stops once every handle has been dropped.
    pub fn spawn(self) -> HubHandle {
        let (tx, rx) = mpsc::channel(self.config.command_capacity.max(1));
        let min_interval = self.config.min_interval;
        tokio::spawn(self.run(rx));
        HubHandle { tx, min_interval }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<HubCommand>) {
        // interval() panics on a zero period
        let period = self.config.prune_interval.max(Duration::from_millis(1));
        let mut prune = tokio::time::interval(period);
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        log::info!(
            "Hub started (min interval {:?}, command capacity {})",
            self.config.min_interval,
            self.config.command_capacity
        );

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                _ = prune.tick() => {
                    let removed = self.governor.prune(Instant::now());
                    if removed > 0 {
                        log::debug!("Governor pruned {removed} identities");
                    }
                }
            }
        }

        log::info!("Hub stopped: {:?}", self.stats());
    }

    fn handle(&mut self, cmd: HubCommand) {
        // A dropped reply receiver only means the caller gave up waiting.
        match cmd {
            HubCommand::Register { session, reply } => {
                let _ = reply.send(self.register(session));
            }
            HubCommand::Unregister { id, reply } => {
                let _ = reply.send(self.unregister(id));
            }
            HubCommand::Submit { event, reply } => {
                let _ = reply.send(self.apply_update(event, Instant::now()));
            }
            HubCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            HubCommand::Resync { id, reply } => {
                let _ = reply.send(self.resync(id));
            }
            HubCommand::Tile { coord, reply } => {
                let _ = reply.send(self.tile(coord));
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    /// Add a session. Returns the board as of this point; every later
    /// accepted update is queued to the new session.
    pub fn register(&mut self, session: SessionHandle) -> Board {
        log::debug!("Session {} registered for {}", session.id, session.identity);
        self.sessions.insert(session.id, session);
        self.board.clone()
    }

    /// Remove a session and close its queue. Idempotent.
    pub fn unregister(&mut self, id: Uuid) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            log::debug!("Session {id} unregistered");
        }
        removed
    }

    /// Validate, rate-check, apply, persist and fan out one update.
    pub fn apply_update(&mut self, event: UpdateEvent, now: Instant) -> Result<(), UpdateError> {
        let result = self.try_apply(event, now);
        match &result {
            Ok(()) => self.stats.accepted += 1,
            Err(e) => {
                self.stats.rejected += 1;
                log::debug!("Update rejected: {e}");
            }
        }
        result
    }

    fn try_apply(&mut self, event: UpdateEvent, now: Instant) -> Result<(), UpdateError> {
        let coord = Coordinate::new(event.x, event.y).map_err(|e| match e {
            BoardError::OutOfBounds { x, y } => UpdateError::OutOfBounds { x, y },
            _ => UpdateError::OutOfBounds { x: event.x, y: event.y },
        })?;
        let color = event.color.resolve()?;
        if !self.governor.try_acquire(&event.identity, now) {
            return Err(UpdateError::RateLimited);
        }

        self.board.set(coord, color);
        if let Some(meta) = self.tile_meta.as_mut() {
            meta[coord.index()] = Some(TileMeta {
                editor: event.identity.clone(),
                updated_at: event.timestamp,
            });
        }

        self.persist(coord, color, &event);
        self.fan_out(Outbound::Tile(Notification::new(coord, color)));
        Ok(())
    }

    /// Best-effort: the in-memory board stays authoritative.
    fn persist(&mut self, coord: Coordinate, color: Color, event: &UpdateEvent) {
        if let Err(e) = self.store.write_cell(coord, color) {
            self.stats.store_failures += 1;
            log::error!("Failed to persist {coord} = {color}: {e}");
        }
        if let Some(audit) = &self.audit {
            let record = TileRecord::new(coord, color, &event.identity, event.timestamp);
            if let Err(e) = audit.record(&record) {
                self.stats.store_failures += 1;
                log::warn!("Failed to record audit for {coord}: {e}");
            }
        }
    }

    fn fan_out(&mut self, msg: Outbound) {
        let mut evicted = Vec::new();
        for (id, session) in &self.sessions {
            if session.sender.try_send(msg.clone()).is_err() {
                evicted.push(*id);
            }
        }
        for id in evicted {
            self.evict(id);
        }
    }

    fn evict(&mut self, id: Uuid) {
        if let Some(session) = self.sessions.remove(&id) {
            self.stats.evicted += 1;
            log::warn!("Evicting slow session {id} ({})", session.identity);
        }
    }

    /// Queue the full board on one session. Returns false if the session is
    /// unknown or was evicted because its queue is full.
    ///
    /// While an earlier board frame is still queued, the request is folded
    /// into it: every update accepted since then is queued behind that frame,
    /// so the session still ends up with the current board.
    pub fn resync(&mut self, id: Uuid) -> bool {
        match self.sessions.get(&id) {
            None => return false,
            Some(session) if session.pending_resync.strong_count() > 0 => {
                log::debug!("Session {id}: resync already queued");
                return true;
            }
            Some(_) => {}
        }

        let board = Arc::new(self.board.clone());
        let pending = Arc::downgrade(&board);
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        if session.sender.try_send(Outbound::Board(board)).is_err() {
            self.evict(id);
            return false;
        }
        session.pending_resync = pending;
        true
    }

    pub fn snapshot(&self) -> Board {
        self.board.clone()
    }

    /// Color plus latest editor, falling back to the audit log.
    pub fn tile(&self, coord: Coordinate) -> TileInfo {
        let color = self.board.get(coord);
        let tracked = self
            .tile_meta
            .as_ref()
            .and_then(|meta| meta[coord.index()].clone());
        let meta = tracked.or_else(|| {
            let audit = self.audit.as_ref()?;
            match audit.lookup(coord) {
                Ok(record) => record.map(|r| r.meta()),
                Err(e) => {
                    log::warn!("Audit lookup for {coord} failed: {e}");
                    None
                }
            }
        });
        TileInfo { coord, color, meta }
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            sessions: self.sessions.len(),
            ..self.stats.clone()
        }
    }
}

/// Cloneable handle to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
    min_interval: Duration,
}

impl HubHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> Result<T, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| HubError::Stopped)?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    pub async fn register(&self, session: SessionHandle) -> Result<Board, HubError> {
        self.request(|reply| HubCommand::Register { session, reply }).await
    }

    pub async fn unregister(&self, id: Uuid) -> Result<bool, HubError> {
        self.request(|reply| HubCommand::Unregister { id, reply }).await
    }

    pub async fn submit(&self, event: UpdateEvent) -> Result<(), UpdateError> {
        self.request(|reply| HubCommand::Submit { event, reply })
            .await
            .map_err(|_| UpdateError::HubStopped)?
    }

    pub async fn snapshot(&self) -> Result<Board, HubError> {
        self.request(|reply| HubCommand::Snapshot { reply }).await
    }

    pub async fn resync(&self, id: Uuid) -> Result<bool, HubError> {
        self.request(|reply| HubCommand::Resync { id, reply }).await
    }

    pub async fn tile(&self, coord: Coordinate) -> Result<TileInfo, HubError> {
        self.request(|reply| HubCommand::Tile { coord, reply }).await
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        self.request(|reply| HubCommand::Stats { reply }).await
    }

    /// The per-identity update interval the hub enforces.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use place_core::DEFAULT_COLOR;

    fn alice() -> Identity {
        Identity::new(1, "alice")
    }

    fn hub_with(min_interval: Duration) -> (Hub, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = HubConfig {
            min_interval,
            ..HubConfig::default()
        };
        let hub = Hub::load(store.clone(), config).unwrap().with_audit(store.clone());
        (hub, store)
    }

    fn coord(x: i64, y: i64) -> Coordinate {
        Coordinate::new(x, y).unwrap()
    }

    #[test]
    fn test_set_then_snapshot() {
        let (mut hub, store) = hub_with(Duration::from_secs(1));
        hub.apply_update(UpdateEvent::new(3, 4, Color::Red, alice()), Instant::now())
            .unwrap();

        assert_eq!(hub.snapshot().get(coord(3, 4)), Color::Red);
        let persisted = Board::from_packed(&store.packed().unwrap()).unwrap();
        assert_eq!(persisted.get(coord(3, 4)), Color::Red);
    }

    #[test]
    fn test_red_then_white_two_seconds_apart() {
        let (mut hub, _store) = hub_with(Duration::from_secs(1));
        let t0 = Instant::now();
        hub.apply_update(UpdateEvent::new(10, 20, "red", alice()), t0).unwrap();
        hub.apply_update(
            UpdateEvent::new(10, 20, "white", alice()),
            t0 + Duration::from_secs(2),
        )
        .unwrap();

        assert_eq!(hub.snapshot().get(coord(10, 20)), Color::White);
        assert_eq!(hub.stats().accepted, 2);
    }

    #[test]
    fn test_rate_limited_within_interval() {
        let (mut hub, _store) = hub_with(Duration::from_secs(1));
        let t0 = Instant::now();
        hub.apply_update(UpdateEvent::new(0, 0, Color::Red, alice()), t0).unwrap();
        assert_eq!(
            hub.apply_update(
                UpdateEvent::new(1, 0, Color::Red, alice()),
                t0 + Duration::from_millis(500)
            ),
            Err(UpdateError::RateLimited)
        );
        assert_eq!(hub.snapshot().get(coord(1, 0)), DEFAULT_COLOR);
        assert_eq!(hub.stats().rejected, 1);
    }

    #[test]
    fn test_out_of_bounds_leaves_board_unchanged() {
        let (mut hub, _store) = hub_with(Duration::ZERO);
        let before = hub.snapshot();
        for (x, y) in [(-1, 0), (0, -1), (100, 0), (0, 100), (i64::MAX, 5)] {
            assert_eq!(
                hub.apply_update(UpdateEvent::new(x, y, Color::Red, alice()), Instant::now()),
                Err(UpdateError::OutOfBounds { x, y })
            );
        }
        assert_eq!(hub.snapshot(), before);
    }

    #[test]
    fn test_unknown_color_rejected() {
        let (mut hub, _store) = hub_with(Duration::ZERO);
        let before = hub.snapshot();
        let now = Instant::now();
        assert_eq!(
            hub.apply_update(UpdateEvent::new(1, 1, "mauve", alice()), now),
            Err(UpdateError::UnknownColor("mauve".into()))
        );
        assert_eq!(
            hub.apply_update(UpdateEvent::new(1, 1, ColorRef::Code(16), alice()), now),
            Err(UpdateError::UnknownColor("16".into()))
        );
        assert_eq!(hub.snapshot(), before);
    }

    #[test]
    fn test_rejection_does_not_consume_rate_window() {
        let (mut hub, _store) = hub_with(Duration::from_secs(1));
        let now = Instant::now();
        assert!(hub.apply_update(UpdateEvent::new(500, 0, Color::Red, alice()), now).is_err());
        assert!(hub.apply_update(UpdateEvent::new(5, 0, Color::Red, alice()), now).is_ok());
    }

    #[test]
    fn test_store_failure_still_updates_board() {
        let (mut hub, store) = hub_with(Duration::ZERO);
        store.set_fail_writes(true);

        hub.apply_update(UpdateEvent::new(7, 7, Color::Lime, alice()), Instant::now())
            .unwrap();

        assert_eq!(hub.snapshot().get(coord(7, 7)), Color::Lime);
        // Board write and audit record both failed
        assert_eq!(hub.stats().store_failures, 2);
        let persisted = Board::from_packed(&store.packed().unwrap()).unwrap();
        assert_eq!(persisted.get(coord(7, 7)), DEFAULT_COLOR);
    }

    #[test]
    fn test_fan_out_reaches_every_session() {
        let (mut hub, _store) = hub_with(Duration::ZERO);
        let (a, mut rx_a) = SessionHandle::new(alice(), 8);
        let (b, mut rx_b) = SessionHandle::new(Identity::new(2, "bob"), 8);
        hub.register(a);
        hub.register(b);

        hub.apply_update(UpdateEvent::new(10, 20, Color::Red, alice()), Instant::now())
            .unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            let msg = rx.try_recv().unwrap();
            assert_eq!(msg.encode(), "10 20 8");
        }
    }

    #[test]
    fn test_register_returns_current_board() {
        let (mut hub, _store) = hub_with(Duration::ZERO);
        hub.apply_update(UpdateEvent::new(1, 2, Color::Pink, alice()), Instant::now())
            .unwrap();

        let (session, mut rx) = SessionHandle::new(alice(), 8);
        let board = hub.register(session);
        assert_eq!(board.get(coord(1, 2)), Color::Pink);
        // Nothing from before registration is queued
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_slow_session_evicted_at_257th_update() {
        let (mut hub, _store) = hub_with(Duration::ZERO);
        let (slow, mut rx) = SessionHandle::new(alice(), 256);
        hub.register(slow);

        for i in 0..256 {
            hub.apply_update(
                UpdateEvent::new(i % 100, i / 100, Color::Black, alice()),
                Instant::now(),
            )
            .unwrap();
        }
        assert_eq!(hub.stats().sessions, 1);

        hub.apply_update(UpdateEvent::new(99, 99, Color::Black, alice()), Instant::now())
            .unwrap();
        let stats = hub.stats();
        assert_eq!(stats.sessions, 0);
        assert_eq!(stats.evicted, 1);

        // The queued backlog is still readable, then the queue is closed
        let mut drained = 0;
        while rx.try_recv().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, 256);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_closed_session_evicted_on_fan_out() {
        let (mut hub, _store) = hub_with(Duration::ZERO);
        let (session, rx) = SessionHandle::new(alice(), 8);
        hub.register(session);
        drop(rx);

        hub.apply_update(UpdateEvent::new(0, 0, Color::Red, alice()), Instant::now())
            .unwrap();
        assert_eq!(hub.stats().sessions, 0);
    }

    #[test]
    fn test_unregister_idempotent() {
        let (mut hub, _store) = hub_with(Duration::ZERO);
        let (session, _rx) = SessionHandle::new(alice(), 8);
        let id = session.id;
        hub.register(session);
        assert!(hub.unregister(id));
        assert!(!hub.unregister(id));
    }

    #[test]
    fn test_resync_queues_full_board() {
        let (mut hub, _store) = hub_with(Duration::ZERO);
        let (session, mut rx) = SessionHandle::new(alice(), 8);
        let id = session.id;
        hub.register(session);

        assert!(hub.resync(id));
        let frame = rx.try_recv().unwrap().encode();
        assert_eq!(frame.lines().count(), CELL_COUNT);
        assert!(!hub.resync(Uuid::new_v4()));
    }

    #[test]
    fn test_repeated_resync_folded_while_pending() {
        let (mut hub, _store) = hub_with(Duration::ZERO);
        let (session, mut rx) = SessionHandle::new(alice(), 256);
        let id = session.id;
        hub.register(session);

        for _ in 0..300 {
            assert!(hub.resync(id));
        }
        hub.apply_update(UpdateEvent::new(6, 6, Color::Red, alice()), Instant::now())
            .unwrap();
        assert_eq!(hub.stats().sessions, 1);

        // One board frame, then the update accepted after it
        let first = rx.try_recv().unwrap();
        assert!(matches!(first, Outbound::Board(_)));
        assert_eq!(rx.try_recv().unwrap().encode(), "6 6 8");
        assert!(rx.try_recv().is_err());

        // Once the frame has been written out, a new request queues again
        drop(first);
        assert!(hub.resync(id));
        let frame = rx.try_recv().unwrap().encode();
        assert!(frame.contains("\n6 6 8\n"));
    }

    #[test]
    fn test_config_validate() {
        assert!(HubConfig::default().validate().is_ok());
        let zero_prune = HubConfig {
            prune_interval: Duration::ZERO,
            ..HubConfig::default()
        };
        assert!(zero_prune.validate().is_err());
        let zero_queue = HubConfig {
            command_capacity: 0,
            ..HubConfig::default()
        };
        assert!(zero_queue.validate().is_err());
    }

    #[tokio::test]
    async fn test_zero_prune_interval_does_not_stop_hub() {
        let store = Arc::new(MemoryStore::new());
        let config = HubConfig {
            min_interval: Duration::from_millis(250),
            prune_interval: Duration::ZERO,
            ..HubConfig::default()
        };
        let handle = Hub::load(store, config).unwrap().spawn();
        assert_eq!(handle.min_interval(), Duration::from_millis(250));

        handle.submit(UpdateEvent::new(0, 0, Color::Red, alice())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.stats().await.unwrap().accepted, 1);
    }

    #[test]
    fn test_tile_meta_tracked() {
        let (mut hub, _store) = hub_with(Duration::ZERO);
        let event = UpdateEvent::new(4, 5, Color::Orange, alice());
        let at = event.timestamp;
        hub.apply_update(event, Instant::now()).unwrap();

        let info = hub.tile(coord(4, 5));
        assert_eq!(info.color, Color::Orange);
        let meta = info.meta.unwrap();
        assert_eq!(meta.editor, alice());
        assert_eq!(meta.updated_at, at);

        assert!(hub.tile(coord(5, 5)).meta.is_none());
    }

    #[test]
    fn test_tile_falls_back_to_audit_log() {
        let store = Arc::new(MemoryStore::new());
        let record = TileRecord::new(coord(8, 8), Color::Sky, &alice(), Utc::now());
        store.record(&record).unwrap();
        store.write_cell(coord(8, 8), Color::Sky).unwrap();

        let config = HubConfig {
            track_tile_meta: false,
            ..HubConfig::default()
        };
        let hub = Hub::load(store.clone(), config).unwrap().with_audit(store);
        let info = hub.tile(coord(8, 8));
        assert_eq!(info.color, Color::Sky);
        assert_eq!(info.meta.unwrap().editor.handle, "alice");
    }

    #[tokio::test]
    async fn test_handle_roundtrip() {
        let (hub, _store) = hub_with(Duration::ZERO);
        let handle = hub.spawn();

        let (session, mut rx) = SessionHandle::new(alice(), 8);
        let board = handle.register(session).await.unwrap();
        assert_eq!(board, Board::default());

        handle
            .submit(UpdateEvent::new(10, 20, Color::Red, alice()))
            .await
            .unwrap();
        // Queued before submit returned
        assert_eq!(rx.try_recv().unwrap().encode(), "10 20 8");

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.get(coord(10, 20)), Color::Red);

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.accepted, 1);
    }

    #[tokio::test]
    async fn test_handle_rate_limit() {
        let (hub, _store) = hub_with(Duration::from_secs(3600));
        let handle = hub.spawn();
        handle.submit(UpdateEvent::new(0, 0, Color::Red, alice())).await.unwrap();
        assert_eq!(
            handle.submit(UpdateEvent::new(1, 1, Color::Red, alice())).await,
            Err(UpdateError::RateLimited)
        );
    }

    #[tokio::test]
    async fn test_concurrent_submitters_total_order() {
        let (hub, _store) = hub_with(Duration::ZERO);
        let handle = hub.spawn();
        let (a, mut rx_a) = SessionHandle::new(alice(), 1024);
        let (b, mut rx_b) = SessionHandle::new(alice(), 1024);
        handle.register(a).await.unwrap();
        handle.register(b).await.unwrap();

        let mut tasks = Vec::new();
        for n in 0..8u64 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..50i64 {
                    let color = Color::from_nibble((i % 16) as u8);
                    handle
                        .submit(UpdateEvent::new(i, n as i64, color, Identity::new(n, "w")))
                        .await
                        .unwrap();
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let mut seen_a = Vec::new();
        while let Ok(msg) = rx_a.try_recv() {
            seen_a.push(msg.encode());
        }
        let mut seen_b = Vec::new();
        while let Ok(msg) = rx_b.try_recv() {
            seen_b.push(msg.encode());
        }
        assert_eq!(seen_a.len(), 400);
        assert_eq!(seen_a, seen_b);
    }

    #[tokio::test]
    async fn test_handle_after_stop() {
        let (hub, _store) = hub_with(Duration::ZERO);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = HubHandle {
            tx,
            min_interval: Duration::ZERO,
        };
        drop(hub);

        assert!(handle.is_closed());
        assert_eq!(handle.snapshot().await, Err(HubError::Stopped));
        assert_eq!(
            handle.submit(UpdateEvent::new(0, 0, Color::Red, alice())).await,
            Err(UpdateError::HubStopped)
        );
    }
}
