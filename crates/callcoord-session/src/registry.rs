use crate::session::Session;
use callcoord_core::{CoordError, CoordResult};
use callcoord_store::DurableStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tracing::{debug, info, warn};

type Slot = Arc<AsyncMutex<Option<Session>>>;

/// Exclusive access to one live session.
///
/// Holding the guard holds that call's lock; dropping it releases the lock.
pub struct SessionGuard {
    call_id: String,
    slot: Slot,
    guard: OwnedMappedMutexGuard<Option<Session>, Session>,
}

impl SessionGuard {
    /// Call the guard belongs to.
    pub fn call_id(&self) -> &str {
        &self.call_id
    }
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.guard
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.guard
    }
}

/// Owns every live session and the lock that serializes access to it.
///
/// Locks are created on first access to a call id and dropped when the
/// session is removed. A task that was waiting on a lock whose session was
/// removed in the meantime starts over with a fresh slot, so it never sees a
/// retired session.
pub struct SessionRegistry {
    store: DurableStore,
    slots: Mutex<HashMap<String, Slot>>,
}

impl SessionRegistry {
    /// An empty registry that recovers missing sessions from `store`.
    pub fn new(store: DurableStore) -> Self {
        Self {
            store,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, call_id: &str) -> Slot {
        self.slots
            .lock()
            .entry(call_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    fn is_current(&self, call_id: &str, slot: &Slot) -> bool {
        self.slots
            .lock()
            .get(call_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    fn drop_slot(&self, call_id: &str, slot: &Slot) {
        let mut slots = self.slots.lock();
        if slots
            .get(call_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(call_id);
        }
    }

    /// Lock the slot for `call_id`, retrying if it was retired while we waited.
    async fn acquire(&self, call_id: &str) -> (Slot, OwnedMutexGuard<Option<Session>>) {
        loop {
            let slot = self.slot(call_id);
            let guard = slot.clone().lock_owned().await;
            if self.is_current(call_id, &slot) {
                return (slot, guard);
            }
            debug!(call_id, "Session slot retired while waiting, retrying");
        }
    }

    fn into_guard(
        call_id: &str,
        slot: Slot,
        guard: OwnedMutexGuard<Option<Session>>,
    ) -> CoordResult<SessionGuard> {
        let guard = OwnedMutexGuard::try_map(guard, Option::as_mut)
            .map_err(|_| CoordError::SessionNotFound(call_id.to_string()))?;
        Ok(SessionGuard {
            call_id: call_id.to_string(),
            slot,
            guard,
        })
    }

    /// Register a new session and return it locked.
    ///
    /// Fails with `Conflict` if a live session already exists for the call.
    pub async fn create(&self, session: Session) -> CoordResult<SessionGuard> {
        let call_id = session.call_id().to_string();
        let (slot, mut guard) = self.acquire(&call_id).await;
        if guard.is_some() {
            return Err(CoordError::Conflict(format!(
                "session {call_id} is already live"
            )));
        }
        *guard = Some(session);
        info!(call_id = %call_id, live_sessions = self.len(), "Created session");
        Self::into_guard(&call_id, slot, guard)
    }

    /// Lock the live session for `call_id`, rebuilding it from the durable
    /// call record if this process does not hold it.
    ///
    /// Fails with `SessionNotFound` when there is neither a live session nor
    /// a readable call record.
    pub async fn get(&self, call_id: &str) -> CoordResult<SessionGuard> {
        let (slot, mut guard) = self.acquire(call_id).await;
        if guard.is_none() {
            warn!(call_id, "Session not in memory, attempting recovery");
            match self.store.get_call_record(call_id).await {
                Ok(Some(record)) => {
                    let session = Session::recover(&record);
                    info!(
                        call_id,
                        agent_id = %session.agent_id(),
                        messages = session.turn_counter(),
                        "Recovered session from call record"
                    );
                    *guard = Some(session);
                }
                Ok(None) => {
                    self.drop_slot(call_id, &slot);
                    return Err(CoordError::SessionNotFound(call_id.to_string()));
                }
                Err(e) => {
                    self.drop_slot(call_id, &slot);
                    warn!(call_id, error = %e, "Session recovery failed");
                    return Err(CoordError::SessionNotFound(format!("{call_id}: {e}")));
                }
            }
        }
        Self::into_guard(call_id, slot, guard)
    }

    /// Retire a session while holding its lock.
    pub fn remove_locked(&self, guard: SessionGuard) {
        self.drop_slot(&guard.call_id, &guard.slot);
        info!(call_id = %guard.call_id, live_sessions = self.len(), "Cleaned up session");
    }

    /// Wait for the call's lock, then retire its session.
    pub async fn remove(&self, call_id: &str) -> Option<Session> {
        let existing = self.slots.lock().get(call_id).cloned()?;
        let mut guard = existing.clone().lock_owned().await;
        if !self.is_current(call_id, &existing) {
            return None;
        }
        self.drop_slot(call_id, &existing);
        let session = guard.take();
        info!(call_id, live_sessions = self.len(), "Cleaned up session");
        session
    }

    /// Whether a lock slot exists for the call.
    pub fn contains(&self, call_id: &str) -> bool {
        self.slots.lock().contains_key(call_id)
    }

    /// Number of live lock slots.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether no call holds a slot.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Call ids with a live slot.
    pub fn call_ids(&self) -> Vec<String> {
        self.slots.lock().keys().cloned().collect()
    }
}
