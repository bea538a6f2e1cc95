//! Эфемерное состояние диалога пользователя.
//!
//! Хранилище выдаёт на время обработки одного события эксклюзивный доступ к
//! сессии пользователя: события одного пользователя обрабатываются строго по
//! очереди, разные пользователи не блокируют друг друга. Брошенный диалог
//! удаляется по истечении `ttl`. Ничего не сохраняется между перезапусками.

use crate::api::Server;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Шаг диалога вместе с данными, нужными только этому шагу.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FlowState {
    #[default]
    Idle,
    SelectingServer {
        servers: Vec<Server>,
    },
    ConfirmingKey {
        server: Server,
    },
    AwaitingKeyIdForRevocation,
}

#[derive(Debug, Default)]
pub struct Session {
    pub state: FlowState,
}

impl Session {
    pub fn is_idle(&self) -> bool {
        self.state == FlowState::Idle
    }

    /// Забирает текущий шаг, оставляя сессию в `Idle`.
    pub fn take(&mut self) -> FlowState {
        std::mem::take(&mut self.state)
    }

    pub fn reset(&mut self) {
        self.state = FlowState::Idle;
    }
}

pub type SessionGuard = OwnedMutexGuard<Session>;

struct Slot {
    session: Arc<Mutex<Session>>,
    touched: Instant,
}

impl Slot {
    fn new(now: Instant) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session::default())),
            touched: now,
        }
    }

    /// Никто не держит и не ждёт сессию.
    fn is_unused(&self) -> bool {
        Arc::strong_count(&self.session) == 1 && self.session.try_lock().is_ok()
    }
}

#[derive(Clone)]
pub struct SessionStore {
    slots: Arc<Mutex<HashMap<i64, Slot>>>,
    ttl: Duration,
}

impl SessionStore {
    /// `ttl` — сколько живёт незавершённый диалог без новых событий.
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Ждёт завершения предыдущего события этого пользователя; создаёт сессию при первом обращении.
    pub async fn acquire(&self, user_id: i64) -> SessionGuard {
        let slot = {
            let mut slots = self.slots.lock().await;
            let now = Instant::now();
            self.expire_stale(&mut slots, now);
            slots
                .entry(user_id)
                .or_insert_with(|| Slot::new(now))
                .session
                .clone()
        };
        slot.lock_owned().await
    }

    /// Отпускает сессию; завершённые диалоги удаляются из хранилища.
    pub async fn release(&self, user_id: i64, guard: SessionGuard) {
        let idle = guard.is_idle();
        drop(guard);

        let mut slots = self.slots.lock().await;
        let Some(slot) = slots.get_mut(&user_id) else {
            return;
        };
        let removable = idle
            && Arc::strong_count(&slot.session) == 1
            && slot.session.try_lock().is_ok_and(|session| session.is_idle());
        if removable {
            slots.remove(&user_id);
        } else {
            slot.touched = Instant::now();
        }
    }

    fn expire_stale(&self, slots: &mut HashMap<i64, Slot>, now: Instant) {
        let before = slots.len();
        slots.retain(|_, slot| now.duration_since(slot.touched) < self.ttl || !slot.is_unused());
        let expired = before - slots.len();
        if expired > 0 {
            tracing::debug!(expired, "Dropped stale dialogue sessions");
        }
    }

    /// Текущий шаг без захвата очереди; `Idle`, если сессии нет.
    #[cfg(test)]
    pub async fn current_state(&self, user_id: i64) -> FlowState {
        let slot = self
            .slots
            .lock()
            .await
            .get(&user_id)
            .map(|slot| slot.session.clone());
        match slot {
            Some(slot) => slot.lock().await.state.clone(),
            None => FlowState::Idle,
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}
