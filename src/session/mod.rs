//! 会话状态
//!
//! 按 conversation id 保存轮次历史，只在进程内存活。同一会话的请求通过会话锁串行执行，
//! 历史追加不会交错；不同会话互不阻塞。空闲超时或超出容量的会话在每轮结束后回收。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::memory::HistoryEntry;

/// 一个会话：有序的 (role, text) 历史
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 调用方每次都重传完整历史；非空时以调用方为准
    pub fn adopt_history(&mut self, history: &[HistoryEntry]) {
        if !history.is_empty() {
            self.history = history.to_vec();
        }
    }

    /// 本轮结束：追加用户消息与助手最终回复（工具调用不进入历史）
    pub fn record_turn(&mut self, user: &str, assistant: &str) {
        self.history.push(HistoryEntry::user(user));
        self.history.push(HistoryEntry::assistant(assistant));
        self.updated_at = Utc::now();
    }
}

/// 会话表；acquire 返回的 guard 持有期间独占该会话
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    idle_ttl: Duration,
    capacity: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_limits(Duration::from_secs(1800), 1024)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(idle_ttl: Duration, capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_ttl,
            capacity: capacity.max(1),
        }
    }

    /// 获取（不存在则创建）会话并加锁
    pub async fn acquire(&self, id: &str) -> OwnedMutexGuard<Session> {
        let existing = self.sessions.read().await.get(id).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let mut sessions = self.sessions.write().await;
                sessions
                    .entry(id.to_string())
                    .or_insert_with(|| {
                        tracing::debug!(conversation_id = %id, "new session");
                        Arc::new(Mutex::new(Session::new(id)))
                    })
                    .clone()
            }
        };
        slot.lock_owned().await
    }

    /// 历史快照（不等待在途请求时返回 None）
    pub async fn snapshot(&self, id: &str) -> Option<Vec<HistoryEntry>> {
        let slot = self.sessions.read().await.get(id).cloned()?;
        let session = slot.try_lock().ok()?;
        Some(session.history.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// 回收空闲超时的会话，再按最久未更新淘汰到容量以内；返回回收数量
    ///
    /// 有请求持有或正在等待的会话（表外还有 Arc 引用）不会被回收。
    pub async fn evict_idle(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.idle_ttl).unwrap_or_else(|_| chrono::Duration::days(36500));
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();

        let mut idle: Vec<(String, DateTime<Utc>)> = sessions
            .iter()
            .filter(|(_, slot)| Arc::strong_count(slot) == 1)
            .filter_map(|(id, slot)| {
                let session = slot.try_lock().ok()?;
                Some((id.clone(), session.updated_at))
            })
            .collect();
        idle.sort_by_key(|(_, updated_at)| *updated_at);

        let mut remaining = Vec::new();
        for (id, updated_at) in idle {
            if updated_at <= cutoff {
                sessions.remove(&id);
            } else {
                remaining.push(id);
            }
        }
        for id in remaining {
            if sessions.len() <= self.capacity {
                break;
            }
            sessions.remove(&id);
        }

        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, retained = sessions.len(), "sessions evicted");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_conversation_is_serialized() {
        let store = Arc::new(SessionStore::new());
        let guard = store.acquire("c1").await;

        let store2 = store.clone();
        let waiter = tokio::spawn(async move {
            let mut s = store2.acquire("c1").await;
            s.record_turn("second", "b");
            s.history.len()
        });

        // 另一个会话不受影响
        let other = tokio::time::timeout(Duration::from_millis(200), store.acquire("c2")).await;
        assert!(other.is_ok());
        drop(other);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        let mut guard = guard;
        guard.record_turn("first", "a");
        drop(guard);

        assert_eq!(waiter.await.unwrap(), 4);
        let history = store.snapshot("c1").await.unwrap();
        assert_eq!(history[0].text, "first");
        assert_eq!(history[2].text, "second");
    }

    #[tokio::test]
    async fn test_idle_sessions_evicted_but_busy_kept() {
        let store = SessionStore::with_limits(Duration::ZERO, 100);
        {
            let mut a = store.acquire("a").await;
            a.record_turn("q", "a");
        }
        let busy = store.acquire("b").await;

        assert_eq!(store.evict_idle().await, 1);
        assert_eq!(store.len().await, 1);
        drop(busy);
        assert!(store.snapshot("a").await.is_none());
        assert!(store.snapshot("b").await.is_some());
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_updated() {
        let store = SessionStore::with_limits(Duration::from_secs(3600), 2);
        for id in ["a", "b", "c"] {
            let mut s = store.acquire(id).await;
            s.record_turn("q", id);
            drop(s);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // 重新触碰 a，使 b 成为最久未更新的会话
        store.acquire("a").await.record_turn("q2", "a2");

        assert_eq!(store.evict_idle().await, 1);
        assert_eq!(store.len().await, 2);
        assert!(store.snapshot("b").await.is_none());
        assert_eq!(store.snapshot("a").await.unwrap().len(), 4);
        assert!(store.snapshot("c").await.is_some());
    }

    #[test]
    fn test_adopt_history_prefers_caller() {
        let mut s = Session::new("c");
        s.record_turn("q1", "a1");
        s.adopt_history(&[]);
        assert_eq!(s.history.len(), 2);
        s.adopt_history(&[HistoryEntry::user("other")]);
        assert_eq!(s.history.len(), 1);
    }
}
