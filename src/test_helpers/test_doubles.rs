use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::models::{DonationRecord, EventStore, PurchaseRecord};
use crate::notifications::token_directory::require_ids;
use crate::notifications::{DeviceTokenSet, DirectoryError, PushError, PushMessage, PushTransport, TokenDirectory};

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Rows kept in insertion order
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    purchases: Mutex<Vec<PurchaseRecord>>,
    donations: Mutex<Vec<DonationRecord>>,
    fail_inserts: AtomicBool,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn purchases(&self) -> Vec<PurchaseRecord> {
        locked(&self.purchases).clone()
    }

    pub fn donations(&self) -> Vec<DonationRecord> {
        locked(&self.donations).clone()
    }

    fn check(&self) -> Result<(), sqlx::Error> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert_purchase(&self, record: &PurchaseRecord) -> Result<(), sqlx::Error> {
        self.check()?;
        locked(&self.purchases).push(record.clone());
        Ok(())
    }

    async fn insert_donation(&self, record: &DonationRecord) -> Result<(), sqlx::Error> {
        self.check()?;
        locked(&self.donations).push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTokenDirectory {
    users: Mutex<HashMap<String, BTreeSet<String>>>,
    fail_lookups: AtomicBool,
}

impl InMemoryTokenDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user record; an empty iterator leaves a record with no tokens
    pub fn insert<I, T>(&self, user_id: &str, tokens: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let set = DeviceTokenSet::with_tokens(user_id, tokens);
        locked(&self.users).insert(user_id.to_string(), set.tokens);
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TokenDirectory for InMemoryTokenDirectory {
    async fn tokens_for_user(&self, user_id: &str) -> Result<Option<DeviceTokenSet>, DirectoryError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(DirectoryError::Connection("directory unavailable".to_string()));
        }
        Ok(locked(&self.users).get(user_id).map(|tokens| DeviceTokenSet {
            user_id: user_id.to_string(),
            tokens: tokens.clone(),
        }))
    }

    async fn register_token(&self, user_id: &str, token: &str) -> Result<(), DirectoryError> {
        require_ids(user_id, token)?;
        locked(&self.users)
            .entry(user_id.to_string())
            .or_default()
            .insert(token.to_string());
        Ok(())
    }

    async fn revoke_token(&self, user_id: &str, token: &str) -> Result<bool, DirectoryError> {
        require_ids(user_id, token)?;
        Ok(locked(&self.users)
            .get_mut(user_id)
            .map(|tokens| tokens.remove(token))
            .unwrap_or(false))
    }
}

/// Records every send; tokens marked with `fail_token` are rejected
#[derive(Debug, Default)]
pub struct RecordingPushTransport {
    sent: Mutex<Vec<(PushMessage, tokio::time::Instant)>>,
    failing_tokens: Mutex<HashSet<String>>,
}

impl RecordingPushTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_token(&self, token: &str) {
        locked(&self.failing_tokens).insert(token.to_string());
    }

    pub fn sent(&self) -> Vec<PushMessage> {
        locked(&self.sent).iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn sent_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = locked(&self.sent).iter().map(|(m, _)| m.token.clone()).collect();
        tokens.sort();
        tokens
    }

    /// tokio-clock instants of each successful send, in send order
    pub fn sent_at(&self) -> Vec<tokio::time::Instant> {
        locked(&self.sent).iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl PushTransport for RecordingPushTransport {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError> {
        if locked(&self.failing_tokens).contains(&message.token) {
            return Err(PushError::Rejected {
                status: 400,
                message: format!("token {} rejected", message.token),
            });
        }
        locked(&self.sent).push((message.clone(), tokio::time::Instant::now()));
        Ok(())
    }
}
