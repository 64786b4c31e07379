//! # Entry Store
//!
//! Persistence contract the ledger is written against, plus the in-memory
//! implementation used when Redis is not configured and by the test suite.
//!
//! ## Requirements
//!
//! - Insert with store-level uniqueness on normalized email and referral code
//! - Point lookups by id, email, and referral code
//! - Full-collection scan for the stats/leaderboard aggregates
//! - Atomic increment of the referral count returning the post-value
//! - One-shot conditional winner transition

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::entry::{ContestEntry, EntryStatus, NewEntry, PaymentRecord, PrizeClaim};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("email already present")]
    EmailTaken,

    #[error("referral code already present")]
    CodeTaken,

    #[error("no entry with id {0}")]
    Missing(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// The ledger takes this as an `Arc<dyn EntryStore>` handed over at startup,
/// never a module-scoped client.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Assigns the id and timestamps. Fails with `EmailTaken`/`CodeTaken`
    /// when the respective uniqueness reservation is already held.
    async fn insert(&self, new: NewEntry) -> Result<ContestEntry, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<ContestEntry>, StoreError>;

    /// `email` must already be normalized by the caller.
    async fn find_by_email(&self, email: &str) -> Result<Option<ContestEntry>, StoreError>;

    async fn find_by_code(&self, code: &str) -> Result<Option<ContestEntry>, StoreError>;

    async fn list_all(&self) -> Result<Vec<ContestEntry>, StoreError>;

    /// Single read-modify-write; returns the post-increment value.
    async fn increment_referrals(&self, id: &str) -> Result<u64, StoreError>;

    /// Transitions active -> winner at most once. Returns whether this call
    /// performed the transition.
    async fn mark_winner(&self, id: &str) -> Result<bool, StoreError>;

    async fn record_prize_claim(&self, claim: PrizeClaim) -> Result<(), StoreError>;

    async fn record_payment(&self, payment: PaymentRecord) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, ContestEntry>,
    email_index: HashMap<String, String>,
    code_index: HashMap<String, String>,
    payments: HashMap<String, PaymentRecord>,
    prize_claims: Vec<PrizeClaim>,
}

/// Process-local store. Loses everything on restart, which matches the
/// original deployment's behavior when the database is not configured.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prize_claim_count(&self) -> usize {
        self.inner.lock().unwrap().prize_claims.len()
    }

    pub fn payment_for(&self, confirmation_id: &str) -> Option<PaymentRecord> {
        self.inner
            .lock()
            .unwrap()
            .payments
            .get(confirmation_id)
            .cloned()
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn insert(&self, new: NewEntry) -> Result<ContestEntry, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.email_index.contains_key(&new.email) {
            return Err(StoreError::EmailTaken);
        }
        if inner.code_index.contains_key(&new.referral_code) {
            return Err(StoreError::CodeTaken);
        }

        let entry = ContestEntry::from_new(Uuid::new_v4().to_string(), new, Utc::now());

        inner
            .email_index
            .insert(entry.email.clone(), entry.id.clone());
        inner
            .code_index
            .insert(entry.referral_code.clone(), entry.id.clone());
        inner.entries.insert(entry.id.clone(), entry.clone());

        Ok(entry)
    }

    async fn get(&self, id: &str) -> Result<Option<ContestEntry>, StoreError> {
        Ok(self.inner.lock().unwrap().entries.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<ContestEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();

        Ok(inner
            .email_index
            .get(email)
            .and_then(|id| inner.entries.get(id))
            .cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<ContestEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();

        Ok(inner
            .code_index
            .get(code)
            .and_then(|id| inner.entries.get(id))
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<ContestEntry>, StoreError> {
        Ok(self.inner.lock().unwrap().entries.values().cloned().collect())
    }

    async fn increment_referrals(&self, id: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| StoreError::Missing(id.to_string()))?;

        entry.referrals += 1;
        entry.last_updated_at = Utc::now();

        Ok(entry.referrals)
    }

    async fn mark_winner(&self, id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| StoreError::Missing(id.to_string()))?;

        if entry.status == EntryStatus::Winner {
            return Ok(false);
        }

        let now = Utc::now();
        entry.status = EntryStatus::Winner;
        entry.won_at = Some(now);
        entry.last_updated_at = now;

        Ok(true)
    }

    async fn record_prize_claim(&self, claim: PrizeClaim) -> Result<(), StoreError> {
        self.inner.lock().unwrap().prize_claims.push(claim);
        Ok(())
    }

    async fn record_payment(&self, payment: PaymentRecord) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .payments
            .insert(payment.payment_confirmation_id.clone(), payment);
        Ok(())
    }
}
