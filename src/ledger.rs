//! # Contest Ledger
//!
//! Owns contest entries, referral attribution, winner detection, and the
//! derived stats/leaderboard views. All state lives in the injected
//! [`EntryStore`]; the ledger itself is stateless per request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    entry::{
        ContestEntry, EntryStatus, NewEntry, PaymentRecord, PrizeClaim, generate_referral_code,
        mask_email, normalize_email,
    },
    error::AppError,
    store::{EntryStore, StoreError},
};

/// Referral count at which an entry becomes the contest winner.
pub const WIN_THRESHOLD: u64 = 1000;

/// Minimum deposit in minor units ($10).
pub const MIN_DEPOSIT_MINOR_UNITS: u64 = 1000;

pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

/// Random code generation is retried this many times before giving up.
const CODE_RETRY_LIMIT: usize = 5;

#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub email: String,
    pub payment_confirmation_id: String,
    pub amount_minor_units: u64,
    pub referred_by_code: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug)]
pub struct CreatedEntry {
    pub entry: ContestEntry,
    pub referral_link: String,
}

/// Outcome of a referral attribution. A lookup miss is a deliberate no-op,
/// distinct from a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution {
    Credited { referrals: u64, new_winner: bool },
    UnknownCode,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestStats {
    pub total_users: u64,
    /// Sum of deposits converted to major units, rounded to nearest.
    pub total_deposits: u64,
    pub average_deposit: u64,
    /// Referral count of the current leader, 0 when the contest is empty.
    pub current_leader: u64,
    pub leader_email: String,
    pub has_winner: bool,
    pub winner_email: Option<String>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRow {
    pub rank: u32,
    pub email: String,
    pub referrals: u64,
    pub referral_code: String,
    pub status: EntryStatus,
    pub joined: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralOwner {
    pub referral_code: String,
    pub owner_email: String,
    pub referrals: u64,
    pub status: EntryStatus,
}

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn EntryStore>,
    referral_base_url: String,
}

impl Ledger {
    pub fn new(store: Arc<dyn EntryStore>, referral_base_url: String) -> Self {
        Self {
            store,
            referral_base_url,
        }
    }

    pub fn referral_link(&self, code: &str) -> String {
        format!("{}/ref/{}", self.referral_base_url, code)
    }

    /// Records one paid entry. The payment confirmation id is taken on
    /// trust; the gateway authorized it out of band before this is called.
    pub async fn create_entry(&self, request: EntryRequest) -> Result<CreatedEntry, AppError> {
        if !request.email.contains('@') {
            return Err(AppError::Validation("a valid email is required".to_string()));
        }
        if request.amount_minor_units < MIN_DEPOSIT_MINOR_UNITS {
            return Err(AppError::Validation(format!(
                "minimum deposit is {MIN_DEPOSIT_MINOR_UNITS} minor units"
            )));
        }
        if request.payment_confirmation_id.trim().is_empty() {
            return Err(AppError::Validation(
                "a payment confirmation id is required".to_string(),
            ));
        }

        let email = normalize_email(&request.email);
        if self.store.find_by_email(&email).await?.is_some() {
            return Err(AppError::DuplicateEmail);
        }

        let mut inserted = None;
        for _ in 0..CODE_RETRY_LIMIT {
            let new = NewEntry {
                email: email.clone(),
                payment_confirmation_id: request.payment_confirmation_id.clone(),
                amount_minor_units: request.amount_minor_units,
                referral_code: generate_referral_code(),
                referred_by_code: request.referred_by_code.clone(),
                user_id: request.user_id.clone(),
            };

            match self.store.insert(new).await {
                Ok(entry) => {
                    inserted = Some(entry);
                    break;
                }
                Err(StoreError::CodeTaken) => continue,
                Err(StoreError::EmailTaken) => return Err(AppError::DuplicateEmail),
                Err(err) => return Err(err.into()),
            }
        }

        let entry = inserted.ok_or_else(|| {
            AppError::Internal("could not generate a unique referral code".to_string())
        })?;

        if let Err(err) = self
            .store
            .record_payment(PaymentRecord::completed(&entry))
            .await
        {
            // Tracking record only; the entry itself is already durable.
            warn!(entry_id = %entry.id, "failed to record payment: {err}");
        }

        if let Some(code) = &entry.referred_by_code {
            // Best effort: a bad or unavailable referral never blocks entry.
            match self.attribute_referral(code).await {
                Ok(Attribution::Credited {
                    referrals,
                    new_winner,
                }) => {
                    info!(%code, referrals, new_winner, "referral credited");
                }
                Ok(Attribution::UnknownCode) => {
                    info!(%code, "referral code not found, no credit given");
                }
                Err(err) => {
                    warn!(%code, "referral attribution failed: {err}");
                }
            }
        }

        let referral_link = self.referral_link(&entry.referral_code);

        Ok(CreatedEntry {
            entry,
            referral_link,
        })
    }

    /// Credits the owner of `code` with one referral. The threshold check
    /// uses the store-confirmed post-increment value, so two concurrent
    /// crossings cannot both miss it.
    pub async fn attribute_referral(&self, code: &str) -> Result<Attribution, AppError> {
        let Some(entry) = self.store.find_by_code(code).await? else {
            return Ok(Attribution::UnknownCode);
        };

        let referrals = self.store.increment_referrals(&entry.id).await?;

        let mut new_winner = false;
        if referrals >= WIN_THRESHOLD {
            new_winner = self.mark_winner(&entry.id).await?;
        }

        Ok(Attribution::Credited {
            referrals,
            new_winner,
        })
    }

    /// Idempotent winner transition. Returns whether this call performed
    /// it; only the performing call records the prize claim.
    pub async fn mark_winner(&self, entry_id: &str) -> Result<bool, AppError> {
        if self.store.get(entry_id).await?.is_none() {
            return Err(AppError::NotFound);
        }

        let transitioned = self.store.mark_winner(entry_id).await?;
        if transitioned {
            info!(entry_id, "winner detected");
            self.store
                .record_prize_claim(PrizeClaim::new(entry_id))
                .await?;
        }

        Ok(transitioned)
    }

    /// Full-collection scan and aggregate. Leader ties are broken by the
    /// earliest entry, matching the leaderboard.
    pub async fn stats(&self) -> Result<ContestStats, AppError> {
        let entries = self.store.list_all().await?;

        let total_users = entries.len() as u64;
        let total_minor: u64 = entries.iter().map(|e| e.amount_minor_units).sum();

        let leader = entries.iter().max_by(|a, b| {
            a.referrals
                .cmp(&b.referrals)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        let winner = entries.iter().find(|e| e.status == EntryStatus::Winner);

        let average_deposit = if total_users > 0 {
            (total_minor / total_users + 50) / 100
        } else {
            0
        };

        Ok(ContestStats {
            total_users,
            total_deposits: (total_minor + 50) / 100,
            average_deposit,
            current_leader: leader.map(|e| e.referrals).unwrap_or(0),
            leader_email: leader
                .map(|e| e.masked_email())
                .unwrap_or_else(|| "None".to_string()),
            has_winner: winner.is_some(),
            winner_email: winner.map(|e| e.masked_email()),
            last_updated: Utc::now(),
        })
    }

    /// Entries with at least one referral, best first, earlier entry
    /// winning ties.
    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardRow>, AppError> {
        let mut entries: Vec<ContestEntry> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .filter(|e| e.referrals > 0)
            .collect();

        entries.sort_by(|a, b| {
            b.referrals
                .cmp(&a.referrals)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        Ok(entries
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, e)| LeaderboardRow {
                rank: i as u32 + 1,
                email: mask_email(&e.email),
                referrals: e.referrals,
                referral_code: e.referral_code,
                status: e.status,
                joined: e.created_at.format("%Y-%m-%d").to_string(),
            })
            .collect())
    }

    pub async fn is_email_entered(&self, email: &str) -> Result<bool, AppError> {
        let email = normalize_email(email);

        Ok(self.store.find_by_email(&email).await?.is_some())
    }

    /// Pre-entry validation of a referral code, exposing only the masked
    /// owner.
    pub async fn find_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<ReferralOwner>, AppError> {
        Ok(self.store.find_by_code(code).await?.map(|e| ReferralOwner {
            referral_code: e.referral_code,
            owner_email: mask_email(&e.email),
            referrals: e.referrals,
            status: e.status,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::sleep;

    use super::*;
    use crate::store::MemoryStore;

    /// Store with its backend down: every call fails.
    struct DownStore;

    fn down() -> StoreError {
        StoreError::Unavailable("connection refused".to_string())
    }

    #[async_trait]
    impl EntryStore for DownStore {
        async fn insert(&self, _new: NewEntry) -> Result<ContestEntry, StoreError> {
            Err(down())
        }

        async fn get(&self, _id: &str) -> Result<Option<ContestEntry>, StoreError> {
            Err(down())
        }

        async fn find_by_email(&self, _email: &str) -> Result<Option<ContestEntry>, StoreError> {
            Err(down())
        }

        async fn find_by_code(&self, _code: &str) -> Result<Option<ContestEntry>, StoreError> {
            Err(down())
        }

        async fn list_all(&self) -> Result<Vec<ContestEntry>, StoreError> {
            Err(down())
        }

        async fn increment_referrals(&self, _id: &str) -> Result<u64, StoreError> {
            Err(down())
        }

        async fn mark_winner(&self, _id: &str) -> Result<bool, StoreError> {
            Err(down())
        }

        async fn record_prize_claim(&self, _claim: PrizeClaim) -> Result<(), StoreError> {
            Err(down())
        }

        async fn record_payment(&self, _payment: PaymentRecord) -> Result<(), StoreError> {
            Err(down())
        }
    }

    /// Store that fails a configured number of writes, then recovers. A
    /// failed write leaves no state behind, the same guarantee the Redis
    /// store's error-path cleanup provides.
    struct FlakyStore {
        inner: MemoryStore,
        insert_failures: AtomicUsize,
        winner_failures: AtomicUsize,
    }

    impl FlakyStore {
        fn new(insert_failures: usize, winner_failures: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                insert_failures: AtomicUsize::new(insert_failures),
                winner_failures: AtomicUsize::new(winner_failures),
            }
        }

        fn take_failure(counter: &AtomicUsize) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl EntryStore for FlakyStore {
        async fn insert(&self, new: NewEntry) -> Result<ContestEntry, StoreError> {
            if Self::take_failure(&self.insert_failures) {
                return Err(StoreError::Unavailable("write failed".to_string()));
            }
            self.inner.insert(new).await
        }

        async fn get(&self, id: &str) -> Result<Option<ContestEntry>, StoreError> {
            self.inner.get(id).await
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<ContestEntry>, StoreError> {
            self.inner.find_by_email(email).await
        }

        async fn find_by_code(&self, code: &str) -> Result<Option<ContestEntry>, StoreError> {
            self.inner.find_by_code(code).await
        }

        async fn list_all(&self) -> Result<Vec<ContestEntry>, StoreError> {
            self.inner.list_all().await
        }

        async fn increment_referrals(&self, id: &str) -> Result<u64, StoreError> {
            self.inner.increment_referrals(id).await
        }

        async fn mark_winner(&self, id: &str) -> Result<bool, StoreError> {
            if Self::take_failure(&self.winner_failures) {
                return Err(StoreError::Unavailable("write failed".to_string()));
            }
            self.inner.mark_winner(id).await
        }

        async fn record_prize_claim(&self, claim: PrizeClaim) -> Result<(), StoreError> {
            self.inner.record_prize_claim(claim).await
        }

        async fn record_payment(&self, payment: PaymentRecord) -> Result<(), StoreError> {
            self.inner.record_payment(payment).await
        }
    }

    fn test_ledger() -> (Ledger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), "https://thesportsdugout.com".to_string());

        (ledger, store)
    }

    fn request(email: &str) -> EntryRequest {
        EntryRequest {
            email: email.to_string(),
            payment_confirmation_id: format!("pi_{email}"),
            amount_minor_units: 1500,
            referred_by_code: None,
            user_id: None,
        }
    }

    fn referred(email: &str, code: &str) -> EntryRequest {
        EntryRequest {
            referred_by_code: Some(code.to_string()),
            ..request(email)
        }
    }

    #[tokio::test]
    async fn distinct_emails_get_unique_codes() {
        let (ledger, _) = test_ledger();

        let mut codes = HashSet::new();
        for i in 0..20 {
            let created = ledger.create_entry(request(&format!("fan{i}@x.com"))).await.unwrap();

            assert!(created.entry.referral_code.starts_with("TSD"));
            assert!(codes.insert(created.entry.referral_code));
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_case_insensitively() {
        let (ledger, store) = test_ledger();

        ledger.create_entry(request("Fan@X.com")).await.unwrap();
        let err = ledger.create_entry(request("fan@x.COM")).await.unwrap_err();

        assert!(matches!(err, AppError::DuplicateEmail));
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_bad_input_before_any_store_call() {
        let (ledger, store) = test_ledger();

        let bad_email = EntryRequest {
            email: "not-an-email".to_string(),
            ..request("a@x.com")
        };
        assert!(matches!(
            ledger.create_entry(bad_email).await.unwrap_err(),
            AppError::Validation(_)
        ));

        let low_amount = EntryRequest {
            amount_minor_units: 999,
            ..request("a@x.com")
        };
        assert!(matches!(
            ledger.create_entry(low_amount).await.unwrap_err(),
            AppError::Validation(_)
        ));

        let no_payment = EntryRequest {
            payment_confirmation_id: "  ".to_string(),
            ..request("a@x.com")
        };
        assert!(matches!(
            ledger.create_entry(no_payment).await.unwrap_err(),
            AppError::Validation(_)
        ));

        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn entry_records_payment_and_referral_link() {
        let (ledger, store) = test_ledger();

        let created = ledger.create_entry(request("fan@x.com")).await.unwrap();

        assert_eq!(
            created.referral_link,
            format!(
                "https://thesportsdugout.com/ref/{}",
                created.entry.referral_code
            )
        );

        let payment = store.payment_for("pi_fan@x.com").unwrap();
        assert_eq!(payment.status, "completed");
        assert_eq!(payment.contest_entry_id, created.entry.id);
    }

    #[tokio::test]
    async fn unknown_code_attribution_is_a_noop() {
        let (ledger, store) = test_ledger();

        let created = ledger.create_entry(request("a@x.com")).await.unwrap();
        let outcome = ledger.attribute_referral("TSDZZZZZZ").await.unwrap();

        assert_eq!(outcome, Attribution::UnknownCode);
        let entry = store.get(&created.entry.id).await.unwrap().unwrap();
        assert_eq!(entry.referrals, 0);
    }

    #[tokio::test]
    async fn unknown_referrer_does_not_block_entry_creation() {
        let (ledger, store) = test_ledger();

        let created = ledger
            .create_entry(referred("b@x.com", "TSDZZZZZZ"))
            .await
            .unwrap();

        assert_eq!(created.entry.referred_by_code.as_deref(), Some("TSDZZZZZZ"));
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    // A enters, then B enters naming A's code.
    #[tokio::test]
    async fn first_referral_scenario() {
        let (ledger, store) = test_ledger();

        let a = ledger.create_entry(request("a@x.com")).await.unwrap();
        assert_eq!(a.entry.referrals, 0);
        assert_eq!(a.entry.status, EntryStatus::Active);

        let b = ledger
            .create_entry(referred("b@x.com", &a.entry.referral_code))
            .await
            .unwrap();
        assert_eq!(
            b.entry.referred_by_code.as_deref(),
            Some(a.entry.referral_code.as_str())
        );
        assert_eq!(b.entry.referrals, 0);

        let stored_a = store.get(&a.entry.id).await.unwrap().unwrap();
        assert_eq!(stored_a.referrals, 1);

        let rows = ledger.leaderboard(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[0].email, mask_email("a@x.com"));
        assert_eq!(rows[0].referrals, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_attributions_lose_no_updates() {
        let (ledger, store) = test_ledger();

        let created = ledger.create_entry(request("a@x.com")).await.unwrap();
        let code = created.entry.referral_code.clone();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let ledger = ledger.clone();
            let code = code.clone();
            handles.push(tokio::spawn(async move {
                ledger.attribute_referral(&code).await.unwrap()
            }));
        }
        for handle in handles {
            assert!(matches!(
                handle.await.unwrap(),
                Attribution::Credited { .. }
            ));
        }

        let entry = store.get(&created.entry.id).await.unwrap().unwrap();
        assert_eq!(entry.referrals, 100);
        assert_eq!(entry.status, EntryStatus::Active);
        assert_eq!(store.prize_claim_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_threshold_crossing_declares_one_winner() {
        let (ledger, store) = test_ledger();

        let created = ledger.create_entry(request("a@x.com")).await.unwrap();
        let code = created.entry.referral_code.clone();

        let mut handles = Vec::new();
        for _ in 0..WIN_THRESHOLD {
            let ledger = ledger.clone();
            let code = code.clone();
            handles.push(tokio::spawn(async move {
                ledger.attribute_referral(&code).await.unwrap()
            }));
        }

        let mut winner_events = 0;
        for handle in handles {
            if let Attribution::Credited {
                new_winner: true, ..
            } = handle.await.unwrap()
            {
                winner_events += 1;
            }
        }

        assert_eq!(winner_events, 1);
        assert_eq!(store.prize_claim_count(), 1);

        let entry = store.get(&created.entry.id).await.unwrap().unwrap();
        assert_eq!(entry.referrals, WIN_THRESHOLD);
        assert_eq!(entry.status, EntryStatus::Winner);
        assert!(entry.won_at.is_some());
    }

    #[tokio::test]
    async fn mark_winner_is_idempotent() {
        let (ledger, store) = test_ledger();

        let created = ledger.create_entry(request("a@x.com")).await.unwrap();

        assert!(ledger.mark_winner(&created.entry.id).await.unwrap());
        assert!(!ledger.mark_winner(&created.entry.id).await.unwrap());

        assert_eq!(store.prize_claim_count(), 1);
        let entry = store.get(&created.entry.id).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Winner);
    }

    #[tokio::test]
    async fn mark_winner_unknown_entry_is_not_found() {
        let (ledger, _) = test_ledger();

        let err = ledger.mark_winner("nope").await.unwrap_err();

        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn threshold_crossing_fires_exactly_once() {
        let (ledger, store) = test_ledger();

        let created = ledger.create_entry(request("a@x.com")).await.unwrap();
        let code = &created.entry.referral_code;

        for _ in 0..WIN_THRESHOLD - 1 {
            ledger.attribute_referral(code).await.unwrap();
        }
        assert!(!ledger.stats().await.unwrap().has_winner);

        let outcome = ledger.attribute_referral(code).await.unwrap();
        assert_eq!(
            outcome,
            Attribution::Credited {
                referrals: WIN_THRESHOLD,
                new_winner: true
            }
        );

        let stats = ledger.stats().await.unwrap();
        assert!(stats.has_winner);
        assert_eq!(stats.winner_email.as_deref(), Some("a@x***"));

        // One past the threshold: credit still counts, no second event.
        let outcome = ledger.attribute_referral(code).await.unwrap();
        assert_eq!(
            outcome,
            Attribution::Credited {
                referrals: WIN_THRESHOLD + 1,
                new_winner: false
            }
        );
        assert_eq!(store.prize_claim_count(), 1);
    }

    #[tokio::test]
    async fn stats_on_empty_store() {
        let (ledger, _) = test_ledger();

        let stats = ledger.stats().await.unwrap();

        assert_eq!(stats.total_users, 0);
        assert_eq!(stats.total_deposits, 0);
        assert_eq!(stats.average_deposit, 0);
        assert_eq!(stats.current_leader, 0);
        assert_eq!(stats.leader_email, "None");
        assert!(!stats.has_winner);
        assert!(stats.winner_email.is_none());
    }

    #[tokio::test]
    async fn stats_aggregates_and_masks() {
        let (ledger, _) = test_ledger();

        let a = ledger.create_entry(request("alice@x.com")).await.unwrap();
        ledger.create_entry(request("bob@x.com")).await.unwrap();
        ledger
            .attribute_referral(&a.entry.referral_code)
            .await
            .unwrap();

        let stats = ledger.stats().await.unwrap();

        assert_eq!(stats.total_users, 2);
        // 2 x 1500 cents -> $30 total, $15 average.
        assert_eq!(stats.total_deposits, 30);
        assert_eq!(stats.average_deposit, 15);
        assert_eq!(stats.current_leader, 1);
        assert_eq!(stats.leader_email, "ali***");
    }

    #[tokio::test]
    async fn leaderboard_orders_and_truncates() {
        let (ledger, _) = test_ledger();

        let a = ledger.create_entry(request("a@x.com")).await.unwrap();
        sleep(Duration::from_millis(5)).await;
        let b = ledger.create_entry(request("b@x.com")).await.unwrap();
        sleep(Duration::from_millis(5)).await;
        let c = ledger.create_entry(request("c@x.com")).await.unwrap();
        ledger.create_entry(request("d@x.com")).await.unwrap();

        for _ in 0..3 {
            ledger.attribute_referral(&b.entry.referral_code).await.unwrap();
        }
        for _ in 0..2 {
            ledger.attribute_referral(&a.entry.referral_code).await.unwrap();
            ledger.attribute_referral(&c.entry.referral_code).await.unwrap();
        }

        let rows = ledger.leaderboard(3).await.unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].referral_code, b.entry.referral_code);
        // a and c tie at 2; a entered first so a ranks higher.
        assert_eq!(rows[1].referral_code, a.entry.referral_code);
        assert_eq!(rows[2].referral_code, c.entry.referral_code);
        assert_eq!(
            rows.iter().map(|r| r.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(rows.iter().all(|r| r.referrals > 0));

        let truncated = ledger.leaderboard(2).await.unwrap();
        assert_eq!(truncated.len(), 2);
    }

    #[tokio::test]
    async fn store_outage_is_surfaced_not_swallowed() {
        let ledger = Ledger::new(
            Arc::new(DownStore),
            "https://thesportsdugout.com".to_string(),
        );

        // An unavailable store must never read as "not entered" or as an
        // unknown code.
        assert!(matches!(
            ledger.is_email_entered("fan@x.com").await.unwrap_err(),
            AppError::StoreUnavailable(_)
        ));
        assert!(matches!(
            ledger.attribute_referral("TSDAAAAAA").await.unwrap_err(),
            AppError::StoreUnavailable(_)
        ));
        assert!(matches!(
            ledger.stats().await.unwrap_err(),
            AppError::StoreUnavailable(_)
        ));
        assert!(matches!(
            ledger.create_entry(request("fan@x.com")).await.unwrap_err(),
            AppError::StoreUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn failed_insert_does_not_consume_the_email() {
        let store = Arc::new(FlakyStore::new(1, 0));
        let ledger = Ledger::new(store.clone(), "https://thesportsdugout.com".to_string());

        let err = ledger.create_entry(request("fan@x.com")).await.unwrap_err();
        assert!(matches!(err, AppError::StoreUnavailable(_)));

        // The retry must succeed; a transient failure is not "you already
        // entered".
        let created = ledger.create_entry(request("fan@x.com")).await.unwrap();
        assert_eq!(created.entry.email, "fan@x.com");
    }

    #[tokio::test]
    async fn failed_winner_write_keeps_the_transition_retryable() {
        let store = Arc::new(FlakyStore::new(0, 1));
        let ledger = Ledger::new(store.clone(), "https://thesportsdugout.com".to_string());

        let created = ledger.create_entry(request("fan@x.com")).await.unwrap();

        let err = ledger.mark_winner(&created.entry.id).await.unwrap_err();
        assert!(matches!(err, AppError::StoreUnavailable(_)));
        assert_eq!(store.inner.prize_claim_count(), 0);

        // Once the store recovers the transition still happens, exactly
        // once.
        assert!(ledger.mark_winner(&created.entry.id).await.unwrap());
        assert_eq!(store.inner.prize_claim_count(), 1);
        assert!(!ledger.mark_winner(&created.entry.id).await.unwrap());
    }

    #[tokio::test]
    async fn email_existence_check_is_case_insensitive() {
        let (ledger, _) = test_ledger();

        ledger.create_entry(request("fan@x.com")).await.unwrap();

        assert!(ledger.is_email_entered("FAN@X.COM").await.unwrap());
        assert!(!ledger.is_email_entered("other@x.com").await.unwrap());
    }

    #[tokio::test]
    async fn referral_code_lookup_masks_owner() {
        let (ledger, _) = test_ledger();

        let created = ledger.create_entry(request("fan@x.com")).await.unwrap();

        let owner = ledger
            .find_by_referral_code(&created.entry.referral_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner.owner_email, "fan***");
        assert_eq!(owner.referral_code, created.entry.referral_code);

        assert!(ledger
            .find_by_referral_code("TSDZZZZZZ")
            .await
            .unwrap()
            .is_none());
    }
}
