//! # Redis
//!
//! Durable entry store.
//!
//! Core purpose is to hold contest entries and the uniqueness reservations
//! backing them. Also used for the atomic referral increment, the one
//! operation where concurrency correctness is load-bearing.
//!
//! ## Schema
//!
//! - `contest:entry:{id}`: hash, one per [`ContestEntry`], numeric
//!   `referrals` field for `HINCRBY`
//! - `contest:email:{email}`: normalized email -> id, written `SET NX` so
//!   the uniqueness check is a store-level reservation rather than a
//!   check-then-act in the handler
//! - `contest:code:{code}`: referral code -> id, written `SET NX` to detect
//!   generation collisions
//! - `contest:entries`: set of all ids, scanned for stats/leaderboard
//! - `contest:won:{id}`: `SET NX` guard making the winner transition a
//!   one-shot
//! - `contest:winners`: list of prize-claim records, JSON
//! - `contest:payment:{confirmationId}`: payment tracking record, JSON

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{
    AsyncCommands, Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use uuid::Uuid;

use crate::{
    entry::{ContestEntry, NewEntry, PaymentRecord, PrizeClaim},
    store::{EntryStore, StoreError},
};

const ENTRY_IDS_KEY: &str = "contest:entries";
const WINNERS_KEY: &str = "contest:winners";

fn entry_key(id: &str) -> String {
    format!("contest:entry:{id}")
}

fn email_key(email: &str) -> String {
    format!("contest:email:{email}")
}

fn code_key(code: &str) -> String {
    format!("contest:code:{code}")
}

fn won_guard_key(id: &str) -> String {
    format!("contest:won:{id}")
}

fn payment_key(confirmation_id: &str) -> String {
    format!("contest:payment:{confirmation_id}")
}

pub async fn init_redis(redis_url: &str) -> ConnectionManager {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100))
        .set_response_timeout(Duration::from_secs(2));

    let client = Client::open(redis_url).unwrap();
    let connection_manager = client
        .get_connection_manager_with_config(config)
        .await
        .unwrap();

    connection_manager
}

pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

fn unavailable(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

async fn write_entry(
    conn: &mut ConnectionManager,
    entry: &ContestEntry,
) -> Result<(), redis::RedisError> {
    let _: () = conn
        .hset_multiple(entry_key(&entry.id), &hash_fields(entry))
        .await?;
    let _: () = conn.sadd(ENTRY_IDS_KEY, &entry.id).await?;

    Ok(())
}

fn hash_fields(entry: &ContestEntry) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("email", entry.email.clone()),
        (
            "payment_confirmation_id",
            entry.payment_confirmation_id.clone(),
        ),
        ("amount_minor_units", entry.amount_minor_units.to_string()),
        ("referral_code", entry.referral_code.clone()),
        ("referrals", entry.referrals.to_string()),
        ("status", entry.status.as_str().to_string()),
        ("created_at", entry.created_at.timestamp_millis().to_string()),
        (
            "last_updated_at",
            entry.last_updated_at.timestamp_millis().to_string(),
        ),
    ];

    if let Some(code) = &entry.referred_by_code {
        fields.push(("referred_by_code", code.clone()));
    }
    if let Some(user_id) = &entry.user_id {
        fields.push(("user_id", user_id.clone()));
    }
    if let Some(won_at) = entry.won_at {
        fields.push(("won_at", won_at.timestamp_millis().to_string()));
    }

    fields
}

fn parse_millis(map: &HashMap<String, String>, field: &str) -> Option<DateTime<Utc>> {
    map.get(field)?
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

fn entry_from_hash(id: &str, map: HashMap<String, String>) -> Result<ContestEntry, StoreError> {
    let corrupt = || StoreError::Unavailable(format!("corrupt entry record {id}"));

    Ok(ContestEntry {
        id: id.to_string(),
        email: map.get("email").cloned().ok_or_else(corrupt)?,
        payment_confirmation_id: map
            .get("payment_confirmation_id")
            .cloned()
            .ok_or_else(corrupt)?,
        amount_minor_units: map
            .get("amount_minor_units")
            .and_then(|v| v.parse().ok())
            .ok_or_else(corrupt)?,
        referral_code: map.get("referral_code").cloned().ok_or_else(corrupt)?,
        referred_by_code: map.get("referred_by_code").cloned(),
        user_id: map.get("user_id").cloned(),
        referrals: map
            .get("referrals")
            .and_then(|v| v.parse().ok())
            .ok_or_else(corrupt)?,
        status: map
            .get("status")
            .and_then(|v| crate::entry::EntryStatus::parse(v))
            .ok_or_else(corrupt)?,
        created_at: parse_millis(&map, "created_at").ok_or_else(corrupt)?,
        last_updated_at: parse_millis(&map, "last_updated_at").ok_or_else(corrupt)?,
        won_at: parse_millis(&map, "won_at"),
    })
}

#[async_trait]
impl EntryStore for RedisStore {
    async fn insert(&self, new: NewEntry) -> Result<ContestEntry, StoreError> {
        let mut conn = self.connection.clone();
        let id = Uuid::new_v4().to_string();

        let claimed: bool = conn
            .set_nx(email_key(&new.email), &id)
            .await
            .map_err(unavailable)?;
        if !claimed {
            return Err(StoreError::EmailTaken);
        }

        let claimed: bool = conn
            .set_nx(code_key(&new.referral_code), &id)
            .await
            .map_err(unavailable)?;
        if !claimed {
            // Release the email reservation so the caller can retry with a
            // fresh code.
            let _: () = conn
                .del(email_key(&new.email))
                .await
                .map_err(unavailable)?;
            return Err(StoreError::CodeTaken);
        }

        let entry = ContestEntry::from_new(id, new, Utc::now());

        if let Err(err) = write_entry(&mut conn, &entry).await {
            // Reservations pointing at a record that was never written
            // would lock the email out forever; drop them so the caller
            // can retry.
            let _: Result<(), redis::RedisError> = conn
                .del(&[email_key(&entry.email), code_key(&entry.referral_code)])
                .await;
            return Err(unavailable(err));
        }

        #[cfg(feature = "verbose")]
        println!("Inserted contest entry {}", entry.id);

        Ok(entry)
    }

    async fn get(&self, id: &str) -> Result<Option<ContestEntry>, StoreError> {
        let mut conn = self.connection.clone();

        let map: HashMap<String, String> =
            conn.hgetall(entry_key(id)).await.map_err(unavailable)?;
        if map.is_empty() {
            return Ok(None);
        }

        entry_from_hash(id, map).map(Some)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<ContestEntry>, StoreError> {
        let mut conn = self.connection.clone();

        let id: Option<String> = conn.get(email_key(email)).await.map_err(unavailable)?;
        match id {
            Some(id) => self.get(&id).await,
            None => Ok(None),
        }
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<ContestEntry>, StoreError> {
        let mut conn = self.connection.clone();

        let id: Option<String> = conn.get(code_key(code)).await.map_err(unavailable)?;
        match id {
            Some(id) => self.get(&id).await,
            None => Ok(None),
        }
    }

    async fn list_all(&self) -> Result<Vec<ContestEntry>, StoreError> {
        let mut conn = self.connection.clone();

        let ids: Vec<String> = conn.smembers(ENTRY_IDS_KEY).await.map_err(unavailable)?;

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.get(&id).await? {
                entries.push(entry);
            }
        }

        Ok(entries)
    }

    async fn increment_referrals(&self, id: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();

        // Entries are never deleted, so HINCRBY creating a hash from thin
        // air would only mean the id never existed.
        let exists: bool = conn.exists(entry_key(id)).await.map_err(unavailable)?;
        if !exists {
            return Err(StoreError::Missing(id.to_string()));
        }

        let referrals: u64 = conn
            .hincr(entry_key(id), "referrals", 1)
            .await
            .map_err(unavailable)?;
        let _: () = conn
            .hset(
                entry_key(id),
                "last_updated_at",
                Utc::now().timestamp_millis(),
            )
            .await
            .map_err(unavailable)?;

        Ok(referrals)
    }

    async fn mark_winner(&self, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();

        let exists: bool = conn.exists(entry_key(id)).await.map_err(unavailable)?;
        if !exists {
            return Err(StoreError::Missing(id.to_string()));
        }

        let first: bool = conn
            .set_nx(won_guard_key(id), 1)
            .await
            .map_err(unavailable)?;
        if !first {
            return Ok(false);
        }

        let now = Utc::now().timestamp_millis();
        let status_write: Result<(), redis::RedisError> = conn
            .hset_multiple(
                entry_key(id),
                &[
                    ("status", "winner".to_string()),
                    ("won_at", now.to_string()),
                    ("last_updated_at", now.to_string()),
                ],
            )
            .await;

        if let Err(err) = status_write {
            // A burned guard with no status write would leave the contest
            // without a winner; release it so the next crossing retries.
            let _: Result<(), redis::RedisError> = conn.del(won_guard_key(id)).await;
            return Err(unavailable(err));
        }

        Ok(true)
    }

    async fn record_prize_claim(&self, claim: PrizeClaim) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();

        let json = serde_json::to_string(&claim)
            .map_err(|e| StoreError::Unavailable(format!("serialize prize claim: {e}")))?;
        let _: () = conn.rpush(WINNERS_KEY, json).await.map_err(unavailable)?;

        Ok(())
    }

    async fn record_payment(&self, payment: PaymentRecord) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();

        let json = serde_json::to_string(&payment)
            .map_err(|e| StoreError::Unavailable(format!("serialize payment record: {e}")))?;
        let _: () = conn
            .set(payment_key(&payment.payment_confirmation_id), json)
            .await
            .map_err(unavailable)?;

        Ok(())
    }
}
