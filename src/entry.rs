use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Prefix every referral code carries, followed by [`CODE_SUFFIX_LEN`]
/// random characters from [`CODE_ALPHABET`].
pub const CODE_PREFIX: &str = "TSD";
pub const CODE_SUFFIX_LEN: usize = 6;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Prize paid out on the winner transition, in major units (USD).
pub const PRIZE_MAJOR_UNITS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Active,
    Winner,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Active => "active",
            EntryStatus::Winner => "winner",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(EntryStatus::Active),
            "winner" => Some(EntryStatus::Winner),
            _ => None,
        }
    }
}

/// One paid contest registration. Created once at payment confirmation,
/// mutated only by referral attribution and the one-way winner transition,
/// never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct ContestEntry {
    pub id: String,
    pub email: String,
    pub payment_confirmation_id: String,
    pub amount_minor_units: u64,
    pub referral_code: String,
    pub referred_by_code: Option<String>,
    pub user_id: Option<String>,
    pub referrals: u64,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub won_at: Option<DateTime<Utc>>,
}

/// Fields the caller supplies for an insert. The store assigns the id and
/// both timestamps.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub email: String,
    pub payment_confirmation_id: String,
    pub amount_minor_units: u64,
    pub referral_code: String,
    pub referred_by_code: Option<String>,
    pub user_id: Option<String>,
}

impl ContestEntry {
    pub fn from_new(id: String, new: NewEntry, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email: new.email,
            payment_confirmation_id: new.payment_confirmation_id,
            amount_minor_units: new.amount_minor_units,
            referral_code: new.referral_code,
            referred_by_code: new.referred_by_code,
            user_id: new.user_id,
            referrals: 0,
            status: EntryStatus::Active,
            created_at: now,
            last_updated_at: now,
            won_at: None,
        }
    }

    /// Privacy-preserving rendering used anywhere an email leaves the system.
    pub fn masked_email(&self) -> String {
        mask_email(&self.email)
    }
}

/// Durable record of a won prize, written exactly once per winner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrizeClaim {
    pub contest_entry_id: String,
    pub prize: u64,
    pub currency: String,
    pub won_at: DateTime<Utc>,
    pub status: String,
}

impl PrizeClaim {
    pub fn new(entry_id: &str) -> Self {
        Self {
            contest_entry_id: entry_id.to_string(),
            prize: PRIZE_MAJOR_UNITS,
            currency: "USD".to_string(),
            won_at: Utc::now(),
            status: "pending_payout".to_string(),
        }
    }
}

/// Tracking record tying a gateway confirmation to the entry it funded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub payment_confirmation_id: String,
    pub email: String,
    pub amount_minor_units: u64,
    pub status: String,
    pub contest_entry_id: String,
    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn completed(entry: &ContestEntry) -> Self {
        Self {
            payment_confirmation_id: entry.payment_confirmation_id.clone(),
            email: entry.email.clone(),
            amount_minor_units: entry.amount_minor_units,
            status: "completed".to_string(),
            contest_entry_id: entry.id.clone(),
            created_at: Utc::now(),
        }
    }
}

pub fn generate_referral_code() -> String {
    let mut rng = rand::thread_rng();

    let mut code = String::with_capacity(CODE_PREFIX.len() + CODE_SUFFIX_LEN);
    code.push_str(CODE_PREFIX);
    for _ in 0..CODE_SUFFIX_LEN {
        code.push(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char);
    }

    code
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn mask_email(email: &str) -> String {
    let prefix: String = email.chars().take(3).collect();
    format!("{prefix}***")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referral_code_format() {
        let code = generate_referral_code();

        assert_eq!(code.len(), CODE_PREFIX.len() + CODE_SUFFIX_LEN);
        assert!(code.starts_with(CODE_PREFIX));
        assert!(code[CODE_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email("  Fan@Example.COM "), "fan@example.com");
    }

    #[test]
    fn email_masking() {
        assert_eq!(mask_email("fan@example.com"), "fan***");
        assert_eq!(mask_email("ab"), "ab***");
    }
}
