// Consent gate (C5): resolves per-user consent + retention + anonymization
// flags. Modeled as a pluggable trait, a swappable boolean gate in the
// ingest path — here the gate guards consent instead of signatures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::error::EngineError;

#[derive(Clone, Debug)]
pub struct ConsentRecord {
    pub location_sharing: bool,
    pub retention_days: u16,
    pub anonymize: bool,
    pub consent_given_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug)]
pub struct ConsentDecision {
    pub anonymize: bool,
}

#[async_trait]
pub trait ConsentGate: Send + Sync {
    /// Absence of a record is treated as no consent.
    async fn allow(&self, tourist_id: &str) -> Result<ConsentDecision, EngineError>;
}

/// Default in-memory consent store. The external system of record for
/// consent is out of scope; this default lets the engine run
/// standalone and gives tests a concrete, swappable implementation.
pub struct InMemoryConsentGate {
    records: DashMap<String, ConsentRecord>,
}

impl InMemoryConsentGate {
    pub fn new() -> Self {
        Self { records: DashMap::new() }
    }

    pub fn set(&self, tourist_id: impl Into<String>, record: ConsentRecord) {
        self.records.insert(tourist_id.into(), record);
    }
}

impl Default for InMemoryConsentGate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConsentGate for InMemoryConsentGate {
    async fn allow(&self, tourist_id: &str) -> Result<ConsentDecision, EngineError> {
        match self.records.get(tourist_id) {
            Some(r) if r.location_sharing && r.consent_given_at.is_some() => {
                Ok(ConsentDecision { anonymize: r.anonymize })
            }
            _ => Err(EngineError::ConsentRequired),
        }
    }
}

/// Rounds coordinates to two decimal places.
pub fn round_coordinate(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Reduces a display name to its first character followed by asterisks of
/// the original length.
pub fn mask_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => {
            let rest_len = chars.count();
            format!("{first}{}", "*".repeat(rest_len))
        }
        None => String::new(),
    }
}

/// A stable salted hash of the tourist id, used in place of the cleartext id
/// in anonymized history rows. Deterministic per (salt, id) pair so
/// the same tourist always anonymizes to the same pseudonymous id — the
/// engine never mixes anonymized and non-anonymized records for one tourist.
pub fn salted_hash_id(salt: &str, tourist_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(tourist_id.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
