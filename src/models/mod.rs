// Records as stored, partial observations as received, and the structured
// payloads carried in the text columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite primary key of `transaction_infos`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionKey {
    pub signature: String,
    pub first_notification_slot: u64,
}

impl TransactionKey {
    pub fn new(signature: impl Into<String>, first_notification_slot: u64) -> Self {
        Self {
            signature: signature.into(),
            first_notification_slot,
        }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.signature, self.first_notification_slot)
    }
}

/// Keyset cursor for time-ordered transaction scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeCursor {
    pub utc_timestamp: DateTime<Utc>,
    pub key: TransactionKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub signature: String,
    pub first_notification_slot: u64,
    pub errors: Option<String>,
    pub is_executed: Option<bool>,
    pub is_confirmed: Option<bool>,
    pub cu_requested: Option<u64>,
    pub prioritization_fees: Option<u64>,
    pub utc_timestamp: DateTime<Utc>,
    pub accounts_used: Option<String>,
    pub processed_slot: Option<u64>,
    pub supp_infos: Option<String>,
}

impl TransactionRecord {
    pub fn key(&self) -> TransactionKey {
        TransactionKey::new(self.signature.clone(), self.first_notification_slot)
    }

    pub fn cursor(&self) -> TimeCursor {
        TimeCursor {
            utc_timestamp: self.utc_timestamp,
            key: self.key(),
        }
    }

    pub fn error_entries(&self) -> Result<Vec<TransactionErrorEntry>, serde_json::Error> {
        decode_list(self.errors.as_deref())
    }

    pub fn account_uses(&self) -> Result<Vec<AccountUse>, serde_json::Error> {
        decode_list(self.accounts_used.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub slot: u64,
    pub block_hash: Option<String>,
    pub leader_identity: Option<String>,
    pub successful_transactions: Option<u64>,
    pub processed_transactions: Option<u64>,
    pub banking_stage_errors: Option<u64>,
    pub total_cu_used: Option<u64>,
    pub total_cu_requested: Option<u64>,
    pub heavily_writelocked_accounts: Option<String>,
    pub heavily_readlocked_accounts: Option<String>,
    pub supp_infos: Option<String>,
}

impl BlockRecord {
    /// `total_cu_used <= total_cu_requested` whenever both are known.
    pub fn cu_within_budget(&self) -> bool {
        match (self.total_cu_used, self.total_cu_requested) {
            (Some(used), Some(requested)) => used <= requested,
            _ => true,
        }
    }

    pub fn has_banking_errors(&self) -> bool {
        self.banking_stage_errors.unwrap_or(0) > 0
    }
}

/// Partial transaction observation. `None` means "not observed", never "clear".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFields {
    pub errors: Option<String>,
    pub is_executed: Option<bool>,
    pub is_confirmed: Option<bool>,
    pub cu_requested: Option<u64>,
    pub prioritization_fees: Option<u64>,
    /// Stored with microsecond precision. When the first observation of a
    /// key has none, the arrival time stands in until one is observed.
    pub utc_timestamp: Option<DateTime<Utc>>,
    pub accounts_used: Option<String>,
    pub processed_slot: Option<u64>,
    pub supp_infos: Option<String>,
}

impl TransactionFields {
    /// Folds a later observation into this one. Later values win per field,
    /// except `utc_timestamp` which keeps the first value seen. Returns the
    /// name of the immutable field when the two observations disagree on it.
    pub fn merge(&mut self, newer: TransactionFields) -> Option<&'static str> {
        let mut conflict = None;
        match (self.utc_timestamp, newer.utc_timestamp) {
            (Some(current), Some(incoming)) if current != incoming => {
                conflict = Some("utc_timestamp");
            }
            (None, incoming) => self.utc_timestamp = incoming,
            _ => {}
        }

        overwrite(&mut self.errors, newer.errors);
        overwrite(&mut self.is_executed, newer.is_executed);
        overwrite(&mut self.is_confirmed, newer.is_confirmed);
        overwrite(&mut self.cu_requested, newer.cu_requested);
        overwrite(&mut self.prioritization_fees, newer.prioritization_fees);
        overwrite(&mut self.accounts_used, newer.accounts_used);
        overwrite(&mut self.processed_slot, newer.processed_slot);
        overwrite(&mut self.supp_infos, newer.supp_infos);
        conflict
    }

    /// The set-once field on which the two observations disagree, if any.
    pub fn conflicts_with(&self, other: &TransactionFields) -> Option<&'static str> {
        differs(&self.utc_timestamp, &other.utc_timestamp).then_some("utc_timestamp")
    }

    pub fn has_set_once_fields(&self) -> bool {
        self.utc_timestamp.is_some()
    }

    pub fn set_errors(&mut self, entries: &[TransactionErrorEntry]) -> Result<(), serde_json::Error> {
        self.errors = Some(serde_json::to_string(entries)?);
        Ok(())
    }

    pub fn set_accounts_used(&mut self, accounts: &[AccountUse]) -> Result<(), serde_json::Error> {
        self.accounts_used = Some(serde_json::to_string(accounts)?);
        Ok(())
    }
}

/// Partial block statistics for one slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFields {
    pub block_hash: Option<String>,
    pub leader_identity: Option<String>,
    pub successful_transactions: Option<u64>,
    pub processed_transactions: Option<u64>,
    pub banking_stage_errors: Option<u64>,
    pub total_cu_used: Option<u64>,
    pub total_cu_requested: Option<u64>,
    pub heavily_writelocked_accounts: Option<String>,
    pub heavily_readlocked_accounts: Option<String>,
    pub supp_infos: Option<String>,
}

impl BlockFields {
    /// Same rule as [`TransactionFields::merge`]; `block_hash` and
    /// `leader_identity` are the set-once fields.
    pub fn merge(&mut self, newer: BlockFields) -> Option<&'static str> {
        let mut conflict = None;
        if keep_first(&mut self.block_hash, newer.block_hash) {
            conflict = Some("block_hash");
        }
        if keep_first(&mut self.leader_identity, newer.leader_identity) {
            conflict = conflict.or(Some("leader_identity"));
        }

        overwrite(&mut self.successful_transactions, newer.successful_transactions);
        overwrite(&mut self.processed_transactions, newer.processed_transactions);
        overwrite(&mut self.banking_stage_errors, newer.banking_stage_errors);
        overwrite(&mut self.total_cu_used, newer.total_cu_used);
        overwrite(&mut self.total_cu_requested, newer.total_cu_requested);
        overwrite(&mut self.heavily_writelocked_accounts, newer.heavily_writelocked_accounts);
        overwrite(&mut self.heavily_readlocked_accounts, newer.heavily_readlocked_accounts);
        overwrite(&mut self.supp_infos, newer.supp_infos);
        conflict
    }

    pub fn conflicts_with(&self, other: &BlockFields) -> Option<&'static str> {
        if differs(&self.block_hash, &other.block_hash) {
            Some("block_hash")
        } else if differs(&self.leader_identity, &other.leader_identity) {
            Some("leader_identity")
        } else {
            None
        }
    }

    pub fn has_set_once_fields(&self) -> bool {
        self.block_hash.is_some() || self.leader_identity.is_some()
    }

    pub fn set_heavily_writelocked_accounts(&mut self, accounts: &[String]) -> Result<(), serde_json::Error> {
        self.heavily_writelocked_accounts = Some(serde_json::to_string(accounts)?);
        Ok(())
    }

    pub fn set_heavily_readlocked_accounts(&mut self, accounts: &[String]) -> Result<(), serde_json::Error> {
        self.heavily_readlocked_accounts = Some(serde_json::to_string(accounts)?);
        Ok(())
    }
}

fn overwrite<T>(current: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *current = incoming;
    }
}

fn differs<T: PartialEq>(current: &Option<T>, incoming: &Option<T>) -> bool {
    matches!((current, incoming), (Some(a), Some(b)) if a != b)
}

/// Returns true when both sides are set and differ.
fn keep_first<T: PartialEq>(current: &mut Option<T>, incoming: Option<T>) -> bool {
    let Some(incoming) = incoming else {
        return false;
    };
    if let Some(existing) = current.as_ref() {
        return *existing != incoming;
    }
    *current = Some(incoming);
    false
}

fn decode_list<T: for<'de> Deserialize<'de>>(raw: Option<&str>) -> Result<Vec<T>, serde_json::Error> {
    match raw {
        Some(raw) => serde_json::from_str(raw),
        None => Ok(Vec::new()),
    }
}

/// One banking-stage rejection reason, as counted per slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionErrorEntry {
    pub error: String,
    pub slot: u64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUse {
    pub key: String,
    pub writable: bool,
}

/// An upstream observation, one JSON object per event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservationEvent {
    Transaction {
        signature: String,
        first_notification_slot: u64,
        #[serde(flatten)]
        fields: TransactionFields,
    },
    Block {
        slot: u64,
        #[serde(flatten)]
        fields: BlockFields,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    Transaction(TransactionKey),
    Block(u64),
}

impl ObservationEvent {
    pub fn key(&self) -> EventKey {
        match self {
            ObservationEvent::Transaction { signature, first_notification_slot, .. } => {
                EventKey::Transaction(TransactionKey::new(signature.clone(), *first_notification_slot))
            }
            ObservationEvent::Block { slot, .. } => EventKey::Block(*slot),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ObservationEvent::Transaction { .. } => "transaction",
            ObservationEvent::Block { .. } => "block",
        }
    }

    /// The set-once field a later event for the same key disagrees on.
    pub fn conflicts_with(&self, newer: &ObservationEvent) -> Option<&'static str> {
        match (self, newer) {
            (
                ObservationEvent::Transaction { fields, .. },
                ObservationEvent::Transaction { fields: newer_fields, .. },
            ) => fields.conflicts_with(newer_fields),
            (ObservationEvent::Block { fields, .. }, ObservationEvent::Block { fields: newer_fields, .. }) => {
                fields.conflicts_with(newer_fields)
            }
            _ => None,
        }
    }

    pub fn has_set_once_fields(&self) -> bool {
        match self {
            ObservationEvent::Transaction { fields, .. } => fields.has_set_once_fields(),
            ObservationEvent::Block { fields, .. } => fields.has_set_once_fields(),
        }
    }

    /// Folds a later event for the same key into this one. Events for
    /// different keys are left untouched and `None` is returned.
    pub fn absorb(&mut self, newer: ObservationEvent) -> Option<&'static str> {
        match (self, newer) {
            (
                ObservationEvent::Transaction { signature, first_notification_slot, fields },
                ObservationEvent::Transaction {
                    signature: newer_signature,
                    first_notification_slot: newer_slot,
                    fields: newer_fields,
                },
            ) if *signature == newer_signature && *first_notification_slot == newer_slot => {
                fields.merge(newer_fields)
            }
            (
                ObservationEvent::Block { slot, fields },
                ObservationEvent::Block { slot: newer_slot, fields: newer_fields },
            ) if *slot == newer_slot => fields.merge(newer_fields),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn transaction_merge_keeps_first_timestamp() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap();
        let mut fields = TransactionFields { utc_timestamp: Some(t1), ..Default::default() };

        let conflict = fields.merge(TransactionFields {
            utc_timestamp: Some(t2),
            is_confirmed: Some(true),
            ..Default::default()
        });

        assert_eq!(conflict, Some("utc_timestamp"));
        assert_eq!(fields.utc_timestamp, Some(t1));
        assert_eq!(fields.is_confirmed, Some(true));
    }

    #[test]
    fn disjoint_merges_commute() {
        let a = BlockFields { total_cu_used: Some(1000), ..Default::default() };
        let b = BlockFields { successful_transactions: Some(42), ..Default::default() };

        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b;
        ba.merge(a);

        assert_eq!(ab, ba);
    }

    #[test]
    fn block_hash_is_set_once() {
        let mut fields = BlockFields { block_hash: Some("abc".into()), ..Default::default() };
        assert_eq!(fields.merge(BlockFields { block_hash: Some("abc".into()), ..Default::default() }), None);
        assert_eq!(
            fields.merge(BlockFields { block_hash: Some("xyz".into()), ..Default::default() }),
            Some("block_hash")
        );
        assert_eq!(fields.block_hash.as_deref(), Some("abc"));
    }

    #[test]
    fn conflicts_are_reported_without_merging() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap();
        let first = TransactionFields { utc_timestamp: Some(t1), ..Default::default() };

        assert_eq!(first.conflicts_with(&TransactionFields::default()), None);
        assert_eq!(
            first.conflicts_with(&TransactionFields { utc_timestamp: Some(t2), ..Default::default() }),
            Some("utc_timestamp")
        );
        assert!(first.has_set_once_fields());
        assert!(!TransactionFields { is_confirmed: Some(true), ..Default::default() }.has_set_once_fields());

        let block = BlockFields { leader_identity: Some("abc".into()), ..Default::default() };
        assert_eq!(
            block.conflicts_with(&BlockFields { leader_identity: Some("xyz".into()), ..Default::default() }),
            Some("leader_identity")
        );
    }

    #[test]
    fn events_parse_from_json_lines() {
        let line = r#"{"kind":"block","slot":500,"total_cu_used":1000}"#;
        let event: ObservationEvent = serde_json::from_str(line).unwrap();
        assert_eq!(
            event,
            ObservationEvent::Block {
                slot: 500,
                fields: BlockFields { total_cu_used: Some(1000), ..Default::default() },
            }
        );
        assert_eq!(event.key(), EventKey::Block(500));
    }

    #[test]
    fn structured_columns_round_trip_through_records() {
        let mut fields = TransactionFields::default();
        fields
            .set_errors(&[TransactionErrorEntry { error: "AccountInUse".into(), slot: 7, count: 3 }])
            .unwrap();
        let record = TransactionRecord {
            signature: "A".repeat(88),
            first_notification_slot: 7,
            errors: fields.errors,
            is_executed: None,
            is_confirmed: None,
            cu_requested: None,
            prioritization_fees: None,
            utc_timestamp: Utc::now(),
            accounts_used: None,
            processed_slot: None,
            supp_infos: None,
        };

        assert_eq!(record.error_entries().unwrap()[0].count, 3);
        assert!(record.account_uses().unwrap().is_empty());
    }
}
