use bs58;
use thiserror::Error;
use crate::models::{BlockFields, ObservationEvent, TransactionFields};

/// Base58 signatures of 64 bytes encode to 87 or 88 characters.
pub const SIGNATURE_MIN_LEN: usize = 87;
pub const SIGNATURE_MAX_LEN: usize = 88;
/// Base58 hashes and pubkeys of 32 bytes encode to at most 44 characters.
pub const HASH_MAX_LEN: usize = 44;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid transaction signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid {field}: {value}")]
    InvalidHash { field: &'static str, value: String },

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: u64 },
}

fn is_base58(value: &str) -> bool {
    bs58::decode(value).into_vec().is_ok()
}

pub fn validate_signature(signature: &str) -> Result<(), ValidationError> {
    if signature.trim().is_empty() {
        return Err(ValidationError::MissingParameter("signature".to_string()));
    }

    let len = signature.len();
    if !(SIGNATURE_MIN_LEN..=SIGNATURE_MAX_LEN).contains(&len) || !is_base58(signature) {
        return Err(ValidationError::InvalidSignature(signature.to_string()));
    }

    Ok(())
}

/// Checks a block hash or leader identity column value.
pub fn validate_hash(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || value.len() > HASH_MAX_LEN || !is_base58(value) {
        return Err(ValidationError::InvalidHash {
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}

/// Slots and counters are unsigned in the API but stored as SQLite INTEGER (i64).
pub fn validate_integer(field: &'static str, value: u64) -> Result<i64, ValidationError> {
    i64::try_from(value).map_err(|_| ValidationError::OutOfRange { field, value })
}

pub fn validate_optional_integer(
    field: &'static str,
    value: Option<u64>,
) -> Result<Option<i64>, ValidationError> {
    value.map(|v| validate_integer(field, v)).transpose()
}

/// Every check a transaction write runs before it touches the database.
pub fn validate_transaction_observation(
    signature: &str,
    first_notification_slot: u64,
    fields: &TransactionFields,
) -> Result<(), ValidationError> {
    validate_signature(signature)?;
    validate_integer("first_notification_slot", first_notification_slot)?;
    validate_optional_integer("cu_requested", fields.cu_requested)?;
    validate_optional_integer("prioritization_fees", fields.prioritization_fees)?;
    validate_optional_integer("processed_slot", fields.processed_slot)?;
    Ok(())
}

/// Every check a block write runs before it touches the database.
pub fn validate_block_observation(slot: u64, fields: &BlockFields) -> Result<(), ValidationError> {
    validate_integer("slot", slot)?;
    if let Some(hash) = &fields.block_hash {
        validate_hash("block_hash", hash)?;
    }
    if let Some(leader) = &fields.leader_identity {
        validate_hash("leader_identity", leader)?;
    }
    validate_optional_integer("successful_transactions", fields.successful_transactions)?;
    validate_optional_integer("processed_transactions", fields.processed_transactions)?;
    validate_optional_integer("banking_stage_errors", fields.banking_stage_errors)?;
    validate_optional_integer("total_cu_used", fields.total_cu_used)?;
    validate_optional_integer("total_cu_requested", fields.total_cu_requested)?;
    Ok(())
}

pub fn validate_observation(event: &ObservationEvent) -> Result<(), ValidationError> {
    match event {
        ObservationEvent::Transaction {
            signature,
            first_notification_slot,
            fields,
        } => validate_transaction_observation(signature, *first_notification_slot, fields),
        ObservationEvent::Block { slot, fields } => validate_block_observation(*slot, fields),
    }
}
