//! Key encoding for the `RocksDB` column families.
//!
//! User-scoped index keys are `user_id (16 bytes) || ulid (16 bytes)`. ULIDs
//! sort by creation time, so a prefix scan yields a user's records oldest
//! first.

use pixcredit_core::{OperationId, TransactionId, UserId};

const USER_KEY_LEN: usize = 16;
const INDEX_KEY_LEN: usize = 32;

/// Account key.
#[must_use]
pub fn account_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Transaction key: the intent reference bytes.
#[must_use]
pub fn transaction_key(intent_ref: &str) -> Vec<u8> {
    intent_ref.as_bytes().to_vec()
}

/// Operation key.
#[must_use]
pub fn operation_key(operation_id: &OperationId) -> Vec<u8> {
    operation_id.to_bytes().to_vec()
}

/// Pending deduction key. Shares the operation key space.
#[must_use]
pub fn pending_deduction_key(operation_id: &OperationId) -> Vec<u8> {
    operation_key(operation_id)
}

fn user_index_key(user_id: &UserId, ulid_bytes: [u8; 16]) -> Vec<u8> {
    let mut key = Vec::with_capacity(INDEX_KEY_LEN);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&ulid_bytes);
    key
}

/// User-transaction index key.
#[must_use]
pub fn user_transaction_key(user_id: &UserId, transaction_id: &TransactionId) -> Vec<u8> {
    user_index_key(user_id, transaction_id.to_bytes())
}

/// User-operation index key.
#[must_use]
pub fn user_operation_key(user_id: &UserId, operation_id: &OperationId) -> Vec<u8> {
    user_index_key(user_id, operation_id.to_bytes())
}

/// Prefix covering every index entry for a user.
#[must_use]
pub fn user_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Extract the operation ID from a user-operation index key.
///
/// Returns `None` for malformed keys.
#[must_use]
pub fn operation_id_from_user_key(key: &[u8]) -> Option<OperationId> {
    let bytes: [u8; 16] = key.get(USER_KEY_LEN..INDEX_KEY_LEN)?.try_into().ok()?;
    Some(OperationId::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_operation_key_format() {
        let user_id = UserId::generate();
        let op_id = OperationId::generate();
        let key = user_operation_key(&user_id, &op_id);

        assert_eq!(key.len(), 32);
        assert!(key.starts_with(&user_prefix(&user_id)));
        assert_eq!(operation_id_from_user_key(&key), Some(op_id));
    }

    #[test]
    fn short_index_key_is_rejected() {
        assert_eq!(operation_id_from_user_key(&[0u8; 20]), None);
    }

    #[test]
    fn transaction_key_is_intent_reference() {
        assert_eq!(transaction_key("pi_123"), b"pi_123".to_vec());
    }
}
