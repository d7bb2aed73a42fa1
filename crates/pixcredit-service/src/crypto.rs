//! Secret comparison helpers.

/// Compare two secrets in time independent of where they first differ.
///
/// Length mismatches return early; the length of an API key is not secret.
#[must_use]
pub fn constant_time_eq(provided: &str, expected: &str) -> bool {
    let (provided, expected) = (provided.as_bytes(), expected.as_bytes());
    if provided.len() != expected.len() {
        return false;
    }

    provided
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
