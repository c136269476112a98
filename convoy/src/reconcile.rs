//! History reconciliation.
//!
//! The applied history must be a literal, positional prefix of the supplied
//! migration identifiers. Anything else means migrations were removed,
//! renamed or reordered, and the run must stop before touching the store.

use std::collections::HashMap;

use serde::Serialize;

use crate::errors::HistoryError;

/// Result of a successful reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Number of leading migrations already applied.
    pub applied: usize,
    /// Number of trailing migrations still to apply.
    pub pending: usize,
}

impl Plan {
    pub fn is_up_to_date(&self) -> bool {
        self.pending == 0
    }

    /// Index range of the pending migrations within the supplied sequence.
    pub fn pending_range(&self) -> std::ops::Range<usize> {
        self.applied..self.applied + self.pending
    }
}

/// Checks `applied` against `known` and computes the pending suffix.
pub fn reconcile<S: AsRef<str>>(applied: &[S], known: &[&str]) -> Result<Plan, HistoryError> {
    if applied.len() > known.len() {
        return Err(HistoryError::TooLong {
            applied: applied.len(),
            known: known.len(),
        });
    }

    for (index, (found, expected)) in applied.iter().zip(known).enumerate() {
        if found.as_ref() != *expected {
            return Err(HistoryError::Mismatch {
                index,
                expected: (*expected).to_string(),
                found: found.as_ref().to_string(),
            });
        }
    }

    let mut seen: HashMap<&str, usize> = HashMap::with_capacity(known.len());
    for (position, id) in known.iter().enumerate() {
        if let Some(first) = seen.insert(*id, position) {
            return Err(HistoryError::DuplicateIdentifier {
                id: (*id).to_string(),
                first,
                second: position,
            });
        }
    }

    Ok(Plan {
        applied: applied.len(),
        pending: known.len() - applied.len(),
    })
}
