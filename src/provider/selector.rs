//! Round-robin choice of the DigitalOcean account for a new droplet

use crate::entities::DoAccount;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks accounts in turn among those that can take a droplet
///
/// Candidates are ordered by `created_at` (then id) so the rotation is
/// stable while the account set does not change.
#[derive(Debug, Default)]
pub struct AccountSelector {
    cursor: AtomicUsize,
}

impl AccountSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&self, accounts: &[DoAccount]) -> Option<DoAccount> {
        let mut candidates: Vec<&DoAccount> =
            accounts.iter().filter(|a| a.is_selectable()).collect();
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(candidates[turn % candidates.len()].clone())
    }
}
