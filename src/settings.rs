use std::collections::HashSet;

use tokio::sync::RwLock;

/// Process-wide set of location managers (admins), keyed by lower-cased email.
///
/// Loaded once at startup and refreshed only through an explicit reload;
/// between reloads the roster may be stale.
#[derive(Debug, Default)]
pub struct AdminRoster {
    managers: RwLock<HashSet<String>>,
}

impl AdminRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new roster, returning how many managers it holds.
    pub async fn replace<I, S>(&self, emails: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let next: HashSet<String> = emails
            .into_iter()
            .map(|e| e.as_ref().trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        let count = next.len();
        for email in &next {
            tracing::debug!(user_mail = %email, "adding location manager");
        }
        *self.managers.write().await = next;
        count
    }

    pub async fn is_admin(&self, email: &str) -> bool {
        self.managers
            .read()
            .await
            .contains(&email.trim().to_lowercase())
    }

    pub async fn len(&self) -> usize {
        self.managers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.managers.read().await.is_empty()
    }
}
