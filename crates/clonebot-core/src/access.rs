//! JSON-backed allow-lists: premium users and redeemable tokens.
//!
//! Both lists are stored as a flat JSON array. Every mutation reloads the
//! file, applies the change and writes it back under the store's lock, so two
//! handlers touching the same list cannot interleave.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

/// Length of generated tokens.
pub const TOKEN_LEN: usize = 8;

/// Character set for tokens (no ambiguous characters: I, O, 0, 1).
const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A de-duplicated list persisted as a JSON array.
#[derive(Debug)]
pub struct JsonListStore<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonListStore<T>
where
    T: Serialize + DeserializeOwned + PartialEq + Clone + Debug,
{
    /// Create a store backed by `path`. The file is created lazily.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Current contents. A missing or unreadable file reads as empty.
    pub async fn load(&self) -> Vec<T> {
        let _guard = self.lock.lock().await;
        self.read_unlocked().await.0
    }

    /// Whether `item` is in the list.
    pub async fn contains(&self, item: &T) -> bool {
        self.load().await.contains(item)
    }

    /// Add `item`. Returns false if it was already present.
    pub async fn insert(&self, item: T) -> Result<bool> {
        self.update(|items| {
            if items.contains(&item) {
                false
            } else {
                items.push(item.clone());
                true
            }
        })
        .await
    }

    /// Remove `item`. Returns false if it was not present.
    pub async fn remove(&self, item: &T) -> Result<bool> {
        self.update(|items| {
            let before = items.len();
            items.retain(|i| i != item);
            items.len() != before
        })
        .await
    }

    /// Add several items, skipping ones already present. Returns how many were added.
    pub async fn extend(&self, new_items: Vec<T>) -> Result<usize> {
        let mut added = 0;
        self.update(|items| {
            for item in new_items {
                if !items.contains(&item) {
                    items.push(item);
                    added += 1;
                }
            }
            added > 0
        })
        .await?;
        Ok(added)
    }

    /// Apply `f` to the list and persist it if `f` reports a change.
    async fn update<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Vec<T>) -> bool,
    {
        let _guard = self.lock.lock().await;
        let (mut items, corrupt) = self.read_unlocked().await;
        let changed = f(&mut items);
        if changed {
            if corrupt {
                self.quarantine_unlocked().await?;
            }
            self.write_unlocked(&items).await?;
        }
        Ok(changed)
    }

    /// Read the list. The flag is true when the file exists but could not be
    /// parsed, in which case the list reads as empty.
    async fn read_unlocked(&self) -> (Vec<T>, bool) {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return (Vec::new(), false),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!(error = %e, path = %self.path.display(), "List file is not UTF-8");
                return (Vec::new(), true);
            }
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "Failed to read list file");
                return (Vec::new(), false);
            }
        };

        if content.trim().is_empty() {
            return (Vec::new(), false);
        }

        let mut items: Vec<T> = match serde_json::from_str(&content) {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "Failed to parse list file");
                return (Vec::new(), true);
            }
        };

        // Older files may carry duplicates.
        let mut seen = Vec::with_capacity(items.len());
        items.retain(|item| {
            if seen.contains(item) {
                false
            } else {
                seen.push(item.clone());
                true
            }
        });
        (items, false)
    }

    /// Move an unparseable file to `<name>.corrupt` so the next write does
    /// not destroy it. An older `.corrupt` file is replaced.
    async fn quarantine_unlocked(&self) -> Result<()> {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".corrupt");
        let backup = PathBuf::from(name);
        tokio::fs::rename(&self.path, &backup).await?;
        warn!(
            path = %self.path.display(),
            backup = %backup.display(),
            "Corrupt list file moved aside before rewrite"
        );
        Ok(())
    }

    async fn write_unlocked(&self, items: &[T]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(items)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(count = items.len(), path = %self.path.display(), "Saved list file");
        Ok(())
    }
}

/// Premium user allow-list (`prem.json`).
#[derive(Debug)]
pub struct PremiumUsers {
    store: JsonListStore<u64>,
}

impl PremiumUsers {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonListStore::new(path),
        }
    }

    /// Check whether a user has premium access.
    pub async fn is_premium(&self, user_id: u64) -> bool {
        self.store.contains(&user_id).await
    }

    /// Grant premium access. Returns false if the user already had it.
    pub async fn grant(&self, user_id: u64) -> Result<bool> {
        self.store.insert(user_id).await
    }

    /// Revoke premium access. Returns false if the user did not have it.
    pub async fn revoke(&self, user_id: u64) -> Result<bool> {
        self.store.remove(&user_id).await
    }

    /// All premium user IDs.
    pub async fn list(&self) -> Vec<u64> {
        self.store.load().await
    }
}

/// Redeemable token list (`tokens.json`).
#[derive(Debug)]
pub struct TokenStore {
    store: JsonListStore<String>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonListStore::new(path),
        }
    }

    /// Generate `count` new tokens and persist them.
    pub async fn generate(&self, count: usize) -> Result<Vec<String>> {
        let existing = self.store.load().await;
        let mut tokens = Vec::with_capacity(count);
        while tokens.len() < count {
            let token = generate_token();
            if !existing.contains(&token) && !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        self.store.extend(tokens.clone()).await?;
        debug!(count = tokens.len(), "Generated redeem tokens");
        Ok(tokens)
    }

    /// Validate and consume a token. Returns true if it existed.
    pub async fn consume(&self, token: &str) -> Result<bool> {
        let token = normalize_token(token);
        if token.is_empty() {
            return Ok(false);
        }
        self.store.remove(&token).await
    }

    /// Outstanding tokens.
    pub async fn list(&self) -> Vec<String> {
        self.store.load().await
    }
}

/// Canonical form of a user-typed token.
pub fn normalize_token(token: &str) -> String {
    token.trim().to_uppercase()
}

/// Generate a random token from [`CHARSET`].
///
/// Draws on the random half of a v4 UUID. `CHARSET` has 32 entries, so taking
/// each byte modulo its length keeps the choice uniform.
pub fn generate_token() -> String {
    let uuid = Uuid::new_v4();
    // Bytes 8.. hold only the variant bits, in the top two bits of byte 8.
    uuid.as_bytes()[8..8 + TOKEN_LEN]
        .iter()
        .map(|b| CHARSET[*b as usize % CHARSET.len()] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token() {
        let a = generate_token();
        let b = generate_token();

        assert_eq!(a.len(), TOKEN_LEN);
        assert_ne!(a, b);
        for c in a.chars() {
            assert!(CHARSET.contains(&(c as u8)));
        }
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let tokens: std::collections::HashSet<String> = (0..1000).map(|_| generate_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_normalize_token() {
        assert_eq!(normalize_token("  abcd2345 \n"), "ABCD2345");
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store: JsonListStore<u64> = JsonListStore::new(tmp.path().join("nope.json"));
        assert!(store.load().await.is_empty());
        assert!(!store.contains(&1).await);
    }

    #[tokio::test]
    async fn test_insert_dedupes() {
        let tmp = tempfile::tempdir().unwrap();
        let store: JsonListStore<u64> = JsonListStore::new(tmp.path().join("list.json"));

        assert!(store.insert(5).await.unwrap());
        assert!(!store.insert(5).await.unwrap());
        assert_eq!(store.load().await, vec![5]);
    }

    #[tokio::test]
    async fn test_duplicates_on_disk_are_collapsed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("prem.json");
        std::fs::write(&path, "[1, 2, 1, 3, 2]").unwrap();

        let store: JsonListStore<u64> = JsonListStore::new(&path);
        assert_eq!(store.load().await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("prem.json");
        std::fs::write(&path, "{not json").unwrap();

        let store: JsonListStore<u64> = JsonListStore::new(&path);
        assert!(store.load().await.is_empty());
        // Reading alone leaves the file untouched.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{not json");
    }

    #[tokio::test]
    async fn test_corrupt_file_is_kept_aside_on_write() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("prem.json");
        std::fs::write(&path, "[1, 2,").unwrap();

        let premium = PremiumUsers::new(&path);
        assert!(premium.grant(9).await.unwrap());

        assert_eq!(premium.list().await, vec![9]);
        let backup = tmp.path().join("prem.json.corrupt");
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "[1, 2,");
    }

    #[tokio::test]
    async fn test_valid_file_is_not_moved_aside() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("prem.json");
        std::fs::write(&path, "[1]").unwrap();

        let premium = PremiumUsers::new(&path);
        premium.grant(2).await.unwrap();
        assert!(!tmp.path().join("prem.json.corrupt").exists());
        assert_eq!(premium.list().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_premium_grant_revoke() {
        let tmp = tempfile::tempdir().unwrap();
        let premium = PremiumUsers::new(tmp.path().join("json").join("prem.json"));

        assert!(!premium.is_premium(7).await);
        assert!(premium.grant(7).await.unwrap());
        assert!(premium.is_premium(7).await);
        assert!(premium.revoke(7).await.unwrap());
        assert!(!premium.revoke(7).await.unwrap());
        assert!(premium.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_tokens_generate_and_consume() {
        let tmp = tempfile::tempdir().unwrap();
        let tokens = TokenStore::new(tmp.path().join("tokens.json"));

        let generated = tokens.generate(3).await.unwrap();
        assert_eq!(generated.len(), 3);
        assert_eq!(tokens.list().await.len(), 3);

        let lower = generated[0].to_lowercase();
        assert!(tokens.consume(&lower).await.unwrap());
        assert!(!tokens.consume(&generated[0]).await.unwrap());
        assert!(!tokens.consume("   ").await.unwrap());
        assert_eq!(tokens.list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_grants_are_not_lost() {
        let tmp = tempfile::tempdir().unwrap();
        let premium = std::sync::Arc::new(PremiumUsers::new(tmp.path().join("prem.json")));

        let handles: Vec<_> = (0..20u64)
            .map(|id| {
                let premium = std::sync::Arc::clone(&premium);
                tokio::spawn(async move { premium.grant(id).await.unwrap() })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let mut ids = premium.list().await;
        ids.sort_unstable();
        assert_eq!(ids, (0..20).collect::<Vec<_>>());
    }
}
