//! Scanned card storage

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::vision::ExtractedCardInfo;

/// A stored card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: Uuid,
    /// Source image identifier; unique within a store
    pub image_identifier: String,
    pub player_name: Option<String>,
    pub year: Option<i32>,
    pub team: Option<String>,
    /// Unix seconds
    pub scanned_date: u64,
}

impl Card {
    pub fn from_info(image_identifier: impl Into<String>, info: &ExtractedCardInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_identifier: image_identifier.into(),
            player_name: info.player_name.clone(),
            year: info.year,
            team: info.team.clone(),
            scanned_date: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

/// Card persistence
#[async_trait]
pub trait CardRepository: Send + Sync {
    /// Store a card; returns `false` when its image identifier is already stored
    async fn insert(&self, card: Card) -> Result<bool>;

    async fn get(&self, image_identifier: &str) -> Result<Option<Card>>;

    async fn list(&self) -> Result<Vec<Card>>;
}

/// Cards kept in memory and mirrored to a JSON file
pub struct JsonCardStore {
    path: Option<PathBuf>,
    cards: tokio::sync::Mutex<Vec<Card>>,
}

impl JsonCardStore {
    /// Open or create the store at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let cards = if tokio::fs::try_exists(path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read card store {:?}", path))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse card store {:?}", path))?
        } else {
            Vec::new()
        };

        info!("Opened card store {:?} with {} cards", path, cards.len());
        Ok(Self {
            path: Some(path.to_path_buf()),
            cards: tokio::sync::Mutex::new(cards),
        })
    }

    /// Store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            path: None,
            cards: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Image identifiers of every stored card
    pub async fn identifiers(&self) -> HashSet<String> {
        self.cards
            .lock()
            .await
            .iter()
            .map(|card| card.image_identifier.clone())
            .collect()
    }

    async fn persist(&self, cards: &[Card]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(cards)?;
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, content)
            .await
            .context("Failed to write card store")?;
        tokio::fs::rename(&temp_path, path)
            .await
            .context("Failed to replace card store")?;
        Ok(())
    }
}

#[async_trait]
impl CardRepository for JsonCardStore {
    async fn insert(&self, card: Card) -> Result<bool> {
        let mut cards = self.cards.lock().await;
        if cards.iter().any(|c| c.image_identifier == card.image_identifier) {
            debug!("Card for {} already stored", card.image_identifier);
            return Ok(false);
        }

        cards.push(card);
        self.persist(&cards).await?;
        Ok(true)
    }

    async fn get(&self, image_identifier: &str) -> Result<Option<Card>> {
        Ok(self
            .cards
            .lock()
            .await
            .iter()
            .find(|c| c.image_identifier == image_identifier)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Card>> {
        Ok(self.cards.lock().await.clone())
    }
}

/// Image identifiers already run through the pipeline
#[derive(Debug, Default)]
pub struct ProcessedSet {
    seen: Mutex<HashSet<String>>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identifiers(identifiers: impl IntoIterator<Item = String>) -> Self {
        Self {
            seen: Mutex::new(identifiers.into_iter().collect()),
        }
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.seen.lock().contains(identifier)
    }

    /// Returns `false` if the identifier was already marked
    pub fn mark(&self, identifier: impl Into<String>) -> bool {
        self.seen.lock().insert(identifier.into())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ExtractedCardInfo {
        ExtractedCardInfo {
            player_name: Some("Stephen Curry".into()),
            year: Some(2021),
            team: Some("Golden State Warriors".into()),
            all_text: "Stephen Curry\n2021\nGolden State Warriors".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_card_from_info() {
        let card = Card::from_info("IMG_0001.jpg", &info());
        assert_eq!(card.image_identifier, "IMG_0001.jpg");
        assert_eq!(card.player_name.as_deref(), Some("Stephen Curry"));
        assert_eq!(card.year, Some(2021));
        assert!(card.scanned_date > 0);
    }

    #[tokio::test]
    async fn test_insert_deduplicates() {
        let store = JsonCardStore::in_memory();

        assert!(store.insert(Card::from_info("a.jpg", &info())).await.unwrap());
        assert!(!store.insert(Card::from_info("a.jpg", &info())).await.unwrap());
        assert!(store.insert(Card::from_info("b.jpg", &info())).await.unwrap());

        assert_eq!(store.list().await.unwrap().len(), 2);
        assert!(store.get("b.jpg").await.unwrap().is_some());
        assert!(store.get("c.jpg").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cards.json");

        let store = JsonCardStore::open(&path).await.unwrap();
        store.insert(Card::from_info("a.jpg", &info())).await.unwrap();
        drop(store);

        let reopened = JsonCardStore::open(&path).await.unwrap();
        let cards = reopened.list().await.unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].team.as_deref(), Some("Golden State Warriors"));
        assert!(reopened.identifiers().await.contains("a.jpg"));
    }

    #[tokio::test]
    async fn test_corrupt_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cards.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(JsonCardStore::open(&path).await.is_err());
    }

    #[test]
    fn test_processed_set() {
        let set = ProcessedSet::with_identifiers(vec!["a.jpg".to_string()]);
        assert!(set.contains("a.jpg"));
        assert!(set.mark("b.jpg"));
        assert!(!set.mark("b.jpg"));
        assert_eq!(set.len(), 2);
        assert!(!ProcessedSet::new().contains("a.jpg"));
    }
}
