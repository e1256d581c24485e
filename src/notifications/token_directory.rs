//! # Device Token Directory
//!
//! Maps a user id to the push tokens of every device the user registered.
//! Backed by a MongoDB collection of `{user_id, tokens: [...]}` documents.

use std::collections::BTreeSet;

use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use mongodb::options::{ClientOptions, IndexOptions, UpdateOptions};
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::TokenDirectoryConfig;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("token directory connection failed: {0}")]
    Connection(String),

    #[error("token directory query failed for user '{user_id}': {message}")]
    Query { user_id: String, message: String },

    #[error("invalid token directory input: {0}")]
    InvalidInput(String),
}

impl DirectoryError {
    fn query(user_id: &str, error: impl std::fmt::Display) -> Self {
        Self::Query {
            user_id: user_id.to_string(),
            message: error.to_string(),
        }
    }
}

/// Every token registered for one user; duplicates collapse
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTokenSet {
    pub user_id: String,
    #[serde(default)]
    pub tokens: BTreeSet<String>,
}

impl DeviceTokenSet {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tokens: BTreeSet::new(),
        }
    }

    pub fn with_tokens<I, T>(user_id: impl Into<String>, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            tokens: tokens
                .into_iter()
                .map(|token| -> String { token.into() })
                .filter(|token| !token.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }
}

#[async_trait]
pub trait TokenDirectory: Send + Sync {
    /// `Ok(None)` when the user has no record at all
    async fn tokens_for_user(&self, user_id: &str) -> Result<Option<DeviceTokenSet>, DirectoryError>;

    /// Add `token` to the user's set, creating the record if needed
    async fn register_token(&self, user_id: &str, token: &str) -> Result<(), DirectoryError>;

    /// Remove `token` from the user's set; true when something was removed
    async fn revoke_token(&self, user_id: &str, token: &str) -> Result<bool, DirectoryError>;
}

pub(crate) fn require_ids(user_id: &str, token: &str) -> Result<(), DirectoryError> {
    if user_id.trim().is_empty() {
        return Err(DirectoryError::InvalidInput("user_id is empty".to_string()));
    }
    if token.trim().is_empty() {
        return Err(DirectoryError::InvalidInput("token is empty".to_string()));
    }
    Ok(())
}

pub struct MongoTokenDirectory {
    collection: Collection<Document>,
    _client: Client,
}

impl std::fmt::Debug for MongoTokenDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoTokenDirectory")
            .field("collection", &self.collection.name())
            .finish()
    }
}

impl MongoTokenDirectory {
    pub async fn connect(config: &TokenDirectoryConfig) -> Result<Self, DirectoryError> {
        let options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|e| DirectoryError::Connection(e.to_string()))?;
        let client =
            Client::with_options(options).map_err(|e| DirectoryError::Connection(e.to_string()))?;
        let collection = client
            .database(&config.database)
            .collection::<Document>(&config.collection);

        ensure_indexes(&collection).await?;

        info!(
            database = %config.database,
            collection = %config.collection,
            "Token directory connected"
        );

        Ok(Self {
            collection,
            _client: client,
        })
    }
}

async fn ensure_indexes(collection: &Collection<Document>) -> Result<(), DirectoryError> {
    let user_index = IndexModel::builder()
        .keys(doc! {"user_id": 1})
        .options(
            IndexOptions::builder()
                .unique(true)
                .name(Some("uid_user".to_string()))
                .build(),
        )
        .build();
    collection
        .create_index(user_index, None::<mongodb::options::CreateIndexOptions>)
        .await
        .map_err(|e| DirectoryError::Connection(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl TokenDirectory for MongoTokenDirectory {
    async fn tokens_for_user(&self, user_id: &str) -> Result<Option<DeviceTokenSet>, DirectoryError> {
        let found = self
            .collection
            .find_one(doc! {"user_id": user_id}, None)
            .await
            .map_err(|e| DirectoryError::query(user_id, e))?;

        let Some(document) = found else {
            return Ok(None);
        };

        let record: DeviceTokenSet = mongodb::bson::from_document(document)
            .map_err(|e| DirectoryError::query(user_id, e))?;
        debug!(user_id = %user_id, tokens = record.len(), "Loaded device tokens");
        Ok(Some(record))
    }

    async fn register_token(&self, user_id: &str, token: &str) -> Result<(), DirectoryError> {
        require_ids(user_id, token)?;

        let options = UpdateOptions::builder().upsert(true).build();
        self.collection
            .update_one(
                doc! {"user_id": user_id},
                doc! {"$addToSet": {"tokens": token}},
                options,
            )
            .await
            .map_err(|e| DirectoryError::query(user_id, e))?;

        debug!(user_id = %user_id, "Registered device token");
        Ok(())
    }

    async fn revoke_token(&self, user_id: &str, token: &str) -> Result<bool, DirectoryError> {
        require_ids(user_id, token)?;

        let result = self
            .collection
            .update_one(
                doc! {"user_id": user_id},
                doc! {"$pull": {"tokens": token}},
                None,
            )
            .await
            .map_err(|e| DirectoryError::query(user_id, e))?;

        Ok(result.modified_count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_set_suppresses_duplicates_and_blanks() {
        let set = DeviceTokenSet::with_tokens("u1", ["t2", "t1", "t2", ""]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.tokens.iter().collect::<Vec<_>>(), vec!["t1", "t2"]);
    }

    #[test]
    fn test_token_set_reads_stored_document() {
        let document = doc! {"_id": "abc", "user_id": "u1", "tokens": ["t1", "t1", "t2"]};
        let set: DeviceTokenSet = mongodb::bson::from_document(document).unwrap();
        assert_eq!(set.user_id, "u1");
        assert_eq!(set.len(), 2);

        let bare: DeviceTokenSet = mongodb::bson::from_document(doc! {"user_id": "u2"}).unwrap();
        assert!(bare.is_empty());
    }

    #[test]
    fn test_empty_ids_are_rejected() {
        assert!(require_ids("", "t").is_err());
        assert!(require_ids("u", " ").is_err());
        assert!(require_ids("u", "t").is_ok());
    }

    #[tokio::test]
    async fn test_mongo_round_trip_when_available() {
        let Some(uri) = crate::test_helpers::test_mongodb_uri() else {
            return;
        };
        let config = TokenDirectoryConfig {
            uri,
            database: "kdt_test".to_string(),
            collection: format!("user_tokens_{}", uuid::Uuid::new_v4().simple()),
        };
        let directory = MongoTokenDirectory::connect(&config).await.unwrap();

        directory.register_token("u1", "t1").await.unwrap();
        directory.register_token("u1", "t1").await.unwrap();
        directory.register_token("u1", "t2").await.unwrap();
        let set = directory.tokens_for_user("u1").await.unwrap().unwrap();
        assert_eq!(set.len(), 2);

        assert!(directory.revoke_token("u1", "t1").await.unwrap());
        assert!(!directory.revoke_token("u1", "t1").await.unwrap());
        assert!(directory.tokens_for_user("nobody").await.unwrap().is_none());
    }
}
