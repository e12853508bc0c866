//! # Object Store
//!
//! Read/write contract for stage inputs and outputs. Writes are overwrite-idempotent, so a
//! redelivered actor simply rewrites the same key.

use crate::models::ObjectLocator;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object not found: {url}")]
    NotFound { url: String },

    #[error("Object store I/O error on {url}: {message}")]
    Io { url: String, message: String },

    #[error("Object {url} is not valid JSON: {message}")]
    Serialization { url: String, message: String },

    #[error("Invalid object locator: {0}")]
    InvalidLocator(String),
}

impl StoreError {
    pub fn not_found(locator: &ObjectLocator) -> Self {
        Self::NotFound { url: locator.url() }
    }

    pub fn io(locator: &ObjectLocator, err: impl fmt::Display) -> Self {
        Self::Io {
            url: locator.url(),
            message: err.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    async fn put(&self, locator: &ObjectLocator, body: Vec<u8>) -> StoreResult<()>;

    async fn get(&self, locator: &ObjectLocator) -> StoreResult<Vec<u8>>;
}

/// Serialize `value` as pretty JSON and store it at `locator`
pub async fn put_json<T: Serialize + Sync>(
    store: &dyn ObjectStore,
    locator: &ObjectLocator,
    value: &T,
) -> StoreResult<()> {
    let body = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialization {
        url: locator.url(),
        message: e.to_string(),
    })?;
    store.put(locator, body).await
}

/// Fetch and decode a JSON object
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    locator: &ObjectLocator,
) -> StoreResult<T> {
    let body = store.get(locator).await?;
    serde_json::from_slice(&body).map_err(|e| StoreError::Serialization {
        url: locator.url(),
        message: e.to_string(),
    })
}

/// Objects held in process memory, keyed by `s3://bucket/key`
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<String, Vec<u8>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, locator: &ObjectLocator) -> bool {
        self.objects.contains_key(&locator.url())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, locator: &ObjectLocator, body: Vec<u8>) -> StoreResult<()> {
        locator.validate().map_err(StoreError::InvalidLocator)?;
        self.objects.insert(locator.url(), body);
        Ok(())
    }

    async fn get(&self, locator: &ObjectLocator) -> StoreResult<Vec<u8>> {
        self.objects
            .get(&locator.url())
            .map(|body| body.value().clone())
            .ok_or_else(|| StoreError::not_found(locator))
    }
}

/// Objects stored as files under `{root}/{bucket}/{key}`
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, locator: &ObjectLocator) -> StoreResult<PathBuf> {
        locator.validate().map_err(StoreError::InvalidLocator)?;
        if locator.key.split('/').any(|segment| segment == "..") {
            return Err(StoreError::InvalidLocator(format!(
                "key escapes the store root: {}",
                locator.key
            )));
        }
        Ok(self.root.join(&locator.bucket).join(&locator.key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, locator: &ObjectLocator, body: Vec<u8>) -> StoreResult<()> {
        let path = self.path_for(locator)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(locator, e))?;
        }
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| StoreError::io(locator, e))
    }

    async fn get(&self, locator: &ObjectLocator) -> StoreResult<Vec<u8>> {
        let path = self.path_for(locator)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::not_found(locator)),
            Err(e) => Err(StoreError::io(locator, e)),
        }
    }
}
