//! Remote row-store client
//!
//! The remote collaborator is a hosted row store with per-table
//! upsert/delete/select endpoints keyed by `id`. The sync engine talks to it
//! through the [`RemoteStore`] trait so tests can substitute a mock.

use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;

use crate::auth::Session;
use crate::error::{Error, Result};
use crate::models::{Note, Notebook};

/// Operations the sync engine needs from the remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Apply (or rotate) the session credential used for requests.
    fn set_session(&self, session: &Session);

    /// Insert-or-replace a notebook row by primary key.
    async fn upsert_notebook(&self, notebook: &Notebook) -> Result<()>;

    /// Delete a notebook row. The remote schema cascades child notes.
    async fn delete_notebook(&self, id: &str) -> Result<()>;

    /// Insert-or-replace a note row by primary key.
    async fn upsert_note(&self, note: &Note) -> Result<()>;

    /// Delete a note row.
    async fn delete_note(&self, id: &str) -> Result<()>;

    /// The most recently updated notes, newest first, bounded by `limit`.
    async fn recent_notes(&self, limit: usize) -> Result<Vec<Note>>;
}

/// REST client for the hosted row store.
pub struct HttpRemoteStore {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
    access_token: RwLock<Option<String>>,
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(Error::InvalidInput("anon key must not be empty".into()));
        }
        Ok(Self {
            base_url,
            anon_key,
            client: reqwest::Client::builder().build()?,
            access_token: RwLock::new(None),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .access_token
            .read()
            .ok()
            .and_then(|guard| guard.clone());
        let bearer = token.unwrap_or_else(|| self.anon_key.clone());
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .header("Accept", "application/json")
    }

    async fn upsert(&self, table: &str, body: &serde_json::Value) -> Result<()> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(body);
        let response = self.authorize(request).send().await?;
        check_status(response).await
    }

    async fn delete_row(&self, table: &str, id: &str) -> Result<()> {
        let url = format!("{}?id=eq.{}", self.table_url(table), urlencoding::encode(id));
        let response = self.authorize(self.client.delete(url)).send().await?;
        check_status(response).await
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    fn set_session(&self, session: &Session) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = Some(session.access_token.clone());
        }
    }

    async fn upsert_notebook(&self, notebook: &Notebook) -> Result<()> {
        self.upsert("notebooks", &serde_json::to_value(notebook)?)
            .await
    }

    async fn delete_notebook(&self, id: &str) -> Result<()> {
        self.delete_row("notebooks", id).await
    }

    async fn upsert_note(&self, note: &Note) -> Result<()> {
        self.upsert("notes", &serde_json::to_value(note)?).await
    }

    async fn delete_note(&self, id: &str) -> Result<()> {
        self.delete_row("notes", id).await
    }

    async fn recent_notes(&self, limit: usize) -> Result<Vec<Note>> {
        let url = format!(
            "{}?select=*&order=updated_at.desc&limit={limit}",
            self.table_url("notes")
        );
        let response = self.authorize(self.client.get(url)).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Remote(parse_api_error(status, &body)));
        }
        Ok(response.json().await?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<()> {
    if response.status().is_success() {
        return Ok(());
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(Error::Remote(parse_api_error(status, &body)))
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(Error::InvalidInput("base URL must not be empty".into()));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "base URL must include http:// or https://".into(),
        ))
    }
}
