// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resource services.
//!
//! [`ResourceService<R>`] turns typed CRUD calls into HTTP requests and
//! validates what comes back: payloads pass through [`normalize::unify_ids`]
//! and are then deserialized into `R`, so a malformed payload fails here as
//! [`SyncError::Malformed`] instead of reaching the cache.
//!
//! Domain actions (`sign`, `void`, `activate`, ...) are inherent methods on
//! the concrete service type in each domain module.

pub mod billing;
pub mod contracts;
pub mod discounts;
pub mod normalize;
pub mod params;
pub mod redemptions;
pub mod subscribers;
pub mod templates;

pub use params::{DateRange, FilterValue, ListParams, SortOrder};

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::SyncError;
use crate::http::{ApiResponse, HttpClient, Paginated, Pagination};

/// A server-defined entity addressable under `/{NAME}`.
pub trait Resource: DeserializeOwned + Serialize + Clone + Send + Sync + 'static {
    /// Collection path below the API root, also the query-key resource name.
    const NAME: &'static str;

    fn id(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Excel,
    Pdf,
    Json,
}

impl ExportFormat {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Excel => "excel",
            Self::Pdf => "pdf",
            Self::Json => "json",
        }
    }

    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Excel => "xlsx",
            other => other.as_str(),
        }
    }

    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Excel => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Pdf => "application/pdf",
            Self::Json => "application/json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A downloaded export, ready to be written wherever the caller wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub struct ResourceService<R> {
    http: HttpClient,
    _resource: PhantomData<fn() -> R>,
}

impl<R> Clone for ResourceService<R> {
    fn clone(&self) -> Self {
        Self { http: self.http.clone(), _resource: PhantomData }
    }
}

impl<R: Resource> ResourceService<R> {
    pub fn new(http: HttpClient) -> Self {
        Self { http, _resource: PhantomData }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    #[must_use]
    pub fn collection_path() -> String {
        format!("/{}", R::NAME)
    }

    #[must_use]
    pub fn item_path(id: &str) -> String {
        format!("/{}/{}", R::NAME, path_segment(id))
    }

    pub async fn list(&self, params: &ListParams) -> Result<Paginated<R>, SyncError> {
        let response = self.http.get(&Self::collection_path(), &params.to_query_pairs()).await?;
        decode_page(R::NAME, response)
    }

    pub async fn get(&self, id: &str) -> Result<R, SyncError> {
        let response = self.http.get(&Self::item_path(id), &[]).await?;
        decode(R::NAME, response.into_data()?)
    }

    pub async fn create<I: Serialize + ?Sized>(&self, input: &I) -> Result<R, SyncError> {
        let body = to_body(input)?;
        let response = self.http.post(&Self::collection_path(), &body).await?;
        decode(R::NAME, response.into_data()?)
    }

    pub async fn update<P: Serialize + ?Sized>(&self, id: &str, patch: &P) -> Result<R, SyncError> {
        let body = to_body(patch)?;
        let response = self.http.put(&Self::item_path(id), &body).await?;
        decode(R::NAME, response.into_data()?)
    }

    pub async fn remove(&self, id: &str) -> Result<(), SyncError> {
        self.http.delete(&Self::item_path(id)).await?;
        Ok(())
    }

    /// `POST /{NAME}/{id}/{action}` returning the updated record.
    pub async fn action(&self, id: &str, action: &str, body: Option<&Value>) -> Result<R, SyncError> {
        let path = format!("{}/{}", Self::item_path(id), action);
        let empty = Value::Object(Default::default());
        let response = self.http.post(&path, body.unwrap_or(&empty)).await?;
        decode(R::NAME, response.into_data()?)
    }

    /// `GET /{NAME}/export?format=..` with the list filters applied.
    pub async fn export(&self, params: &ListParams, format: ExportFormat) -> Result<ExportFile, SyncError> {
        let mut query = params.to_query_pairs();
        query.push(("format".to_string(), format.as_str().to_string()));
        let body = self.http.download(&format!("/{}/export", R::NAME), &query).await?;

        Ok(ExportFile {
            file_name: body
                .file_name
                .unwrap_or_else(|| format!("{}.{}", R::NAME.replace('/', "-"), format.extension())),
            content_type: body.content_type.unwrap_or_else(|| format.content_type().to_string()),
            bytes: body.bytes,
        })
    }

    /// Any other JSON endpoint below this collection (stats, summaries).
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        sub_path: &str,
        params: &[(String, String)],
    ) -> Result<T, SyncError> {
        let response = self.http.get(&format!("/{}/{}", R::NAME, sub_path), params).await?;
        decode(R::NAME, response.into_data()?)
    }
}

/// Percent-encode `raw` as a single path segment (`/`, `?`, `#` included).
pub fn path_segment(raw: &str) -> String {
    // Form encoding writes spaces as `+`; a literal `+` is already `%2B`
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn to_body<I: Serialize + ?Sized>(input: &I) -> Result<Value, SyncError> {
    serde_json::to_value(input).map_err(|e| SyncError::Config(format!("request body is not serializable: {e}")))
}

/// Normalize ids and deserialize, naming the resource on failure.
pub fn decode<T: DeserializeOwned>(resource: &str, data: Value) -> Result<T, SyncError> {
    serde_json::from_value(normalize::unify_ids(data))
        .map_err(|e| SyncError::Malformed(format!("invalid {resource} payload: {e}")))
}

/// Lists arrive either as a bare array or wrapped as `{ items: [...] }` /
/// `{ <resource>: [...] }`. Missing pagination describes a single page.
fn decode_page<R: Resource>(resource: &str, response: ApiResponse) -> Result<Paginated<R>, SyncError> {
    let pagination = response.pagination;
    let items = match response.into_data()? {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => {
            let collection = resource.rsplit('/').next().unwrap_or(resource);
            map.remove("items")
                .or_else(|| map.remove(collection))
                .filter(Value::is_array)
                .ok_or_else(|| SyncError::Malformed(format!("{resource} list has no item array")))?
        }
        other => {
            return Err(SyncError::Malformed(format!("{resource} list is not an array: {other}")));
        }
    };

    let items: Vec<R> = decode(resource, items)?;
    let pagination = pagination.unwrap_or(Pagination {
        page: 1,
        limit: items.len() as u64,
        total: items.len() as u64,
        pages: 1,
    });
    Ok(Paginated { items, pagination })
}
