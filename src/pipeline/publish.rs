//! Image publishing: upload page PNGs to object storage, delete them later.
//!
//! Each page is uploaded as `page-<n>.png` with custom id `page-<n>-<ms>`,
//! the millisecond stamp keeping ids unique across runs. The page number is
//! recovered from the custom id in the upload response. Response entries
//! lacking a usable id or URL are dropped and counted, never retried.
//!
//! Deletion derives each object's storage key from the last path segment of
//! its public URL.

use crate::error::Pdf2HtmlError;
use crate::pipeline::render::Page;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

const UPLOADTHING_BASE_URL: &str = "https://api.uploadthing.com";
const UPLOADTHING_VERSION: &str = "6.4.0";

/// One object to upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub name: String,
    pub custom_id: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// One entry of the storage service's upload response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadedObject {
    pub custom_id: Option<String>,
    pub url: Option<String>,
}

/// A page image reachable at a public URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedImage {
    pub index: usize,
    pub url: String,
}

/// Published images in page order, plus how many response entries were unusable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOutcome {
    pub images: Vec<PublishedImage>,
    pub dropped: usize,
}

impl PublishOutcome {
    pub fn urls(&self) -> Vec<String> {
        self.images.iter().map(|i| i.url.clone()).collect()
    }
}

/// Object-storage operations the pipeline needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload every file in one batched call. A failed call leaves nothing
    /// stored.
    async fn upload(&self, files: Vec<UploadFile>) -> Result<Vec<UploadedObject>, Pdf2HtmlError>;

    /// Delete by storage key; returns how many objects the service removed.
    async fn delete(&self, keys: &[String]) -> Result<usize, Pdf2HtmlError>;
}

/// Upload descriptor for one page.
pub fn upload_file_for(page: &Page, stamp_ms: i64) -> UploadFile {
    UploadFile {
        name: format!("page-{}.png", page.index),
        custom_id: format!("page-{}-{}", page.index, stamp_ms),
        mime_type: "image/png".to_string(),
        bytes: page.png.clone(),
    }
}

/// Page number encoded in a `page-<n>-<stamp>` custom id.
pub fn page_index_from_custom_id(custom_id: &str) -> Option<usize> {
    let mut parts = custom_id.split('-');
    match (parts.next(), parts.next()) {
        (Some("page"), Some(n)) => n.parse().ok().filter(|n| *n >= 1),
        _ => None,
    }
}

/// Storage key of a public URL: its final non-empty path segment.
pub fn object_key(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    let (_, path) = path.split_once('/')?;
    path.rsplit('/')
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Upload every page and map the response back to page numbers.
pub async fn publish_pages(
    store: &dyn ObjectStore,
    pages: &[Page],
    stamp_ms: i64,
) -> Result<PublishOutcome, Pdf2HtmlError> {
    if pages.is_empty() {
        return Ok(PublishOutcome::default());
    }
    let files: Vec<UploadFile> = pages.iter().map(|p| upload_file_for(p, stamp_ms)).collect();
    info!("Uploading {} page images", files.len());
    let uploaded = store.upload(files).await?;

    let mut outcome = PublishOutcome::default();
    for obj in uploaded {
        let index = obj.custom_id.as_deref().and_then(page_index_from_custom_id);
        match (index, obj.url) {
            (Some(index), Some(url)) if !url.is_empty() => {
                debug!("Page {} published at {}", index, url);
                outcome.images.push(PublishedImage { index, url });
            }
            (_, url) => {
                warn!(
                    "Dropping upload without usable page index or URL (custom id {:?}, url {:?})",
                    obj.custom_id.as_deref(),
                    url.as_deref()
                );
                outcome.dropped += 1;
            }
        }
    }
    outcome.images.sort_by_key(|i| i.index);
    outcome.images.dedup_by_key(|i| i.index);
    Ok(outcome)
}

/// Delete the objects behind `urls`. URLs without a derivable key are skipped.
pub async fn unpublish(store: &dyn ObjectStore, urls: &[String]) -> Result<usize, Pdf2HtmlError> {
    let keys: Vec<String> = urls.iter().filter_map(|u| object_key(u)).collect();
    if keys.len() < urls.len() {
        warn!("{} image URLs have no object key", urls.len() - keys.len());
    }
    if keys.is_empty() {
        return Ok(0);
    }
    let deleted = store.delete(&keys).await?;
    info!("Deleted {} of {} published images", deleted, keys.len());
    Ok(deleted)
}

// ── UploadThing ──────────────────────────────────────────────────────────

/// Client for the UploadThing v6 REST API.
pub struct UploadThingStore {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PresignedResponse {
    data: Vec<PresignedFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresignedFile {
    url: Option<String>,
    #[serde(default)]
    fields: HashMap<String, String>,
    key: Option<String>,
    file_url: Option<String>,
    custom_id: Option<String>,
    file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteResponse {
    #[serde(default)]
    deleted_count: usize,
}

impl UploadThingStore {
    pub fn new(api_key: &str, timeout: Option<Duration>) -> Result<Self, Pdf2HtmlError> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder
            .build()
            .map_err(|e| Pdf2HtmlError::Upload(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: UPLOADTHING_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn api_post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response, Pdf2HtmlError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("x-uploadthing-api-key", &self.api_key)
            .header("x-uploadthing-version", UPLOADTHING_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Pdf2HtmlError::Upload(format!("{path}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Pdf2HtmlError::Upload(format!("{path}: HTTP {status}: {text}")));
        }
        Ok(response)
    }

    async fn send_bytes(&self, target: &PresignedFile, file: &UploadFile) -> Result<(), Pdf2HtmlError> {
        let Some(url) = target.url.as_deref() else {
            return Err(Pdf2HtmlError::Upload(format!("no upload URL for {}", file.name)));
        };
        let request = if target.fields.is_empty() {
            self.client
                .put(url)
                .header("content-type", &file.mime_type)
                .body(file.bytes.clone())
        } else {
            let mut form = reqwest::multipart::Form::new();
            for (k, v) in &target.fields {
                form = form.text(k.clone(), v.clone());
            }
            let part = reqwest::multipart::Part::bytes(file.bytes.clone())
                .file_name(file.name.clone())
                .mime_str(&file.mime_type)
                .map_err(|e| Pdf2HtmlError::Upload(e.to_string()))?;
            self.client.post(url).multipart(form.part("file", part))
        };
        let response = request
            .send()
            .await
            .map_err(|e| Pdf2HtmlError::Upload(format!("{}: {e}", file.name)))?;
        if !response.status().is_success() {
            return Err(Pdf2HtmlError::Upload(format!(
                "{}: storage answered HTTP {}",
                file.name,
                response.status()
            )));
        }
        Ok(())
    }

    /// Delete whatever the given slots may have stored. Failures are logged;
    /// the caller is already returning an error.
    async fn roll_back(&self, slots: &[PresignedFile]) {
        let keys: Vec<String> = slots
            .iter()
            .filter_map(|t| t.key.clone().or_else(|| t.file_url.as_deref().and_then(object_key)))
            .collect();
        if keys.is_empty() {
            return;
        }
        warn!("Upload failed; deleting {} already stored images", keys.len());
        if let Err(e) = self.delete(&keys).await {
            warn!("Could not delete partial upload: {}", e);
        }
    }
}

#[async_trait]
impl ObjectStore for UploadThingStore {
    async fn upload(&self, files: Vec<UploadFile>) -> Result<Vec<UploadedObject>, Pdf2HtmlError> {
        let descriptors: Vec<_> = files
            .iter()
            .map(|f| {
                json!({
                    "name": f.name,
                    "size": f.bytes.len(),
                    "type": f.mime_type,
                    "customId": f.custom_id,
                })
            })
            .collect();
        let presigned: PresignedResponse = self
            .api_post(
                "/v6/uploadFiles",
                json!({ "files": descriptors, "acl": "public-read", "contentDisposition": "inline" }),
            )
            .await?
            .json()
            .await
            .map_err(|e| Pdf2HtmlError::Upload(format!("malformed uploadFiles response: {e}")))?;

        let mut objects = Vec::with_capacity(presigned.data.len());
        for (i, target) in presigned.data.iter().enumerate() {
            let file = files.iter().find(|f| {
                target.custom_id.as_deref() == Some(f.custom_id.as_str())
                    || target.file_name.as_deref() == Some(f.name.as_str())
            });
            let Some(file) = file else {
                warn!("Upload slot {:?} matches no requested file", target.custom_id);
                objects.push(UploadedObject::default());
                continue;
            };
            if let Err(e) = self.send_bytes(target, file).await {
                self.roll_back(&presigned.data[..=i]).await;
                return Err(e);
            }
            objects.push(UploadedObject {
                custom_id: target.custom_id.clone(),
                url: target.file_url.clone(),
            });
        }
        Ok(objects)
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, Pdf2HtmlError> {
        let response: DeleteResponse = self
            .api_post("/v6/deleteFiles", json!({ "fileKeys": keys }))
            .await?
            .json()
            .await
            .map_err(|e| Pdf2HtmlError::Upload(format!("malformed deleteFiles response: {e}")))?;
        Ok(response.deleted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn custom_id_round_trip() {
        let page = Page { index: 7, png: vec![1] };
        let file = upload_file_for(&page, 1_700_000_000_000);
        assert_eq!(file.name, "page-7.png");
        assert_eq!(page_index_from_custom_id(&file.custom_id), Some(7));
        assert_eq!(page_index_from_custom_id("page--1"), None);
        assert_eq!(page_index_from_custom_id("img-3-1"), None);
        assert_eq!(page_index_from_custom_id("page-0-1"), None);
    }

    #[test]
    fn object_key_is_last_segment() {
        assert_eq!(object_key("https://utfs.io/f/abc123").as_deref(), Some("abc123"));
        assert_eq!(object_key("https://x.ufs.sh/f/k.png?x=1").as_deref(), Some("k.png"));
        assert_eq!(object_key("https://utfs.io/f/abc/").as_deref(), Some("abc"));
        assert_eq!(object_key("https://utfs.io"), None);
    }

    /// Returns a scripted response and records deletes.
    struct Scripted {
        response: Vec<UploadedObject>,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStore for Scripted {
        async fn upload(&self, _files: Vec<UploadFile>) -> Result<Vec<UploadedObject>, Pdf2HtmlError> {
            Ok(self.response.clone())
        }
        async fn delete(&self, keys: &[String]) -> Result<usize, Pdf2HtmlError> {
            self.deleted.lock().unwrap().extend(keys.iter().cloned());
            Ok(keys.len())
        }
    }

    #[tokio::test]
    async fn incomplete_upload_entries_are_dropped_and_counted() {
        let store = Scripted {
            response: vec![
                UploadedObject { custom_id: Some("page-2-5".into()), url: Some("https://u/f/b".into()) },
                UploadedObject { custom_id: Some("page-1-5".into()), url: Some("https://u/f/a".into()) },
                UploadedObject { custom_id: None, url: Some("https://u/f/c".into()) },
                UploadedObject { custom_id: Some("page-3-5".into()), url: None },
            ],
            deleted: Mutex::new(Vec::new()),
        };
        let pages: Vec<Page> = (1..=4).map(|index| Page { index, png: vec![0] }).collect();
        let outcome = publish_pages(&store, &pages, 5).await.unwrap();
        assert_eq!(outcome.images.iter().map(|i| i.index).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(outcome.dropped, 2);

        let deleted = unpublish(&store, &outcome.urls()).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(*store.deleted.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
