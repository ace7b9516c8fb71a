//! Reference `SourceAdapter` hitting the Nexus Mods GraphQL + REST APIs.

use super::{ModFile, ModMetadata, SearchResult, SourceAdapter};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;

const GRAPHQL_ENDPOINT: &str = "https://api.nexusmods.com/v2/graphql";
const FILES_ENDPOINT: &str = "https://api.nexusmods.com/v1/games";
const MAX_RETRIES: u32 = 5;
const BASE_RETRY_DELAY_MS: u64 = 2000;
const MAX_RETRY_DELAY_MS: u64 = 60000;

pub struct NexusAdapter {
    client: reqwest::Client,
}

impl NexusAdapter {
    pub fn new(api_key: &str) -> Result<Self> {
        let api_key = api_key.trim();
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(api_key)
                .map_err(|_| Error::AuthRequired("invalid Nexus API key".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("lmm/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self { client })
    }

    async fn retrying<F, Fut, T>(&self, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<RetryOutcome<T>>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match attempt_fn(attempt).await? {
                RetryOutcome::Done(value) => return Ok(value),
                RetryOutcome::Retry(delay) if attempt >= MAX_RETRIES => {
                    let _ = delay;
                    return Err(Error::Network(format!(
                        "exhausted {MAX_RETRIES} retries"
                    )));
                }
                RetryOutcome::Retry(delay) => {
                    tracing::warn!(attempt, delay_ms = delay, "retrying Nexus request");
                    sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }
}

enum RetryOutcome<T> {
    Done(T),
    Retry(u64),
}

fn backoff_delay(attempt: u32) -> u64 {
    let base = BASE_RETRY_DELAY_MS * (1u64 << (attempt - 1).min(8));
    let jitter = (rand::random::<f64>() * 0.3 + 0.85) as u64;
    (base * jitter).min(MAX_RETRY_DELAY_MS)
}

#[async_trait]
impl SourceAdapter for NexusAdapter {
    fn name(&self) -> &str {
        "nexus"
    }

    async fn search(&self, game_id: &str, query: &str, offset: u64, count: u64) -> Result<SearchResult> {
        #[derive(Serialize)]
        struct Variables<'a> {
            #[serde(rename = "gameDomain")]
            game_domain: &'a str,
            query: &'a str,
            offset: u64,
            count: u64,
        }
        #[derive(Serialize)]
        struct GraphQLRequest<'a> {
            query: &'a str,
            variables: Variables<'a>,
        }
        #[derive(Deserialize)]
        struct Node {
            #[serde(rename = "modId")]
            mod_id: i64,
            name: String,
            summary: Option<String>,
            author: Option<String>,
            version: Option<String>,
        }
        #[derive(Deserialize)]
        struct ModsPage {
            nodes: Vec<Node>,
            #[serde(rename = "totalCount")]
            total_count: u64,
        }
        #[derive(Deserialize)]
        struct GraphQLData {
            mods: ModsPage,
        }
        #[derive(Deserialize)]
        struct GraphQLResponse {
            data: Option<GraphQLData>,
            errors: Option<Vec<GraphQLErrorMessage>>,
        }
        #[derive(Deserialize)]
        struct GraphQLErrorMessage {
            message: String,
        }

        let gql = r#"
            query Search($gameDomain: String!, $query: String!, $offset: Int!, $count: Int!) {
                mods(filter: {gameDomainName: [{value: $gameDomain}], name: {value: $query}}
                     offset: $offset, count: $count) {
                    nodes { modId name summary author version }
                    totalCount
                }
            }
        "#;

        let body = GraphQLRequest {
            query: gql,
            variables: Variables {
                game_domain: game_id,
                query,
                offset,
                count,
            },
        };

        self.retrying(|attempt| {
            let body = &body;
            async move {
                let response = self
                    .client
                    .post(GRAPHQL_ENDPOINT)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| Error::Network(e.to_string()))?;

                let status = response.status();
                if status == 429 || status.is_server_error() {
                    return Ok(RetryOutcome::Retry(backoff_delay(attempt)));
                }
                if status.is_client_error() {
                    return Err(Error::Network(format!("client error {status}")));
                }

                let text = response.text().await.map_err(|e| Error::Network(e.to_string()))?;
                let parsed: GraphQLResponse = serde_json::from_str(&text)
                    .map_err(|e| Error::Network(format!("bad response: {e}")))?;
                if let Some(errors) = parsed.errors {
                    let joined = errors.into_iter().map(|e| e.message).collect::<Vec<_>>().join(", ");
                    return Err(Error::Network(format!("graphql errors: {joined}")));
                }
                let page = parsed.data.ok_or_else(|| Error::Network("empty graphql response".into()))?.mods;

                let mods = page
                    .nodes
                    .into_iter()
                    .map(|n| ModMetadata {
                        id: n.mod_id.to_string(),
                        source_id: game_id.to_string(),
                        name: n.name,
                        version: n.version.unwrap_or_default(),
                        author: n.author,
                        summary: n.summary,
                        category: None,
                        source_url: None,
                        picture_url: None,
                    })
                    .collect();

                Ok(RetryOutcome::Done(SearchResult {
                    mods,
                    total_count: page.total_count,
                }))
            }
        })
        .await
    }

    async fn get_mod(&self, game_id: &str, mod_id: &str) -> Result<ModMetadata> {
        let url = format!("{FILES_ENDPOINT}/{game_id}/mods/{mod_id}.json");
        self.retrying(|attempt| {
            let url = url.clone();
            async move {
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| Error::Network(e.to_string()))?;
                let status = response.status();
                if status == 404 {
                    return Err(Error::not_found(format!("mod {mod_id} on {game_id}")));
                }
                if status == 429 || status.is_server_error() {
                    return Ok(RetryOutcome::Retry(backoff_delay(attempt)));
                }

                #[derive(Deserialize)]
                struct Raw {
                    mod_id: i64,
                    name: String,
                    version: String,
                    author: Option<String>,
                    summary: Option<String>,
                    category_id: Option<i64>,
                    picture_url: Option<String>,
                }
                let raw: Raw = response.json().await.map_err(|e| Error::Network(e.to_string()))?;
                Ok(RetryOutcome::Done(ModMetadata {
                    id: raw.mod_id.to_string(),
                    source_id: game_id.to_string(),
                    name: raw.name,
                    version: raw.version,
                    author: raw.author,
                    summary: raw.summary,
                    category: raw.category_id.map(|c| c.to_string()),
                    source_url: Some(format!("https://www.nexusmods.com/{game_id}/mods/{mod_id}")),
                    picture_url: raw.picture_url,
                }))
            }
        })
        .await
    }

    async fn list_files(&self, game_id: &str, mod_id: &str) -> Result<Vec<ModFile>> {
        let url = format!("{FILES_ENDPOINT}/{game_id}/mods/{mod_id}/files.json");
        self.retrying(|attempt| {
            let url = url.clone();
            async move {
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| Error::Network(e.to_string()))?;
                let status = response.status();
                if status == 429 || status.is_server_error() {
                    return Ok(RetryOutcome::Retry(backoff_delay(attempt)));
                }

                #[derive(Deserialize)]
                struct RawFile {
                    file_id: i64,
                    name: String,
                    version: String,
                    category_name: Option<String>,
                }
                #[derive(Deserialize)]
                struct Raw {
                    files: Vec<RawFile>,
                }
                let raw: Raw = response.json().await.map_err(|e| Error::Network(e.to_string()))?;
                let files = raw
                    .files
                    .into_iter()
                    .map(|f| ModFile {
                        file_id: f.file_id.to_string(),
                        name: f.name,
                        version: f.version,
                        is_primary: f.category_name.as_deref() == Some("MAIN"),
                    })
                    .collect();
                Ok(RetryOutcome::Done(files))
            }
        })
        .await
    }

    async fn download(&self, game_id: &str, mod_id: &str, file_id: &str, dest: &Path) -> Result<u64> {
        let url = format!("{FILES_ENDPOINT}/{game_id}/mods/{mod_id}/files/{file_id}/download_link.json");
        let link: Vec<DownloadLink> = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let uri = link
            .first()
            .map(|l| l.uri.clone())
            .ok_or_else(|| Error::not_found(format!("no download link for file {file_id}")))?;

        let mut response = self
            .client
            .get(&uri)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        use tokio::io::AsyncWriteExt;
        while let Some(chunk) = response.chunk().await.map_err(|e| Error::Network(e.to_string()))? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }

    async fn list_dependencies(&self, _game_id: &str, _mod_id: &str) -> Result<Vec<String>> {
        // The Nexus API exposes dependencies only through FOMOD manifests
        // bundled in the archive itself, not a catalog endpoint.
        Ok(Vec::new())
    }
}

#[derive(Deserialize)]
struct DownloadLink {
    #[serde(rename = "URI")]
    uri: String,
}
