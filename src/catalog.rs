use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use tracing::debug;

use crate::error::ClimprojError;
use crate::http;

pub const DEFAULT_ESGF_URL: &str = "https://esgf-data.dkrz.de/esg-search";
pub const DEFAULT_DATA_NODE: &str = "esgf3.dkrz.de";
pub const CMIP6_PROJECT: &str = "CMIP6";
pub const DAILY: &str = "day";

const DATASET_LIMIT: u32 = 500;
const FILE_LIMIT: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQuery {
    pub project: String,
    pub experiment_id: String,
    pub variable_id: String,
    pub frequency: String,
    pub source_id: Option<String>,
}

impl CatalogQuery {
    pub fn daily(experiment_id: &str, variable_id: &str) -> Self {
        Self {
            project: CMIP6_PROJECT.to_string(),
            experiment_id: experiment_id.to_string(),
            variable_id: variable_id.to_string(),
            frequency: DAILY.to_string(),
            source_id: None,
        }
    }

    pub fn with_model(mut self, source_id: &str) -> Self {
        self.source_id = Some(source_id.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetHandle {
    pub id: String,
    pub source_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub filename: Option<String>,
    pub download_url: Option<String>,
}

pub trait CatalogClient: Send + Sync {
    fn search(&self, query: &CatalogQuery) -> Result<Vec<DatasetHandle>, ClimprojError>;
    fn file_context(&self, dataset: &DatasetHandle) -> Result<Vec<FileRecord>, ClimprojError>;
}

#[derive(Clone)]
pub struct EsgfHttpClient {
    client: Client,
    base_url: String,
    data_node: Option<String>,
}

impl EsgfHttpClient {
    pub fn new(
        base_url: &str,
        data_node: Option<&str>,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self, ClimprojError> {
        let client = http::build_client(connect_timeout, Some(timeout))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            data_node: data_node.map(|node| node.to_string()),
        })
    }

    fn search_url(&self) -> String {
        format!("{}/search", self.base_url)
    }

    fn get_json(&self, params: &[(&str, String)]) -> Result<serde_json::Value, ClimprojError> {
        let url = self.search_url();
        let response = http::send_with_retries(
            || {
                self.client
                    .get(&url)
                    .query(&[("format", "application/solr+json"), ("distrib", "true")])
                    .query(params)
            },
            ClimprojError::CatalogHttp,
        )?;
        let response = handle_status(response)?;
        response
            .json()
            .map_err(|err| ClimprojError::CatalogDecode(err.to_string()))
    }
}

fn handle_status(response: Response) -> Result<Response, ClimprojError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "ESGF search failed".to_string());
    Err(ClimprojError::CatalogStatus { status, message })
}

impl CatalogClient for EsgfHttpClient {
    fn search(&self, query: &CatalogQuery) -> Result<Vec<DatasetHandle>, ClimprojError> {
        let mut params = vec![
            ("type", "Dataset".to_string()),
            ("project", query.project.clone()),
            ("experiment_id", query.experiment_id.clone()),
            ("variable_id", query.variable_id.clone()),
            ("frequency", query.frequency.clone()),
            ("limit", DATASET_LIMIT.to_string()),
        ];
        if let Some(model) = &query.source_id {
            params.push(("source_id", model.clone()));
        }
        if let Some(node) = &self.data_node {
            params.push(("data_node", node.clone()));
        }
        let body = self.get_json(&params)?;
        let datasets = parse_dataset_docs(body)?;
        debug!(
            experiment = %query.experiment_id,
            variable = %query.variable_id,
            model = query.source_id.as_deref().unwrap_or("*"),
            count = datasets.len(),
            "catalog search"
        );
        Ok(datasets)
    }

    fn file_context(&self, dataset: &DatasetHandle) -> Result<Vec<FileRecord>, ClimprojError> {
        let params = vec![
            ("type", "File".to_string()),
            ("dataset_id", dataset.id.clone()),
            ("limit", FILE_LIMIT.to_string()),
        ];
        let body = self.get_json(&params)?;
        parse_file_docs(body)
    }
}

#[derive(Debug, Deserialize)]
struct SolrEnvelope<T> {
    response: SolrResponse<T>,
}

#[derive(Debug, Deserialize)]
struct SolrResponse<T> {
    #[serde(default = "Vec::new")]
    docs: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn into_vec(value: Option<OneOrMany>) -> Vec<String> {
    match value {
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
        None => Vec::new(),
    }
}

#[derive(Debug, Deserialize)]
struct DatasetDoc {
    id: String,
    #[serde(default)]
    source_id: Option<OneOrMany>,
}

#[derive(Debug, Deserialize)]
struct FileDoc {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<OneOrMany>,
}

pub fn parse_dataset_docs(body: serde_json::Value) -> Result<Vec<DatasetHandle>, ClimprojError> {
    let envelope: SolrEnvelope<DatasetDoc> = serde_json::from_value(body)
        .map_err(|err| ClimprojError::CatalogDecode(err.to_string()))?;
    Ok(envelope
        .response
        .docs
        .into_iter()
        .map(|doc| DatasetHandle {
            id: doc.id,
            source_ids: into_vec(doc.source_id),
        })
        .collect())
}

pub fn parse_file_docs(body: serde_json::Value) -> Result<Vec<FileRecord>, ClimprojError> {
    let envelope: SolrEnvelope<FileDoc> = serde_json::from_value(body)
        .map_err(|err| ClimprojError::CatalogDecode(err.to_string()))?;
    Ok(envelope
        .response
        .docs
        .into_iter()
        .map(|doc| FileRecord {
            filename: doc.title,
            download_url: http_server_url(&into_vec(doc.url)),
        })
        .collect())
}

/// ESGF lists access points as `url|mime|service`; only the plain HTTP one is downloadable.
fn http_server_url(entries: &[String]) -> Option<String> {
    entries.iter().find_map(|entry| {
        let mut parts = entry.split('|');
        let url = parts.next()?;
        let service = parts.nth(1).unwrap_or("HTTPServer");
        service
            .eq_ignore_ascii_case("HTTPServer")
            .then(|| url.to_string())
    })
}
