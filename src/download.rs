use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use rayon::ThreadPool;
use reqwest::blocking::{Client, Response};
use tempfile::Builder;
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogClient, CatalogQuery, FileRecord};
use crate::domain::{Credentials, DateRange, Target};
use crate::error::ClimprojError;
use crate::http;
use crate::store::Store;

pub trait FileFetcher: Send + Sync {
    /// Download `url` to `destination`. Nothing is left at `destination` on failure.
    fn fetch(&self, url: &str, destination: &Path) -> Result<(), ClimprojError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    credentials: Credentials,
}

impl HttpFetcher {
    /// `timeout` covers the whole transfer of one file; `None` only bounds the connect.
    pub fn new(
        credentials: Credentials,
        connect_timeout: Duration,
        timeout: Option<Duration>,
    ) -> Result<Self, ClimprojError> {
        let client = http::build_client(connect_timeout, timeout)?;
        Ok(Self {
            client,
            credentials,
        })
    }

    fn write_response_to_file(
        &self,
        mut response: Response,
        destination: &Path,
    ) -> Result<(), ClimprojError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "download failed".to_string());
            return Err(ClimprojError::DownloadStatus { status, message });
        }
        let parent = destination
            .parent()
            .ok_or_else(|| ClimprojError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| ClimprojError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".climproj-download")
            .tempfile_in(parent)
            .map_err(|err| ClimprojError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| ClimprojError::DownloadHttp(err.to_string()))?;
        temp.persist(destination)
            .map_err(|err| ClimprojError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

impl FileFetcher for HttpFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> Result<(), ClimprojError> {
        let response = http::send_with_retries(
            || {
                self.client.get(url).basic_auth(
                    &self.credentials.username,
                    Some(&self.credentials.password),
                )
            },
            ClimprojError::DownloadHttp,
        )?;
        self.write_response_to_file(response, destination)
    }
}

/// One remote file resolved to its local download path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub remote_url: String,
    pub filename: String,
    pub local_destination: Utf8PathBuf,
    pub date_range: Option<DateRange>,
}

/// Map a catalog record onto a destination inside `raw_dir`.
pub fn resolve_file_handle(
    record: &FileRecord,
    raw_dir: &Utf8Path,
) -> Result<FileHandle, ClimprojError> {
    let url = record
        .download_url
        .as_deref()
        .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
        .ok_or_else(|| {
            ClimprojError::MalformedRecord(format!(
                "{}: no HTTP download URL",
                record.filename.as_deref().unwrap_or("<unnamed>")
            ))
        })?;
    let filename = record
        .filename
        .clone()
        .or_else(|| {
            url.rsplit('/')
                .next()
                .map(|segment| segment.split('?').next().unwrap_or(segment).to_string())
        })
        .filter(|name| is_plain_filename(name))
        .ok_or_else(|| ClimprojError::MalformedRecord(format!("{url}: no usable filename")))?;
    Ok(FileHandle {
        remote_url: url.to_string(),
        local_destination: raw_dir.join(&filename),
        date_range: DateRange::from_filename(&filename),
        filename,
    })
}

fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FileStatus {
    /// Already on disk from an earlier run.
    Present(Utf8PathBuf),
    Fetched(Utf8PathBuf),
    /// Every yearly artifact for the range exists.
    Complete(DateRange),
    BeforeStartYear,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Raw files ready for post-processing, in no particular order.
    pub paths: Vec<Utf8PathBuf>,
    pub fetched: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Years whose artifacts were already complete, so the file was not fetched.
    pub complete_years: BTreeSet<i32>,
}

pub struct DownloadOrchestrator<'a, C: CatalogClient, F: FileFetcher> {
    catalog: &'a C,
    fetcher: &'a F,
    store: &'a Store,
    pool: &'a ThreadPool,
    start_year: Option<i32>,
    points: bool,
}

impl<'a, C: CatalogClient, F: FileFetcher> DownloadOrchestrator<'a, C, F> {
    pub fn new(
        catalog: &'a C,
        fetcher: &'a F,
        store: &'a Store,
        pool: &'a ThreadPool,
        start_year: Option<i32>,
        points: bool,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            store,
            pool,
            start_year,
            points,
        }
    }

    /// Re-query the catalog for the triple, resolve its files and fetch them
    /// concurrently. Per-file failures are counted, never propagated.
    ///
    /// `variable_id` is the catalog identifier of `target.variable`.
    pub fn fetch_all(&self, target: Target<'_>, variable_id: &str) -> FetchOutcome {
        let Target {
            model,
            experiment,
            variable,
        } = target;
        let handles = self.resolve(model, experiment, variable, variable_id);
        if handles.is_empty() {
            return FetchOutcome::default();
        }

        let statuses: Vec<FileStatus> = self.pool.install(|| {
            handles
                .par_iter()
                .map(|handle| self.fetch_one(model, experiment, variable, handle))
                .collect()
        });

        let mut outcome = FetchOutcome::default();
        for status in statuses {
            match status {
                FileStatus::Present(path) => {
                    outcome.skipped += 1;
                    outcome.paths.push(path);
                }
                FileStatus::Fetched(path) => {
                    outcome.fetched += 1;
                    outcome.paths.push(path);
                }
                FileStatus::Complete(range) => {
                    outcome.skipped += 1;
                    outcome.complete_years.extend(range.years());
                }
                FileStatus::BeforeStartYear => outcome.skipped += 1,
                FileStatus::Failed => outcome.failed += 1,
            }
        }
        info!(
            %model,
            %experiment,
            %variable,
            fetched = outcome.fetched,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "downloads finished"
        );
        outcome
    }

    fn resolve(
        &self,
        model: &str,
        experiment: &str,
        variable: &str,
        variable_id: &str,
    ) -> Vec<FileHandle> {
        let query = CatalogQuery::daily(experiment, variable_id).with_model(model);
        let datasets = match self.catalog.search(&query) {
            Ok(datasets) => datasets,
            Err(err) => {
                warn!(%model, %experiment, %variable, error = %err, "catalog search failed");
                return Vec::new();
            }
        };
        // Ensemble members share the time coverage; the first one is enough.
        let Some(dataset) = datasets.first() else {
            warn!(%model, %experiment, %variable, "no datasets returned");
            return Vec::new();
        };
        let records = match self.catalog.file_context(dataset) {
            Ok(records) => records,
            Err(err) => {
                warn!(%model, %experiment, %variable, dataset = %dataset.id, error = %err, "file listing failed");
                return Vec::new();
            }
        };

        let raw_dir = self.store.raw_dir(model, experiment, variable);
        self.pool.install(|| {
            records
                .par_iter()
                .filter_map(|record| match resolve_file_handle(record, &raw_dir) {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        warn!(%model, %experiment, %variable, error = %err, "dropping file record");
                        None
                    }
                })
                .collect()
        })
    }

    fn fetch_one(
        &self,
        model: &str,
        experiment: &str,
        variable: &str,
        handle: &FileHandle,
    ) -> FileStatus {
        let file = handle.filename.as_str();
        if self.store.exists(&handle.local_destination) {
            debug!(%model, %experiment, %variable, %file, "already downloaded");
            return FileStatus::Present(handle.local_destination.clone());
        }
        if let Some(range) = &handle.date_range {
            if self
                .store
                .artifacts_complete(model, experiment, variable, range, self.points)
            {
                debug!(%model, %experiment, %variable, %file, "yearly outputs already present");
                return FileStatus::Complete(range.clone());
            }
        }
        if let Some(start_year) = self.start_year {
            match &handle.date_range {
                Some(range) if range.end_year() >= start_year => {}
                Some(_) => {
                    debug!(%model, %experiment, %variable, %file, start_year, "ends before start year");
                    return FileStatus::BeforeStartYear;
                }
                None => {
                    debug!(%model, %experiment, %variable, %file, "no date range in filename");
                    return FileStatus::BeforeStartYear;
                }
            }
        }

        match self
            .fetcher
            .fetch(&handle.remote_url, handle.local_destination.as_std_path())
        {
            Ok(()) => {
                debug!(%model, %experiment, %variable, %file, "downloaded");
                FileStatus::Fetched(handle.local_destination.clone())
            }
            Err(err) => {
                error!(%model, %experiment, %variable, %file, error = %err, "download failed");
                FileStatus::Failed
            }
        }
    }
}

pub fn build_pool(workers: usize) -> Result<ThreadPool, ClimprojError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|index| format!("climproj-worker-{index}"))
        .build()
        .map_err(|err| ClimprojError::WorkerPool(err.to_string()))
}
