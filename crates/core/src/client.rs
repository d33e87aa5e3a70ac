//! SharePoint client: app-only authentication, folder listing, downloads
//!
//! One [`SharePointClient`] serves one site. Tokens are acquired lazily and
//! refreshed before every call that needs one; a 401 from the REST API
//! triggers exactly one re-authentication and retry.

use crate::auth::{acquire_token, AccessToken, DEFAULT_TOKEN_ENDPOINT};
use crate::error::{Error, Result};
use crate::models::{
    CopiedFile, CopyFailure, CopyReport, CopySpec, ListOptions, Page, RemoteFileEntry,
    SkipReason, SkippedFile, SpFile, SpFolder, SpFolderInfo, Verbose,
};
use crate::site::{file_name, local_path, odata_literal, strip_path_prefix, SiteCredentials};
use crate::transport::{ApiRequest, ApiResponse, ByteStream, ReqwestTransport, Transport};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ODATA_VERBOSE: &str = "application/json;odata=verbose";
const FILE_FIELDS: &str = "Name,ServerRelativeUrl,Length,TimeLastModified";
const FOLDER_FIELDS: &str = "Name,ServerRelativeUrl";

/// Tunables for a [`SharePointClient`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Per-request timeout for token and listing calls
    pub timeout: Duration,
    /// Per-request timeout for a single file download
    pub download_timeout: Duration,
    pub max_retries: u32,
    /// First retry delay, doubled on each further attempt
    pub retry_delay: Duration,
    /// Refresh the token this long before it expires
    pub token_refresh_margin: Duration,
    pub max_concurrent_downloads: usize,
    pub token_endpoint: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(600),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            token_refresh_margin: Duration::from_secs(300),
            max_concurrent_downloads: 4,
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
        }
    }
}

/// Client for one SharePoint site
pub struct SharePointClient {
    credentials: SiteCredentials,
    options: ClientOptions,
    transport: Arc<dyn Transport>,
    token: Mutex<Option<AccessToken>>,
}

impl SharePointClient {
    /// Create a client using the default HTTP transport. No request is made.
    pub fn new(credentials: SiteCredentials, options: ClientOptions) -> Result<Self> {
        let transport = ReqwestTransport::new(options.timeout)?;
        Ok(Self::with_transport(credentials, options, Arc::new(transport)))
    }

    /// Create a client over a custom transport.
    pub fn with_transport(
        credentials: SiteCredentials,
        options: ClientOptions,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            credentials,
            options,
            transport,
            token: Mutex::new(None),
        }
    }

    pub fn credentials(&self) -> &SiteCredentials {
        &self.credentials
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    // === Authentication ===

    /// Acquire a fresh access token, replacing any stored one.
    pub async fn authenticate(&self) -> Result<()> {
        let mut slot = self.token.lock().await;
        *slot = Some(self.fetch_token().await?);
        Ok(())
    }

    async fn fetch_token(&self) -> Result<AccessToken> {
        acquire_token(
            self.transport.as_ref(),
            &self.credentials,
            &self.options.token_endpoint,
            self.options.timeout,
        )
        .await
    }

    /// Current bearer token, refreshed when missing or about to expire.
    /// The lock is held across the refresh so only one runs at a time.
    async fn bearer(&self) -> Result<String> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref() {
            if !token.is_expired(self.options.token_refresh_margin) {
                return Ok(token.secret().to_string());
            }
            debug!(expires_at = %token.expires_at(), "Access token expired, refreshing");
        }

        let token = self.fetch_token().await?;
        let secret = token.secret().to_string();
        *slot = Some(token);
        Ok(secret)
    }

    /// Forget `rejected` unless another task already replaced it.
    async fn invalidate_token(&self, rejected: &str) {
        let mut slot = self.token.lock().await;
        if slot.as_ref().is_some_and(|t| t.secret() == rejected) {
            *slot = None;
        }
    }

    #[cfg(test)]
    pub(crate) async fn set_token(&self, token: AccessToken) {
        *self.token.lock().await = Some(token);
    }

    // === Request plumbing ===

    /// Send an authorized request, re-authenticating once on 401.
    async fn send<F>(&self, build: F) -> Result<ApiResponse>
    where
        F: Fn(&str) -> ApiRequest,
    {
        let token = self.bearer().await?;
        let first = self.send_with_retry(|| build(&token)).await;

        match first {
            Err(Error::Authentication(reason)) => {
                warn!(%reason, "Access token rejected, re-authenticating");
                self.invalidate_token(&token).await;
                let fresh = self.bearer().await?;
                self.send_with_retry(|| build(&fresh)).await
            }
            other => other,
        }
    }

    /// Send a request, retrying transient failures with exponential back-off.
    async fn send_with_retry<F>(&self, build: F) -> Result<ApiResponse>
    where
        F: Fn() -> ApiRequest,
    {
        let mut attempt = 0u32;
        loop {
            let request = build();
            let url = request.url.clone();
            debug!(method = %request.method, %url, attempt, "SharePoint request");

            let result = match self.transport.execute(request).await {
                Ok(response) if response.is_success() => Ok(response),
                Ok(response) => {
                    let status = response.status;
                    let body = response.text().await.unwrap_or_default();
                    Err(Error::from_status(status, &body))
                }
                Err(e) => Err(e),
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.options.max_retries => {
                    attempt += 1;
                    let delay = self
                        .options
                        .retry_delay
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    warn!(
                        %url,
                        attempt,
                        max_retries = self.options.max_retries,
                        ?delay,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    fn rest_get(&self, url: &str, token: &str) -> ApiRequest {
        ApiRequest::get(url)
            .bearer(token)
            .header("Accept", ODATA_VERBOSE)
            .timeout(self.options.timeout)
    }

    fn rest_post(&self, url: &str, token: &str) -> ApiRequest {
        ApiRequest::post(url)
            .bearer(token)
            .header("Accept", ODATA_VERBOSE)
            .header("Content-Type", ODATA_VERBOSE)
            .timeout(self.options.timeout)
    }

    fn folder_url(&self, folder: &str) -> String {
        self.credentials.api_url(&format!(
            "web/GetFolderByServerRelativeUrl('{}')",
            odata_literal(folder)
        ))
    }

    fn file_url(&self, file: &str) -> String {
        self.credentials.api_url(&format!(
            "web/GetFileByServerRelativeUrl('{}')",
            odata_literal(file)
        ))
    }

    /// Folder `Files`/`Folders` collections ignore paging: without `$top`
    /// the whole collection comes back, and `__next` is followed if present.
    fn collection_url(&self, folder: &str, kind: CursorKind) -> String {
        let (collection, fields) = match kind {
            CursorKind::Files => ("Files", FILE_FIELDS),
            CursorKind::Folders => ("Folders", FOLDER_FIELDS),
        };
        format!("{}/{}?$select={}", self.folder_url(folder), collection, fields)
    }

    async fn get_page<T: DeserializeOwned>(&self, url: &str) -> Result<Page<T>> {
        let response = self.send(|token| self.rest_get(url, token)).await?;
        let body = response.bytes().await?;
        let page: Verbose<Page<T>> = serde_json::from_slice(&body)
            .map_err(|e| Error::UnexpectedResponse(format!("listing page from {}: {}", url, e)))?;

        debug!(
            %url,
            items = page.d.results.len(),
            more = page.d.next.is_some(),
            "Fetched listing page"
        );
        Ok(page.d)
    }

    // === Listing ===

    /// Lazily list files under `folder` (site- or server-relative).
    ///
    /// Pages are fetched on demand and `__next` links are followed until
    /// exhausted. Folders are walked breadth-first: a folder's files come
    /// before anything from its subfolders. Folders themselves are never
    /// yielded. Each call starts a new walk.
    pub fn list_files<'a>(
        &'a self,
        folder: &str,
        options: ListOptions,
    ) -> BoxStream<'a, Result<RemoteFileEntry>> {
        let walk = Walk::new(self.credentials.resolve_path(folder), options);

        stream::try_unfold(walk, move |mut walk| async move {
            let next = self.next_entry(&mut walk).await?;
            Ok::<_, Error>(next.map(|entry| (entry, walk)))
        })
        .boxed()
    }

    /// Collect [`list_files`](Self::list_files) into a vector.
    pub async fn collect_files(
        &self,
        folder: &str,
        options: ListOptions,
    ) -> Result<Vec<RemoteFileEntry>> {
        self.list_files(folder, options).try_collect().await
    }

    async fn next_entry(&self, walk: &mut Walk) -> Result<Option<RemoteFileEntry>> {
        loop {
            if let Some(entry) = walk.buffer.pop_front() {
                return Ok(Some(entry));
            }

            let cursor = match walk.cursor.take() {
                Some(cursor) => cursor,
                None => match walk.pending.pop_front() {
                    Some((folder, depth)) => Cursor {
                        url: self.collection_url(&folder, CursorKind::Files),
                        kind: CursorKind::Files,
                        folder,
                        depth,
                    },
                    None => return Ok(None),
                },
            };

            self.advance(walk, cursor).await?;
        }
    }

    /// Fetch the page under `cursor` and move the walk forward.
    async fn advance(&self, walk: &mut Walk, cursor: Cursor) -> Result<()> {
        match cursor.kind {
            CursorKind::Files => {
                let page: Page<SpFile> = self.get_page(&cursor.url).await?;
                for file in page.results {
                    if let Some(entry) = walk.file_entry(&self.credentials, file, cursor.depth)? {
                        walk.buffer.push_back(entry);
                    }
                }

                walk.cursor = match page.next {
                    Some(next) => Some(Cursor { url: next, ..cursor }),
                    None if walk.options.descends_from(cursor.depth) => Some(Cursor {
                        url: self.collection_url(&cursor.folder, CursorKind::Folders),
                        kind: CursorKind::Folders,
                        ..cursor
                    }),
                    None => None,
                };
            }
            CursorKind::Folders => {
                let page: Page<SpFolder> = self.get_page(&cursor.url).await?;
                for folder in page.results {
                    walk.enqueue_folder(&self.credentials, folder, cursor.depth + 1)?;
                }

                walk.cursor = page.next.map(|next| Cursor { url: next, ..cursor });
            }
        }
        Ok(())
    }

    // === Downloads ===

    /// Download one listed file to `local_path`, replacing any existing file.
    /// Returns the number of bytes written.
    pub async fn download_file(&self, entry: &RemoteFileEntry, local_path: &Path) -> Result<u64> {
        if entry.is_folder {
            return Err(Error::InvalidInput(format!(
                "{} is a folder",
                entry.server_relative_path
            )));
        }
        self.download_path(&entry.server_relative_path, local_path)
            .await
    }

    /// Download a file by site- or server-relative path.
    ///
    /// The body is streamed into a temporary sibling file which is renamed
    /// over `local_path` once complete, so a failed download never leaves a
    /// truncated file behind.
    pub async fn download_path(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        let remote = self.credentials.resolve_path(remote_path);
        let url = format!("{}/$value", self.file_url(&remote));
        let timeout = self.options.download_timeout;

        let response = self
            .send(|token| {
                ApiRequest::get(url.as_str())
                    .bearer(token)
                    .header("Accept", "application/octet-stream")
                    .timeout(timeout)
            })
            .await?;

        if let Some(parent) = local_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let temp = temp_path(local_path)?;
        let written = async {
            let bytes = write_stream(response.into_body(), &temp).await?;
            tokio::fs::rename(&temp, local_path).await?;
            Ok::<u64, Error>(bytes)
        }
        .await;

        match written {
            Ok(bytes) => {
                debug!(remote = %remote, local = %local_path.display(), bytes, "Downloaded file");
                Ok(bytes)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&temp).await {
                    debug!(path = %temp.display(), error = %cleanup, "Temporary file not removed");
                }
                Err(e)
            }
        }
    }

    /// Local path an entry is copied to.
    pub fn destination_for(
        &self,
        entry: &RemoteFileEntry,
        destination_root: &Path,
        flatten: bool,
    ) -> Result<PathBuf> {
        if flatten {
            return local_path(destination_root, &entry.name);
        }

        let relative = self
            .credentials
            .site_relative(&entry.server_relative_path)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "{} is outside site {}",
                    entry.server_relative_path,
                    self.credentials.site_url()
                ))
            })?;
        local_path(destination_root, relative)
    }

    /// Copy every entry of `spec`, continuing past per-file failures.
    pub async fn copy_files(&self, spec: CopySpec) -> CopyReport {
        self.copy_files_with_cancel(spec, &CancellationToken::new())
            .await
    }

    /// Like [`copy_files`](Self::copy_files); once `cancel` fires no new
    /// download starts, those already running finish.
    pub async fn copy_files_with_cancel(
        &self,
        spec: CopySpec,
        cancel: &CancellationToken,
    ) -> CopyReport {
        let mut report = CopyReport::default();
        let mut planned = Vec::new();
        let mut destinations = HashSet::new();

        for entry in spec.entries {
            if entry.is_folder {
                report.skipped.push(SkippedFile {
                    entry,
                    reason: SkipReason::Folder,
                });
                continue;
            }

            match self.destination_for(&entry, &spec.destination_root, spec.flatten) {
                Ok(destination) if !destinations.insert(destination.clone()) => {
                    warn!(
                        remote = %entry.server_relative_path,
                        destination = %destination.display(),
                        "Destination already taken, skipping"
                    );
                    report.skipped.push(SkippedFile {
                        entry,
                        reason: SkipReason::DuplicateDestination(destination),
                    });
                }
                Ok(destination) => planned.push((entry, destination)),
                Err(error) => report.failed.push(CopyFailure {
                    entry,
                    destination: None,
                    error,
                }),
            }
        }

        let concurrency = self.options.max_concurrent_downloads.max(1);
        info!(
            files = planned.len(),
            concurrency,
            flatten = spec.flatten,
            destination = %spec.destination_root.display(),
            "Copying files"
        );

        let mut outcomes = stream::iter(planned)
            .map(|(entry, destination)| async move {
                if cancel.is_cancelled() {
                    return CopyOutcome::Cancelled(entry);
                }
                let result = self.download_file(&entry, &destination).await;
                CopyOutcome::Finished {
                    entry,
                    destination,
                    result,
                }
            })
            .buffer_unordered(concurrency);

        while let Some(outcome) = outcomes.next().await {
            match outcome {
                CopyOutcome::Cancelled(entry) => report.skipped.push(SkippedFile {
                    entry,
                    reason: SkipReason::Cancelled,
                }),
                CopyOutcome::Finished {
                    entry,
                    destination,
                    result: Ok(bytes),
                } => report.succeeded.push(CopiedFile {
                    entry,
                    destination,
                    bytes,
                }),
                CopyOutcome::Finished {
                    entry,
                    destination,
                    result: Err(error),
                } => {
                    warn!(remote = %entry.server_relative_path, %error, "Copy failed");
                    report.failed.push(CopyFailure {
                        entry,
                        destination: Some(destination),
                        error,
                    });
                }
            }
        }

        info!(
            succeeded = report.succeeded_count(),
            failed = report.failed_count(),
            skipped = report.skipped_count(),
            bytes = report.total_bytes(),
            "Copy finished"
        );
        report
    }

    /// List `folder` and copy everything found under `destination_root`.
    pub async fn download_folder(
        &self,
        folder: &str,
        destination_root: impl Into<PathBuf>,
        flatten: bool,
        options: ListOptions,
    ) -> Result<CopyReport> {
        let entries = self.collect_files(folder, options).await?;
        let spec = CopySpec::new(entries, destination_root).flatten(flatten);
        Ok(self.copy_files(spec).await)
    }

    // === Folder management ===

    pub async fn folder_exists(&self, folder: &str) -> Result<bool> {
        let path = self.credentials.resolve_path(folder);
        let url = format!("{}?$select=Exists", self.folder_url(&path));

        match self.send(|token| self.rest_get(&url, token)).await {
            Ok(response) => {
                let info: Verbose<SpFolderInfo> = response.json().await?;
                Ok(info.d.exists)
            }
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create `folder`. Returns `false` when it already existed.
    pub async fn create_folder(&self, folder: &str) -> Result<bool> {
        let path = self.credentials.resolve_path(folder);
        if self.folder_exists(&path).await? {
            debug!(folder = %path, "Folder already exists");
            return Ok(false);
        }

        let url = self.credentials.api_url("web/folders");
        let body = serde_json::json!({
            "__metadata": { "type": "SP.Folder" },
            "ServerRelativeUrl": path,
        });

        self.send(|token| self.rest_post(&url, token).json(body.clone()))
            .await?;

        info!(folder = %path, "Created folder");
        Ok(true)
    }

    /// Move a file into `target_folder`, creating the folder if needed.
    /// Returns the new server-relative path.
    pub async fn move_file(
        &self,
        file: &str,
        target_folder: &str,
        overwrite: bool,
    ) -> Result<String> {
        let source = self.credentials.resolve_path(file);
        let target_folder = self.credentials.resolve_path(target_folder);
        self.create_folder(&target_folder).await?;

        let target = format!("{}/{}", target_folder, file_name(&source));
        let url = format!(
            "{}/moveTo(newurl='{}',flags={})",
            self.file_url(&source),
            odata_literal(&target),
            if overwrite { 1 } else { 0 }
        );

        self.send(|token| self.rest_post(&url, token)).await?;

        info!(from = %source, to = %target, "Moved file");
        Ok(target)
    }
}

impl std::fmt::Debug for SharePointClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharePointClient")
            .field("credentials", &self.credentials)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorKind {
    Files,
    Folders,
}

/// Next page to fetch for one folder.
#[derive(Debug)]
struct Cursor {
    url: String,
    kind: CursorKind,
    folder: String,
    depth: usize,
}

/// State of one `list_files` walk.
#[derive(Debug)]
struct Walk {
    root: String,
    options: ListOptions,
    pending: VecDeque<(String, usize)>,
    cursor: Option<Cursor>,
    buffer: VecDeque<RemoteFileEntry>,
    seen: HashSet<String>,
}

impl Walk {
    fn new(root: String, options: ListOptions) -> Self {
        let mut pending = VecDeque::new();
        pending.push_back((root.clone(), 0));
        Self {
            root,
            options,
            pending,
            cursor: None,
            buffer: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Turn a listed file into an entry; `None` for a repeat.
    fn file_entry(
        &mut self,
        site: &SiteCredentials,
        file: SpFile,
        depth: usize,
    ) -> Result<Option<RemoteFileEntry>> {
        let path = file.server_relative_url;
        if !site.contains(&path) {
            return Err(Error::UnexpectedResponse(format!(
                "listed file {} is outside site {}",
                path,
                site.site_path()
            )));
        }
        if !self.seen.insert(path.to_ascii_lowercase()) {
            debug!(%path, "Skipping repeated entry");
            return Ok(None);
        }

        let relative_path = strip_path_prefix(&path, &self.root)
            .map(|rest| rest.trim_start_matches('/').to_string())
            .unwrap_or_else(|| file.name.clone());

        Ok(Some(RemoteFileEntry {
            server_relative_path: path,
            name: file.name,
            relative_path,
            size: file.length,
            last_modified: file.time_last_modified,
            is_folder: false,
            depth,
        }))
    }

    fn enqueue_folder(&mut self, site: &SiteCredentials, folder: SpFolder, depth: usize) -> Result<()> {
        let path = folder.server_relative_url;
        if !site.contains(&path) {
            return Err(Error::UnexpectedResponse(format!(
                "listed folder {} is outside site {}",
                path,
                site.site_path()
            )));
        }
        if self.seen.insert(path.to_ascii_lowercase()) {
            debug!(folder = %folder.name, depth, "Queueing subfolder");
            self.pending.push_back((path, depth));
        }
        Ok(())
    }
}

enum CopyOutcome {
    Cancelled(RemoteFileEntry),
    Finished {
        entry: RemoteFileEntry,
        destination: PathBuf,
        result: Result<u64>,
    },
}

/// Hidden sibling of `path` used while a download is in flight. The name
/// has a fixed length so any valid target name leaves room for it.
fn temp_path(path: &Path) -> Result<PathBuf> {
    if path.file_name().is_none() {
        return Err(Error::InvalidInput(format!("{} has no file name", path.display())));
    }
    Ok(path.with_file_name(format!(".{}.part", uuid::Uuid::new_v4().simple())))
}

async fn write_stream(mut body: ByteStream, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = body.try_next().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}
