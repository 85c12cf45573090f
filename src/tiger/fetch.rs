//! Archive transports for the cartographic boundary file server
//!
//! The same directory tree is served over HTTP and anonymous FTP. Both
//! implementations write to a temporary file and rename it into place, so a
//! failed download never leaves a truncated archive in the cache.

use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use reqwest::Client;
use suppaftp::FtpStream;
use tokio::io::AsyncWriteExt;

use super::TigerError;
use crate::cache::tmp_path_for;

const FTP_PORT: u16 = 21;
const FTP_USER: &str = "anonymous";

/// Server directory holding one year's boundary archives
pub fn archive_dir(year: u16) -> String {
    format!("/geo/tiger/GENZ{year}/shp")
}

/// A source of boundary archives
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    /// Downloads `name` from the given year's directory to `dest`
    async fn fetch(&self, name: &str, year: u16, dest: &Path) -> Result<(), TigerError>;

    /// Lists the archive names available for a year
    async fn list(&self, year: u16) -> Result<Vec<String>, TigerError>;
}

/// Fetches archives over HTTPS
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base: String,
}

impl HttpFetcher {
    /// Creates a fetcher rooted at `base` (scheme and host, e.g. `https://www2.census.gov`)
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, TigerError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    fn dir_url(&self, year: u16) -> String {
        format!("{}{}", self.base, archive_dir(year))
    }
}

#[async_trait]
impl ArchiveFetcher for HttpFetcher {
    async fn fetch(&self, name: &str, year: u16, dest: &Path) -> Result<(), TigerError> {
        let url = format!("{}/{}", self.dir_url(year), name);
        tracing::info!(%url, dest = %dest.display(), "downloading archive");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(TigerError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        let tmp = tmp_path_for(dest);
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| TigerError::io(&tmp, e))?;
        let mut stream = response.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len();
            file.write_all(&chunk)
                .await
                .map_err(|e| TigerError::io(&tmp, e))?;
        }
        file.flush().await.map_err(|e| TigerError::io(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, dest)
            .await
            .map_err(|e| TigerError::io(dest, e))?;
        tracing::debug!(bytes = written, "archive saved");
        Ok(())
    }

    /// Scrapes archive links from the directory index page
    async fn list(&self, year: u16) -> Result<Vec<String>, TigerError> {
        let url = format!("{}/", self.dir_url(year));
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(TigerError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        let page = response.text().await?;
        Ok(archive_links(&page))
    }
}

/// Extracts unique `cb_*.zip` link targets from an HTML index page
pub fn archive_links(page: &str) -> Vec<String> {
    static LINK: OnceLock<Regex> = OnceLock::new();
    let re = LINK.get_or_init(|| {
        Regex::new(r#"href="(cb_[^"/]+\.zip)""#).expect("archive link pattern is valid")
    });

    re.captures_iter(page)
        .map(|caps| caps[1].to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Fetches archives over anonymous FTP
///
/// The FTP client is blocking, so every session runs on tokio's blocking
/// thread pool.
#[derive(Debug, Clone)]
pub struct FtpFetcher {
    host: String,
}

impl FtpFetcher {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    fn session(host: &str, year: u16) -> Result<FtpStream, TigerError> {
        let mut ftp = FtpStream::connect(format!("{host}:{FTP_PORT}"))?;
        ftp.login(FTP_USER, FTP_USER)?;
        ftp.cwd(archive_dir(year))?;
        Ok(ftp)
    }
}

#[async_trait]
impl ArchiveFetcher for FtpFetcher {
    async fn fetch(&self, name: &str, year: u16, dest: &Path) -> Result<(), TigerError> {
        tracing::info!(host = %self.host, name, dest = %dest.display(), "downloading archive");

        let host = self.host.clone();
        let name = name.to_string();
        let buffer: Cursor<Vec<u8>> = tokio::task::spawn_blocking(move || {
            let mut ftp = Self::session(&host, year)?;
            let buffer = ftp.retr_as_buffer(&name)?;
            let _ = ftp.quit();
            Ok::<_, TigerError>(buffer)
        })
        .await??;

        let tmp = tmp_path_for(dest);
        tokio::fs::write(&tmp, buffer.into_inner())
            .await
            .map_err(|e| TigerError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, dest)
            .await
            .map_err(|e| TigerError::io(dest, e))
    }

    async fn list(&self, year: u16) -> Result<Vec<String>, TigerError> {
        let host = self.host.clone();
        let mut names = tokio::task::spawn_blocking(move || {
            let mut ftp = Self::session(&host, year)?;
            let names = ftp.nlst(None)?;
            let _ = ftp.quit();
            Ok::<_, TigerError>(names)
        })
        .await??;
        names.sort();
        Ok(names)
    }
}
