// Playlist discovery: walks the time-free playlist with a moving seek cursor
// and flattens every sub-playlist into one ordered list of segment references.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeDelta};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument};
use url::Url;
use uuid::Uuid;

use crate::PipelineError;
use crate::config::PlaylistConfig;
use crate::credentials::{CredentialProvider, Credentials};
use crate::request::{BroadcastWindow, DownloadRequest, format_timestamp};

const KEY_DIRECTIVE: &str = "#EXT-X-KEY";

/// Key directive in effect for a run of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyReference {
    /// Absolute URI of the raw 16-byte key
    pub uri: String,
    pub iv: [u8; 16],
}

/// A non-directive playlist line, resolved to an absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub url: String,
    pub key: Option<KeyReference>,
}

/// A segment in final concatenation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentReference {
    /// Position in the output, 0-based
    pub index: usize,
    pub url: String,
    pub key: Option<KeyReference>,
}

/// Parse a line-oriented playlist.
///
/// Blank lines and `#` lines are skipped, except `#EXT-X-KEY` which sets the
/// key applied to every following entry until the next key directive.
/// Relative entries and key URIs are resolved against `base`.
pub fn parse_playlist(body: &str, base: &Url) -> Result<Vec<PlaylistEntry>, PipelineError> {
    let mut entries = Vec::new();
    let mut current_key: Option<KeyReference> = None;

    for line in body.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix(KEY_DIRECTIVE) {
            current_key = parse_key_directive(rest.trim_start_matches(':'), base)?;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        entries.push(PlaylistEntry {
            url: resolve(base, line)?,
            key: current_key.clone(),
        });
    }

    Ok(entries)
}

fn resolve(base: &Url, reference: &str) -> Result<String, PipelineError> {
    base.join(reference)
        .map(String::from)
        .map_err(|e| PipelineError::upstream(base.as_str(), format!("invalid URL '{reference}': {e}")))
}

/// `None` for `METHOD=NONE`, otherwise the key reference with its IV
/// (all zeroes unless `IV=` is present).
fn parse_key_directive(attributes: &str, base: &Url) -> Result<Option<KeyReference>, PipelineError> {
    let attributes = parse_attribute_list(attributes);
    let find = |name: &str| {
        attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    };

    match find("METHOD") {
        Some(method) if method.eq_ignore_ascii_case("NONE") => return Ok(None),
        Some(method) if !method.eq_ignore_ascii_case("AES-128") => {
            return Err(PipelineError::decryption(format!(
                "unsupported decryption method: {method}"
            )));
        }
        _ => {}
    }

    let uri = find("URI")
        .filter(|uri| !uri.is_empty())
        .ok_or_else(|| PipelineError::decryption("key directive without URI"))?;
    let iv = match find("IV") {
        Some(hex_iv) => parse_iv(hex_iv)?,
        None => [0u8; 16],
    };

    Ok(Some(KeyReference {
        uri: resolve(base, uri)?,
        iv,
    }))
}

/// Split `A=1,B="x,y",C=z` into pairs, honouring quotes.
fn parse_attribute_list(input: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;

    let mut push = |field: &mut String| {
        if let Some((key, value)) = field.split_once('=') {
            pairs.push((key.trim().to_string(), value.trim().trim_matches('"').to_string()));
        }
        field.clear();
    };

    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                field.push(c);
            }
            ',' if !in_quotes => push(&mut field),
            _ => field.push(c),
        }
    }
    push(&mut field);

    pairs
}

pub(crate) fn parse_iv(iv_hex: &str) -> Result<[u8; 16], PipelineError> {
    let digits = iv_hex
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let mut iv = [0u8; 16];
    hex::decode_to_slice(digits, &mut iv)
        .map_err(|e| PipelineError::decryption(format!("failed to parse IV '{iv_hex}': {e}")))?;
    Ok(iv)
}

/// Seek pointer over a broadcast window.
///
/// Yields the window start, then advances by a fixed step; stops once the
/// probe reaches or passes the window end.
#[derive(Debug, Clone)]
pub struct PlaylistCursor {
    probe: NaiveDateTime,
    end: NaiveDateTime,
    step: TimeDelta,
}

impl PlaylistCursor {
    pub fn new(window: BroadcastWindow, step: Duration) -> Result<Self, PipelineError> {
        let step = TimeDelta::from_std(step)
            .ok()
            .filter(|s| *s > TimeDelta::zero())
            .ok_or_else(|| PipelineError::invalid_request("seek step must be positive"))?;
        Ok(Self {
            probe: window.start,
            end: window.end,
            step,
        })
    }
}

impl Iterator for PlaylistCursor {
    type Item = NaiveDateTime;

    fn next(&mut self) -> Option<Self::Item> {
        if self.probe >= self.end {
            return None;
        }
        let current = self.probe;
        self.probe += self.step;
        Some(current)
    }
}

#[async_trait]
pub trait PlaylistProvider: Send + Sync {
    /// Every segment of the request's window, in playback order.
    async fn discover_segments(
        &self,
        request: &DownloadRequest,
    ) -> Result<Vec<SegmentReference>, PipelineError>;
}

pub struct PlaylistEngine {
    client: Client,
    config: PlaylistConfig,
    credentials: Arc<dyn CredentialProvider>,
}

impl PlaylistEngine {
    pub fn new(
        client: Client,
        config: PlaylistConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            client,
            config,
            credentials,
        }
    }

    /// GET a playlist document; returns the final URL (after redirects) with the body.
    async fn fetch_text(&self, url: &str) -> Result<(Url, String), PipelineError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::upstream(url, e.to_string()))?;
        read_playlist_response(url, response).await
    }

    async fn fetch_probe(
        &self,
        request: &DownloadRequest,
        credentials: &Credentials,
        lsid: &str,
        probe: &NaiveDateTime,
    ) -> Result<(Url, String), PipelineError> {
        let url = self.config.playlist_url.as_str();
        let ft = format_timestamp(&request.ft);
        let to = format_timestamp(&request.to);
        let seek = format_timestamp(probe);
        let step_secs = self.config.seek_step.as_secs().to_string();

        let response = self
            .client
            .get(url)
            .header("X-Radiko-AuthToken", &credentials.auth_token)
            .header("X-Radiko-AreaId", &credentials.area_id)
            .query(&[
                ("lsid", lsid),
                ("station_id", request.station_id.as_str()),
                ("l", step_secs.as_str()),
                ("start_at", ft.as_str()),
                ("end_at", to.as_str()),
                ("type", "b"),
                ("ft", ft.as_str()),
                ("to", to.as_str()),
                ("seek", seek.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::upstream(url, e.to_string()))?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(PipelineError::AuthExpired {
                reason: format!(
                    "playlist request for {} rejected with HTTP {}",
                    request.station_id,
                    response.status()
                ),
            });
        }

        read_playlist_response(url, response).await
    }

    /// Fetch each sub-playlist listed in `master` and append its segments.
    async fn expand_sub_playlists(
        &self,
        master_url: &Url,
        master_body: &str,
        out: &mut Vec<PlaylistEntry>,
    ) -> Result<usize, PipelineError> {
        let sub_playlists = parse_playlist(master_body, master_url)?;
        if sub_playlists.is_empty() {
            debug!(url = %master_url, "Probe listed no sub-playlists");
        }

        let before = out.len();
        for sub in &sub_playlists {
            let (sub_url, body) = self.fetch_text(&sub.url).await?;
            let segments = parse_playlist(&body, &sub_url)?;
            debug!(url = %sub_url, segments = segments.len(), "Parsed sub-playlist");
            out.extend(segments);
        }
        Ok(out.len() - before)
    }
}

async fn read_playlist_response(
    url: &str,
    response: reqwest::Response,
) -> Result<(Url, String), PipelineError> {
    if !response.status().is_success() {
        return Err(PipelineError::http_status(url, response.status()));
    }
    let final_url = response.url().clone();
    let body = response
        .text()
        .await
        .map_err(|e| PipelineError::upstream(url, e.to_string()))?;
    Ok((final_url, body))
}

#[async_trait]
impl PlaylistProvider for PlaylistEngine {
    #[instrument(skip(self, request), fields(station = %request.station_id))]
    async fn discover_segments(
        &self,
        request: &DownloadRequest,
    ) -> Result<Vec<SegmentReference>, PipelineError> {
        let mut entries = Vec::new();

        if let Some(stream_url) = &request.stream_url {
            let (master_url, body) = self.fetch_text(stream_url).await?;
            self.expand_sub_playlists(&master_url, &body, &mut entries)
                .await?;
        } else {
            let cursor = PlaylistCursor::new(request.window(), self.config.seek_step)?;
            let credentials = self.credentials.credentials(&request.station_id).await?;
            let lsid = Uuid::new_v4().simple().to_string();

            for probe in cursor {
                let (master_url, body) = self
                    .fetch_probe(request, &credentials, &lsid, &probe)
                    .await?;
                let added = self
                    .expand_sub_playlists(&master_url, &body, &mut entries)
                    .await?;
                debug!(seek = %format_timestamp(&probe), added, "Probe complete");
            }
        }

        info!(segments = entries.len(), "Playlist discovery finished");

        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| SegmentReference {
                index,
                url: entry.url,
                key: entry.key,
            })
            .collect())
    }
}
