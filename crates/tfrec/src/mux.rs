//! Encode & Mux: concatenates the downloaded segments losslessly with ffmpeg,
//! embedding metadata tags and optional cover artwork.

use std::path::{Path, PathBuf};

use reqwest::Client;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::PipelineError;
use crate::config::EncoderConfig;
use crate::hls::get_bytes;
use crate::hls::retry::{RetryAction, RetryPolicy, retry_with_delay};
use crate::request::Metadata;

/// Name of the concat demuxer manifest inside the workspace.
pub const MANIFEST_FILE_NAME: &str = "segment_files.txt";

/// Quote a path for the concat demuxer; `'` becomes `'\''`.
pub fn escape_concat_path(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

/// One `file '<path>'` line per segment, in order.
pub fn render_manifest(segments: &[PathBuf]) -> String {
    segments
        .iter()
        .map(|path| format!("file {}\n", escape_concat_path(path)))
        .collect()
}

/// Build the ffmpeg argument list.
///
/// Tags come from [`Metadata::tags`], so null or empty values never
/// produce a `-metadata` directive.
pub fn build_args(
    manifest: &Path,
    artwork: Option<&Path>,
    metadata: &Metadata,
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-y", "-safe", "0", "-f", "concat", "-i"]
        .into_iter()
        .map(String::from)
        .collect();
    args.push(manifest.to_string_lossy().into_owned());

    if let Some(artwork) = artwork {
        args.push("-i".to_string());
        args.push(artwork.to_string_lossy().into_owned());
        args.extend(
            [
                "-map",
                "0:a",
                "-map",
                "1:v",
                "-disposition:1",
                "attached_pic",
                "-id3v2_version",
                "3",
            ]
            .map(String::from),
        );
    }

    for (key, value) in metadata.tags() {
        args.extend(["-metadata".to_string(), format!("{key}={value}")]);
    }

    args.extend(["-c".to_string(), "copy".to_string()]);
    args.push(output.to_string_lossy().into_owned());
    args
}

pub struct Muxer {
    config: EncoderConfig,
    client: Client,
    policy: RetryPolicy,
}

impl Muxer {
    pub fn new(config: EncoderConfig, client: Client, policy: RetryPolicy) -> Self {
        Self {
            config,
            client,
            policy,
        }
    }

    /// Download the artwork into `workspace`.
    ///
    /// Failure is not fatal: it is logged and the recording is muxed
    /// without a cover.
    pub async fn fetch_artwork(&self, url: &str, workspace: &Path) -> Option<PathBuf> {
        let path = workspace.join(artwork_file_name(url));
        let target = path.as_path();

        let result = retry_with_delay(&self.policy, url, |_| async move {
            let stored = async {
                let bytes = get_bytes(&self.client, url).await?;
                tokio::fs::write(target, &bytes).await?;
                Ok::<_, PipelineError>(bytes.len())
            };
            RetryAction::from(stored.await)
        })
        .await;

        match result {
            Ok(size) => {
                debug!(url, size, "Artwork downloaded");
                Some(path)
            }
            Err(e) => {
                warn!(url, error = %e, "Artwork download failed, continuing without cover");
                None
            }
        }
    }

    /// Concatenate `segments` into `workspace/<output_name>`.
    #[instrument(skip(self, segments, metadata, artwork, workspace), fields(segments = segments.len()))]
    pub async fn mux(
        &self,
        segments: &[PathBuf],
        metadata: &Metadata,
        artwork: Option<&Path>,
        workspace: &Path,
        output_name: &str,
    ) -> Result<PathBuf, PipelineError> {
        let manifest = workspace.join(MANIFEST_FILE_NAME);
        tokio::fs::write(&manifest, render_manifest(segments)).await?;

        let output = workspace.join(output_name);
        let args = build_args(&manifest, artwork, metadata, &output);
        debug!("FFmpeg args: {:?}", args);

        let mut command = process_utils::tokio_command(&self.config.ffmpeg_path);
        command.args(&args).env("LC_ALL", "C");

        let captured = process_utils::run_captured(&mut command)
            .await
            .map_err(|e| {
                PipelineError::encoder(
                    None,
                    format!(
                        "failed to spawn {}: {e}",
                        self.config.ffmpeg_path.display()
                    ),
                )
            })?;

        if !captured.success() {
            let tail = captured.stderr_tail(self.config.stderr_tail_lines);
            let stderr = match captured.status.code() {
                Some(_) => tail,
                None => format!("encoder terminated by signal\n{tail}"),
            };
            return Err(PipelineError::encoder(captured.status.code(), stderr));
        }

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(PipelineError::encoder(
                Some(0),
                format!("encoder reported success but {} is missing", output.display()),
            ));
        }

        info!(
            output = %output.display(),
            duration_ms = captured.elapsed.as_millis() as u64,
            "Mux complete"
        );
        Ok(output)
    }
}

/// `artwork.<ext>` using the URL's extension, `jpg` when it has none.
fn artwork_file_name(url: &str) -> String {
    let extension = Url::parse(url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_owned))
        })
        .and_then(|name| {
            Path::new(&name)
                .extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        })
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "jpg".to_string());
    format!("artwork.{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> Metadata {
        Metadata {
            title: Some("Morning Show".into()),
            artist: Some("DJ Hoge".into()),
            album: Some("Morning Show".into()),
            album_artist: Some("TBS".into()),
            date: Some("2024-01-01 06:00:00".into()),
            comment: Some("episode 12".into()),
            img: None,
        }
    }

    fn position(args: &[String], needle: &str) -> usize {
        args.iter()
            .position(|a| a == needle)
            .unwrap_or_else(|| panic!("{needle} not found in {args:?}"))
    }

    #[test]
    fn manifest_lines_are_quoted_and_ordered() {
        let manifest = render_manifest(&[
            PathBuf::from("/w/00000_a.aac"),
            PathBuf::from("/w/00001_it's.aac"),
        ]);
        assert_eq!(
            manifest,
            "file '/w/00000_a.aac'\nfile '/w/00001_it'\\''s.aac'\n"
        );
    }

    #[test]
    fn args_without_artwork() {
        let args = build_args(
            Path::new("/w/segment_files.txt"),
            None,
            &metadata(),
            Path::new("/w/out.m4a"),
        );

        assert_eq!(
            &args[..8],
            ["-hide_banner", "-y", "-safe", "0", "-f", "concat", "-i", "/w/segment_files.txt"]
        );
        assert!(!args.contains(&"attached_pic".to_string()));
        assert!(args.contains(&"artist=DJ Hoge".to_string()));
        assert!(args.contains(&"date=2024-01-01".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/w/out.m4a"));
        assert!(position(&args, "copy") > position(&args, "comment=episode 12"));
    }

    #[test]
    fn args_with_artwork_map_cover_stream() {
        let args = build_args(
            Path::new("/w/segment_files.txt"),
            Some(Path::new("/w/artwork.jpg")),
            &Metadata::default(),
            Path::new("/w/out.m4a"),
        );

        let second_input = position(&args, "/w/artwork.jpg");
        assert_eq!(args[second_input - 1], "-i");
        assert_eq!(
            &args[second_input + 1..second_input + 9],
            ["-map", "0:a", "-map", "1:v", "-disposition:1", "attached_pic", "-id3v2_version", "3"]
        );
        assert!(!args.contains(&"-metadata".to_string()));
    }

    #[test]
    fn empty_artist_is_omitted() {
        let mut meta = metadata();
        meta.artist = Some(String::new());
        meta.comment = None;

        let args = build_args(Path::new("m"), None, &meta, Path::new("o"));

        assert!(!args.iter().any(|a| a.starts_with("artist=")));
        assert!(!args.iter().any(|a| a.starts_with("comment=")));
        assert!(args.contains(&"title=Morning Show".to_string()));
    }

    #[test]
    fn unparseable_date_is_omitted() {
        let mut meta = metadata();
        meta.date = Some("someday".into());
        let args = build_args(Path::new("m"), None, &meta, Path::new("o"));
        assert!(!args.iter().any(|a| a.starts_with("date=")));
    }

    #[test]
    fn artwork_name_follows_url_extension() {
        assert_eq!(artwork_file_name("https://img.example.com/a/cover.PNG?x=1"), "artwork.png");
        assert_eq!(artwork_file_name("https://img.example.com/a/cover"), "artwork.jpg");
        assert_eq!(artwork_file_name("not a url"), "artwork.jpg");
    }
}
