#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use aes::Aes128;
use cbc::cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use tempfile::TempDir;
use tfrec_engine::config::{EncoderConfig, FetcherConfig, PlaylistConfig};
use tfrec_engine::{
    DownloadRequest, LocalDirectoryStore, Pipeline, PipelineConfig, StaticCredentials,
};

pub const AUTH_TOKEN: &str = "test-token";
pub const AREA_ID: &str = "JP13";

/// Scratch directories for one test: workspace root, library, encoder script.
pub struct Harness {
    pub work_root: TempDir,
    pub library: TempDir,
    pub tools: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            work_root: TempDir::new().unwrap(),
            library: TempDir::new().unwrap(),
            tools: TempDir::new().unwrap(),
        }
    }

    /// File the fake encoder writes its argument list to, one per line.
    pub fn args_log(&self) -> PathBuf {
        self.tools.path().join("ffmpeg-args.txt")
    }

    #[cfg(unix)]
    /// An ffmpeg stand-in that concatenates the manifest's files into the
    /// last argument.
    pub fn concat_encoder(&self) -> PathBuf {
        let script = format!(
            r#"#!/bin/sh
printf '%s\n' "$@" > '{log}'
manifest=""
prev=""
out=""
for arg in "$@"; do
  if [ "$prev" = "-i" ] && [ -z "$manifest" ]; then manifest="$arg"; fi
  prev="$arg"
  out="$arg"
done
: > "$out"
sed -n "s/^file '\(.*\)'$/\1/p" "$manifest" | while IFS= read -r f; do
  cat "$f" >> "$out"
done
echo "muxing finished" >&2
exit 0
"#,
            log = self.args_log().display()
        );
        self.write_tool("ffmpeg-concat", &script)
    }

    #[cfg(unix)]
    /// An ffmpeg stand-in that always fails.
    pub fn failing_encoder(&self) -> PathBuf {
        let script = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\necho 'Invalid data found when processing input' >&2\nexit 1\n",
            self.args_log().display()
        );
        self.write_tool("ffmpeg-fail", &script)
    }

    #[cfg(unix)]
    fn write_tool(&self, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.tools.path().join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    pub fn config(&self, server_uri: &str, encoder: PathBuf) -> PipelineConfig {
        PipelineConfig {
            playlist: PlaylistConfig {
                playlist_url: format!("{server_uri}/tf/playlist.m3u8"),
                seek_step: Duration::from_secs(300),
            },
            fetcher: FetcherConfig {
                max_attempts: 3,
                retry_delay: Duration::from_millis(10),
            },
            encoder: EncoderConfig {
                ffmpeg_path: encoder,
                ..EncoderConfig::default()
            },
            workspace_root: self.work_root.path().to_path_buf(),
            ..PipelineConfig::default()
        }
    }

    pub fn pipeline(&self, config: PipelineConfig) -> Pipeline {
        Pipeline::new(
            config,
            Arc::new(StaticCredentials::new(AUTH_TOKEN, AREA_ID)),
            Arc::new(LocalDirectoryStore::new(self.library.path())),
        )
        .unwrap()
    }

    /// Number of entries left under the workspace root.
    pub fn leftover_workspaces(&self) -> usize {
        std::fs::read_dir(self.work_root.path()).unwrap().count()
    }
}

pub fn request(ft: &str, to: &str) -> DownloadRequest {
    DownloadRequest::from_json(&format!(
        r#"{{
            "station_id": "TBS",
            "ft": "{ft}",
            "to": "{to}",
            "title": "Morning Show",
            "metadata": {{
                "title": "Morning Show",
                "artist": "DJ Hoge",
                "album": "Morning Show",
                "album_artist": "TBS",
                "date": "2024-01-01 06:00:00",
                "comment": null,
                "img": null
            }}
        }}"#
    ))
    .unwrap()
}

pub fn encrypt(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
    let cipher = cbc::Encryptor::<Aes128>::new_from_slices(key, iv).unwrap();
    let mut buffer = vec![0u8; (plaintext.len() / 16 + 1) * 16];
    buffer[..plaintext.len()].copy_from_slice(plaintext);
    cipher
        .encrypt_padded_mut::<Pkcs7>(&mut buffer, plaintext.len())
        .unwrap()
        .to_vec()
}

pub fn read_args(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_owned)
        .collect()
}
