// Segment decryption: resolves AES-128 keys once per key URI and decrypts
// CBC payloads, optionally on the blocking thread pool.

use std::collections::HashMap;

use aes::Aes128;
use bytes::Bytes;
use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use reqwest::Client;
use tracing::{debug, info};

use crate::PipelineError;
use crate::hls::get_bytes;
use crate::hls::playlist::SegmentReference;
use crate::hls::retry::{RetryAction, RetryPolicy, retry_with_delay};

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Decrypt one AES-128-CBC payload with PKCS#7 padding.
pub fn decrypt_segment(ciphertext: &[u8], key: &[u8], iv: &[u8; 16]) -> Result<Bytes, PipelineError> {
    let cipher = Aes128CbcDec::new_from_slices(key, iv).map_err(|e| {
        PipelineError::decryption(format!("failed to initialize AES decryptor: {e}"))
    })?;

    let mut buffer = ciphertext.to_vec();
    let plaintext_len = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|e| {
            PipelineError::decryption(format!(
                "malformed ciphertext ({} bytes): {e}",
                ciphertext.len()
            ))
        })?
        .len();

    buffer.truncate(plaintext_len);
    Ok(Bytes::from(buffer))
}

/// Runs decryption inline or on tokio's blocking pool.
#[derive(Debug, Clone, Copy)]
pub struct DecryptionOffloader {
    enabled: bool,
}

impl DecryptionOffloader {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub async fn decrypt(
        &self,
        data: Bytes,
        key: [u8; 16],
        iv: [u8; 16],
    ) -> Result<Bytes, PipelineError> {
        if self.enabled {
            tokio::task::spawn_blocking(move || decrypt_segment(&data, &key, &iv))
                .await
                .map_err(|e| {
                    PipelineError::decryption(format!("decryption offload task failed: {e}"))
                })?
        } else {
            decrypt_segment(&data, &key, &iv)
        }
    }
}

/// Downloads raw key material.
pub struct KeyFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl KeyFetcher {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub async fn fetch_key(&self, key_uri: &str) -> Result<[u8; 16], PipelineError> {
        let raw = retry_with_delay(&self.policy, key_uri, |_| async move {
            RetryAction::from(get_bytes(&self.client, key_uri).await)
        })
        .await?;

        raw[..].try_into().map_err(|_| {
            PipelineError::decryption(format!(
                "key from {key_uri} has incorrect length: {} bytes (expected 16)",
                raw.len()
            ))
        })
    }
}

/// Keys of one run, by absolute key URI.
///
/// Filled before segments are dispatched and read-only afterwards, so
/// workers share it without locking.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: HashMap<String, [u8; 16]>,
}

impl KeyRing {
    /// Fetch every distinct key referenced by `segments`, each exactly once.
    pub async fn resolve(
        segments: &[SegmentReference],
        fetcher: &KeyFetcher,
    ) -> Result<Self, PipelineError> {
        let mut ring = Self::default();
        for uri in segments.iter().filter_map(|s| s.key.as_ref().map(|k| &k.uri)) {
            if ring.keys.contains_key(uri) {
                continue;
            }
            let key = fetcher.fetch_key(uri).await?;
            debug!(uri = %uri, "Resolved decryption key");
            ring.keys.insert(uri.clone(), key);
        }
        if !ring.keys.is_empty() {
            info!(keys = ring.keys.len(), "Decryption keys resolved");
        }
        Ok(ring)
    }

    pub fn insert(&mut self, uri: impl Into<String>, key: [u8; 16]) {
        self.keys.insert(uri.into(), key);
    }

    pub fn get(&self, uri: &str) -> Option<&[u8; 16]> {
        self.keys.get(uri)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
