//! Collision-resistant stored-name minting for uploaded attachments.
//!
//! Stored names carry the document category, the tail of the owning request
//! number, a microsecond local timestamp and a per-file suffix. Minting is
//! serialized through a mutex with a 1ms pause so two files uploaded in the
//! same instant never share a timestamp.

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{AppError, AppResult};

/// Characters forbidden in client-supplied filenames.
const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\0'];

/// Maximum length for both original and stored filenames.
const MAX_FILENAME_LEN: usize = 255;

static CATEGORY_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // pattern is a literal
    Regex::new("^[a-zA-Z0-9_]{1,50}$").unwrap()
});

static FIELD_ID_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // pattern is a literal
    Regex::new("^[a-zA-Z0-9_]{1,20}$").unwrap()
});

/// Mints unique stored filenames for uploaded attachments.
#[derive(Debug)]
pub struct FilenameMinter {
    clock: Clock,
    gate: Mutex<()>,
}

impl FilenameMinter {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            gate: Mutex::new(()),
        }
    }

    /// Check a client-supplied filename before minting.
    ///
    /// Rejects empty names, names over 255 characters and names carrying
    /// path-hostile characters.
    pub fn validate_original(&self, original: &str) -> AppResult<()> {
        if original.trim().is_empty() {
            return Err(AppError::validation("filename", "filename must not be empty"));
        }
        if original.len() > MAX_FILENAME_LEN {
            return Err(AppError::validation(
                "filename",
                "filename must not exceed 255 characters",
            ));
        }
        if original.contains(FORBIDDEN_CHARS) {
            return Err(AppError::validation(
                "filename",
                "filename contains forbidden characters",
            ));
        }
        Ok(())
    }

    /// Mint a stored filename for an uploaded attachment.
    ///
    /// The result is `{category}_{request_tail}_{timestamp}_{suffix}{ext}`
    /// where `request_tail` is the last eight characters of the request
    /// number with its `REQ-` prefix and dashes removed, and `suffix` is the
    /// form field id when given or eight hex characters of a fresh UUID.
    /// A blank request number omits the tail segment entirely.
    pub async fn mint(
        &self,
        original: &str,
        category: &str,
        request_number: &str,
        field_id: Option<&str>,
    ) -> AppResult<String> {
        self.validate_original(original)?;

        if !CATEGORY_RE.is_match(category) {
            return Err(AppError::validation(
                "category",
                "category must match ^[a-zA-Z0-9_]{1,50}$",
            ));
        }
        if let Some(field_id) = field_id {
            if !FIELD_ID_RE.is_match(field_id) {
                return Err(AppError::validation(
                    "field_id",
                    "field_id must match ^[a-zA-Z0-9_]{1,20}$",
                ));
            }
        }

        let ext = extension_of(original);
        let request_part = request_tail(request_number);
        let compose = |ts: &str, suffix: &str| match &request_part {
            Some(part) => format!("{category}_{part}_{ts}_{suffix}{ext}"),
            None => format!("{category}_{ts}_{suffix}{ext}"),
        };

        // Hold the gate across the timestamp read so concurrent mints land
        // on distinct microseconds.
        let guard = self.gate.lock().await;
        let timestamp = self.clock.timestamp_for_filename();
        tokio::time::sleep(Duration::from_millis(1)).await;
        drop(guard);

        let suffix = field_id.map_or_else(short_uuid_suffix, ToString::to_string);
        let name = compose(&timestamp, &suffix);

        if name.len() <= MAX_FILENAME_LEN {
            return Ok(name);
        }

        // Over-long result: retry with a second-precision timestamp and a
        // shorter random suffix.
        let short_ts = self.clock.short_timestamp_for_filename();
        let short_suffix = &Uuid::new_v4().simple().to_string()[..6];
        let name = compose(&short_ts, short_suffix);
        if name.len() <= MAX_FILENAME_LEN {
            return Ok(name);
        }

        let fallback = format!("file_{}.tmp", &Uuid::new_v4().simple().to_string()[..12]);
        tracing::warn!(
            original = %original,
            category = %category,
            fallback = %fallback,
            "minted name exceeded length limit twice, using fallback"
        );
        Ok(fallback)
    }
}

/// Lower-cased extension of `original`, with the dot, defaulting to `.tmp`.
fn extension_of(original: &str) -> String {
    original
        .rsplit_once('.')
        .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
        .map_or_else(|| ".tmp".to_string(), |(_, ext)| format!(".{}", ext.to_lowercase()))
}

/// Last eight characters of the request number with `REQ-` and dashes
/// removed, or `None` when nothing remains.
fn request_tail(request_number: &str) -> Option<String> {
    let cleaned: String = request_number
        .trim()
        .trim_start_matches("REQ-")
        .chars()
        .filter(|c| *c != '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let start = cleaned.len().saturating_sub(8);
    Some(cleaned[start..].to_string())
}

fn short_uuid_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn minter() -> FilenameMinter {
        FilenameMinter::new(Clock::new(3))
    }

    #[test]
    fn test_validate_rejects_empty_and_forbidden() {
        let m = minter();
        assert!(m.validate_original("").is_err());
        assert!(m.validate_original("   ").is_err());
        assert!(m.validate_original("bad<name>.pdf").is_err());
        assert!(m.validate_original("what?.pdf").is_err());
        assert!(m.validate_original(&"x".repeat(256)).is_err());
        assert!(m.validate_original("license scan.pdf").is_ok());
    }

    #[test]
    fn test_extension_lowercased_with_tmp_default() {
        assert_eq!(extension_of("scan.PDF"), ".pdf");
        assert_eq!(extension_of("archive.tar.GZ"), ".gz");
        assert_eq!(extension_of("no_extension"), ".tmp");
        assert_eq!(extension_of(".hidden"), ".tmp");
    }

    #[test]
    fn test_request_tail_strips_prefix_and_dashes() {
        assert_eq!(request_tail("REQ-20250614034524").unwrap(), "14034524");
        assert_eq!(request_tail("REQ-2025-0614-034524").unwrap(), "14034524");
        assert_eq!(request_tail("REQ-123").unwrap(), "123");
        assert_eq!(request_tail(""), None);
        assert_eq!(request_tail("REQ-"), None);
    }

    #[tokio::test]
    async fn test_mint_omits_tail_for_blank_request_number() {
        let m = minter();
        let name = m.mint("scan.pdf", "licenses", "", Some("front")).await.unwrap();
        assert!(name.starts_with("licenses_2"));
        assert!(!name.contains("__"));
        assert!(name.ends_with("_front.pdf"));
    }

    #[tokio::test]
    async fn test_mint_shape_with_field_id() {
        let m = minter();
        let name = m
            .mint("scan.PDF", "licenses", "REQ-20250614034524", Some("front"))
            .await
            .unwrap();
        assert!(name.starts_with("licenses_14034524_"));
        assert!(name.ends_with("_front.pdf"));
    }

    #[tokio::test]
    async fn test_mint_random_suffix_without_field_id() {
        let m = minter();
        let name = m
            .mint("scan.pdf", "licenses", "REQ-20250614034524", None)
            .await
            .unwrap();
        let suffix = name
            .strip_suffix(".pdf")
            .unwrap()
            .rsplit('_')
            .next()
            .unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_mint_rejects_bad_category_and_field_id() {
        let m = minter();
        assert!(m
            .mint("scan.pdf", "bad category", "REQ-1", None)
            .await
            .is_err());
        assert!(m
            .mint("scan.pdf", "licenses", "REQ-1", Some("way_too_long_field_id_x"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_concurrent_mints_are_unique() {
        let m = std::sync::Arc::new(minter());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = m.clone();
            handles.push(tokio::spawn(async move {
                m.mint("scan.pdf", "licenses", "REQ-20250614034524", Some("front"))
                    .await
                    .unwrap()
            }));
        }
        let mut names = Vec::new();
        for h in handles {
            names.push(h.await.unwrap());
        }
        names.sort();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }
}
