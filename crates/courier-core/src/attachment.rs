//! Attachment resolution from the theme's `attachments` property.
//!
//! Resolution never fails a send: every problem is logged at warn level and
//! the affected attachment (or the whole manifest) is skipped.

use std::io::{self, Read};

use courier_mime::{Attachment, ContentType};

use crate::theme::Theme;

/// Theme property listing the attachment paths, comma separated.
pub const ATTACHMENTS_PROPERTY: &str = "attachments";

/// Bytes read from the sample stream for content-type detection.
const SNIFF_LEN: u64 = 512;

/// Why a single attachment was skipped.
#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    /// The theme has no resource at this path.
    #[error("Attachment {path:?} is not available")]
    Unavailable {
        /// Manifest path.
        path: String,
    },

    /// Reading the resource failed.
    #[error("Could not read attachment {path:?}: {source}")]
    Read {
        /// Manifest path.
        path: String,
        /// I/O failure.
        #[source]
        source: io::Error,
    },
}

/// Two independent readers over one resource, both at the start.
///
/// `content` is transmitted; `sample` is only used to detect the content
/// type, so detection never moves the transmitted stream.
pub struct AttachmentSource {
    /// Stream whose bytes are attached.
    pub content: Box<dyn Read + Send>,
    /// Stream read for content-type detection.
    pub sample: Box<dyn Read + Send>,
}

impl std::fmt::Debug for AttachmentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentSource").finish_non_exhaustive()
    }
}

impl AttachmentSource {
    /// Opens both streams for `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AttachmentError::Unavailable`] if either stream cannot be
    /// opened.
    pub fn open(theme: &dyn Theme, path: &str) -> Result<Self, AttachmentError> {
        let unavailable = || AttachmentError::Unavailable {
            path: path.to_string(),
        };
        let content = theme.resource(path).ok_or_else(unavailable)?;
        let sample = theme.resource(path).ok_or_else(unavailable)?;
        Ok(Self { content, sample })
    }

    /// Detects the content type and reads the content.
    ///
    /// # Errors
    ///
    /// Returns [`AttachmentError::Read`] if either stream fails.
    pub fn load(self, path: &str) -> Result<Attachment, AttachmentError> {
        let read_error = |source| AttachmentError::Read {
            path: path.to_string(),
            source,
        };
        let filename = file_name(path);

        let mut head = Vec::new();
        self.sample
            .take(SNIFF_LEN)
            .read_to_end(&mut head)
            .map_err(read_error)?;
        let content_type = ContentType::sniff(&head, filename);

        Attachment::from_reader(filename, content_type, self.content).map_err(|err| match err {
            courier_mime::Error::Io(source) => read_error(source),
            other => read_error(io::Error::other(other)),
        })
    }
}

/// Splits the manifest on `,`, trimming entries and dropping empty ones.
#[must_use]
pub fn manifest(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .collect()
}

/// Last path segment, used as the attachment filename.
#[must_use]
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Resolves the theme's attachments in manifest order.
///
/// Returns an empty list when the properties cannot be read or declare no
/// attachments; unavailable or unreadable entries are skipped.
pub fn resolve(theme: &dyn Theme) -> Vec<Attachment> {
    let properties = match theme.properties() {
        Ok(properties) => properties,
        Err(err) => {
            tracing::warn!(
                error = %err,
                "Failed to get theme properties, sending without attachments"
            );
            return Vec::new();
        }
    };

    let Some(value) = properties.get(ATTACHMENTS_PROPERTY) else {
        tracing::warn!(
            "Theme declares no {ATTACHMENTS_PROPERTY} property, sending without attachments"
        );
        return Vec::new();
    };

    let paths = manifest(value);
    let mut attachments = Vec::with_capacity(paths.len());
    for path in paths {
        match AttachmentSource::open(theme, path).and_then(|source| source.load(path)) {
            Ok(attachment) => {
                tracing::debug!(
                    %path,
                    content_type = %attachment.content_type,
                    bytes = attachment.data.len(),
                    "Resolved attachment"
                );
                attachments.push(attachment);
            }
            Err(err) => tracing::warn!(error = %err, "Skipping attachment"),
        }
    }
    attachments
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::theme::MemoryTheme;
    use proptest::prelude::*;
    use std::collections::HashMap;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    /// Theme whose properties cannot be loaded.
    struct BrokenTheme;

    impl Theme for BrokenTheme {
        fn resource(&self, _path: &str) -> Option<Box<dyn Read + Send>> {
            None
        }

        fn properties(&self) -> io::Result<HashMap<String, String>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "theme.properties"))
        }
    }

    /// Theme that serves each resource exactly once.
    struct SingleShotTheme {
        served: std::sync::Mutex<Vec<String>>,
    }

    impl Theme for SingleShotTheme {
        fn resource(&self, path: &str) -> Option<Box<dyn Read + Send>> {
            let mut served = self.served.lock().unwrap();
            if served.iter().any(|p| p == path) {
                return None;
            }
            served.push(path.to_string());
            Some(Box::new(io::Cursor::new(b"data".to_vec())))
        }

        fn properties(&self) -> io::Result<HashMap<String, String>> {
            Ok(HashMap::from([(
                ATTACHMENTS_PROPERTY.to_string(),
                "once.bin".to_string(),
            )]))
        }
    }

    #[test]
    fn test_manifest_parsing() {
        assert_eq!(manifest("a.png, img/b.pdf ,,c"), vec!["a.png", "img/b.pdf", "c"]);
        assert!(manifest("").is_empty());
        assert!(manifest(" , ").is_empty());
    }

    #[test]
    fn test_file_name_is_last_segment() {
        assert_eq!(file_name("img/logo.png"), "logo.png");
        assert_eq!(file_name("logo.png"), "logo.png");
        assert_eq!(file_name("a/b/c/terms.pdf"), "terms.pdf");
        assert_eq!(file_name("docs/"), "docs");
    }

    #[test]
    fn test_resolve_sniffs_from_sample() {
        let theme = MemoryTheme::new()
            .with_resource("img/logo", PNG)
            .with_property(ATTACHMENTS_PROPERTY, "img/logo");

        let attachments = resolve(&theme);
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "logo");
        assert!(attachments[0].content_type.is("image", "png"));
        // The full stream is transmitted, not what remains after sniffing.
        assert_eq!(attachments[0].data, PNG);
    }

    #[test]
    fn test_resolve_falls_back_to_extension() {
        let theme = MemoryTheme::new()
            .with_resource("terms.txt", "plain words")
            .with_property(ATTACHMENTS_PROPERTY, "terms.txt");

        let attachments = resolve(&theme);
        assert!(attachments[0].content_type.is("text", "plain"));
    }

    #[test]
    fn test_missing_property_yields_nothing() {
        let theme = MemoryTheme::new().with_resource("logo.png", PNG);
        assert!(resolve(&theme).is_empty());
    }

    #[test]
    fn test_unreadable_properties_yield_nothing() {
        assert!(resolve(&BrokenTheme).is_empty());
    }

    #[test]
    fn test_missing_sample_skips_attachment() {
        let theme = SingleShotTheme {
            served: std::sync::Mutex::new(Vec::new()),
        };
        assert!(resolve(&theme).is_empty());
        assert!(matches!(
            AttachmentSource::open(&theme, "once.bin"),
            Err(AttachmentError::Unavailable { .. })
        ));
    }

    proptest! {
        #[test]
        fn resolves_available_entries_in_order(
            entries in proptest::collection::vec(("[a-z]{1,8}(/[a-z]{1,8})?\\.[a-z]{3}", any::<bool>()), 0..8)
        ) {
            let mut theme = MemoryTheme::new();
            let mut expected = Vec::new();
            let mut paths = Vec::new();
            for (i, (path, available)) in entries.iter().enumerate() {
                let path = format!("{i}{path}");
                if *available {
                    theme = theme.with_resource(path.clone(), vec![i as u8; 3]);
                    expected.push(file_name(&path).to_string());
                }
                paths.push(path);
            }
            theme = theme.with_property(ATTACHMENTS_PROPERTY, paths.join(","));

            let attachments = resolve(&theme);
            let names: Vec<_> = attachments.iter().map(|a| a.filename.clone()).collect();
            prop_assert_eq!(names, expected);
        }
    }
}
