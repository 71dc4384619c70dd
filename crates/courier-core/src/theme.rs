//! Theme capability: static resources and the theme property map.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};

/// Name of the property file read by [`DirectoryTheme`].
pub const PROPERTIES_FILE: &str = "theme.properties";

/// Source of theme resources.
///
/// Implementations are shared between concurrent sends and only read.
pub trait Theme: Send + Sync {
    /// Opens a fresh reader positioned at the start of `path`, or `None` if
    /// the resource does not exist.
    fn resource(&self, path: &str) -> Option<Box<dyn Read + Send>>;

    /// Returns the theme's properties.
    ///
    /// # Errors
    ///
    /// Returns an error if the properties cannot be loaded.
    fn properties(&self) -> io::Result<HashMap<String, String>>;
}

/// Theme stored in a directory: resources are files below the root and
/// properties come from `theme.properties`.
#[derive(Debug, Clone)]
pub struct DirectoryTheme {
    root: PathBuf,
}

impl DirectoryTheme {
    /// Creates a theme rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the theme directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Theme for DirectoryTheme {
    fn resource(&self, path: &str) -> Option<Box<dyn Read + Send>> {
        let relative = Path::new(path);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            tracing::warn!(%path, "Refusing theme resource outside the theme directory");
            return None;
        }

        match File::open(self.root.join(relative)) {
            Ok(file) => Some(Box::new(file)),
            Err(err) => {
                tracing::debug!(%path, error = %err, "Theme resource not found");
                None
            }
        }
    }

    fn properties(&self) -> io::Result<HashMap<String, String>> {
        let text = std::fs::read_to_string(self.root.join(PROPERTIES_FILE))?;
        Ok(parse_properties(&text))
    }
}

/// In-memory theme, useful for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryTheme {
    resources: HashMap<String, Vec<u8>>,
    properties: HashMap<String, String>,
}

impl MemoryTheme {
    /// Creates an empty theme.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource.
    #[must_use]
    pub fn with_resource(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.resources.insert(path.into(), data.into());
        self
    }

    /// Sets a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl Theme for MemoryTheme {
    fn resource(&self, path: &str) -> Option<Box<dyn Read + Send>> {
        self.resources
            .get(path)
            .map(|data| Box::new(Cursor::new(data.clone())) as Box<dyn Read + Send>)
    }

    fn properties(&self) -> io::Result<HashMap<String, String>> {
        Ok(self.properties.clone())
    }
}

/// Parses `key=value` / `key: value` lines; `#` and `!` start comments.
fn parse_properties(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(['#', '!']))
        .filter_map(|line| {
            let split = line.find(['=', ':'])?;
            let key = line[..split].trim();
            let value = line[split + 1..].trim();
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
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

    fn temp_theme(name: &str) -> DirectoryTheme {
        let root = std::env::temp_dir().join(format!("courier-theme-{name}-{}", std::process::id()));
        std::fs::create_dir_all(root.join("img")).unwrap();
        DirectoryTheme::new(root)
    }

    #[test]
    fn test_parse_properties() {
        let props = parse_properties(
            "# comment\n! also comment\nattachments = img/logo.png, terms.pdf\nlocales: en,de\n\nbroken\n",
        );
        assert_eq!(props.len(), 2);
        assert_eq!(props["attachments"], "img/logo.png, terms.pdf");
        assert_eq!(props["locales"], "en,de");
    }

    #[test]
    fn test_directory_theme_reads_resources() {
        let theme = temp_theme("read");
        std::fs::write(theme.root().join("img/logo.png"), b"\x89PNG").unwrap();
        std::fs::write(theme.root().join(PROPERTIES_FILE), "attachments=img/logo.png\n").unwrap();

        let mut data = Vec::new();
        theme
            .resource("img/logo.png")
            .unwrap()
            .read_to_end(&mut data)
            .unwrap();
        assert_eq!(data, b"\x89PNG");
        assert_eq!(theme.properties().unwrap()["attachments"], "img/logo.png");
        assert!(theme.resource("img/missing.png").is_none());
    }

    #[test]
    fn test_directory_theme_rejects_escape() {
        let theme = temp_theme("escape");
        assert!(theme.resource("../etc/passwd").is_none());
        assert!(theme.resource("/etc/passwd").is_none());
    }

    #[test]
    fn test_missing_properties_file_is_error() {
        let theme = DirectoryTheme::new("/nonexistent/courier-theme");
        assert!(theme.properties().is_err());
    }

    #[test]
    fn test_memory_theme_streams_are_independent() {
        let theme = MemoryTheme::new().with_resource("a.txt", "hello");
        let mut first = theme.resource("a.txt").unwrap();
        let mut second = theme.resource("a.txt").unwrap();

        let mut buf = [0u8; 2];
        first.read_exact(&mut buf).unwrap();
        let mut rest = String::new();
        second.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "hello");
    }
}
