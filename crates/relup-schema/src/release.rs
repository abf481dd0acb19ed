//! Releases and the patterns used to pick assets out of them.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Archive container an asset is packed in.
///
/// Absence of a format (`None` at the use site) means the asset is a raw
/// file that is copied as-is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// Zip archive (`.zip`).
    Zip,
    /// Uncompressed tar archive (`.tar`).
    Tar,
    /// Gzip-compressed tar archive (`.tar.gz` / `.tgz`).
    Tgz,
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Zip => "zip",
            Self::Tar => "tar",
            Self::Tgz => "tgz",
        };
        f.write_str(s)
    }
}

/// A regular expression that must match an asset file name in full.
///
/// The source expression is anchored on construction, so `tool\.zip` will
/// not match `tool.zip.sig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetPattern {
    source: String,
    regex: Regex,
}

impl AssetPattern {
    /// Compile a full-match pattern.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`regex::Error`] if `pattern` is not a valid
    /// regular expression.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Whether `name` matches the pattern from its first to its last byte.
    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// The expression as it was written, without the anchors.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for AssetPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for AssetPattern {}

impl std::fmt::Display for AssetPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.source)
    }
}

impl TryFrom<String> for AssetPattern {
    type Error = regex::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<AssetPattern> for String {
    fn from(pattern: AssetPattern) -> Self {
        pattern.source
    }
}

/// More than one asset of a release matched a pattern that expects one.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Multiple assets match pattern {pattern:?}: {matches:?}")]
pub struct AmbiguousAsset {
    /// The pattern source.
    pub pattern: String,
    /// Every asset name that matched.
    pub matches: Vec<String>,
}

/// A published release: its tag and where each of its assets can be fetched.
///
/// Immutable once built. An empty asset map is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    tag: String,
    assets: BTreeMap<String, String>,
}

impl Release {
    /// Build a release from its tag and `(asset file name, download url)` pairs.
    pub fn new(
        tag: impl Into<String>,
        assets: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            tag: tag.into(),
            assets: assets.into_iter().collect(),
        }
    }

    /// The release tag, e.g. `v8.1.0`.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// All assets, keyed by file name.
    pub fn assets(&self) -> &BTreeMap<String, String> {
        &self.assets
    }

    /// Download URL for the asset called `name`.
    pub fn asset_url(&self, name: &str) -> Option<&str> {
        self.assets.get(name).map(String::as_str)
    }

    /// Lazily yield every asset name that fully matches `pattern`.
    pub fn matching_assets<'a, 'p>(
        &'a self,
        pattern: &'p AssetPattern,
    ) -> impl Iterator<Item = &'a str> + use<'a, 'p> {
        self.assets
            .keys()
            .map(String::as_str)
            .filter(move |name| pattern.is_match(name))
    }

    /// The one asset matching `pattern`.
    ///
    /// `Ok(None)` means nothing matched; the caller decides whether that
    /// blocks anything.
    ///
    /// # Errors
    ///
    /// Returns [`AmbiguousAsset`] when two or more assets match.
    pub fn single_matching_asset(
        &self,
        pattern: &AssetPattern,
    ) -> Result<Option<&str>, AmbiguousAsset> {
        let mut matches = self.matching_assets(pattern);
        let Some(first) = matches.next() else {
            return Ok(None);
        };
        if let Some(second) = matches.next() {
            let mut all = vec![first.to_string(), second.to_string()];
            all.extend(matches.map(str::to_string));
            return Err(AmbiguousAsset {
                pattern: pattern.as_str().to_string(),
                matches: all,
            });
        }
        Ok(Some(first))
    }
}
