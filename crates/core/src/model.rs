//! Wire and bookkeeping types shared by the catalog and its sources.

use serde::{Deserialize, Serialize};

/// A value held by a [`crate::catalog::RemoteCatalog`].
///
/// The catalog only looks at `id()` to correlate a record with its remote link;
/// every other field is opaque to it.
pub trait CatalogRecord: Clone + Send + Sync + 'static {
    /// Stable identity used for the "resolve record" call.
    fn id(&self) -> &str;
}

/// One result of a "list records" call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<R> {
    /// Records in arrival order.
    pub records: Vec<R>,
    /// Continuation token, `None` at end of stream.
    pub next_token: Option<String>,
}

impl<R> Page<R> {
    /// Builds a page, treating an empty token as end of stream.
    pub fn new(records: Vec<R>, next_token: Option<String>) -> Self {
        Self {
            records,
            next_token: next_token.filter(|t| !t.is_empty()),
        }
    }

    /// Final page of a stream.
    pub fn last(records: Vec<R>) -> Self {
        Self::new(records, None)
    }
}

/// Position of a catalog in its remote stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Cursor {
    /// No page has been fetched yet.
    #[default]
    NotYetLoaded,
    /// More pages exist; the token fetches the next one.
    More(String),
    /// The remote reported no continuation.
    EndOfStream,
}

impl Cursor {
    /// Cursor that follows a page carrying `next_token`.
    pub fn after(next_token: Option<String>) -> Self {
        match next_token {
            Some(t) if !t.is_empty() => Self::More(t),
            _ => Self::EndOfStream,
        }
    }

    /// Token to send with the next list call, `None` for the first page.
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::More(t) => Some(t),
            _ => None,
        }
    }

    /// Whether `load_next` can still make progress.
    pub fn has_more(&self) -> bool {
        !matches!(self, Self::EndOfStream)
    }
}

/// Per-record link resolution state.
///
/// Legal transitions: `Unresolved -> Resolving -> Resolved`, and
/// `Resolving -> Unresolved` when the remote call fails.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkSlot {
    /// No link yet and nobody is fetching one.
    #[default]
    Unresolved,
    /// A remote call is outstanding.
    Resolving,
    /// Cached link; terminal.
    Resolved(String),
}

impl LinkSlot {
    /// Cached url, if any.
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Resolved(url) => Some(url),
            _ => None,
        }
    }

    /// True once a url is cached.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

/// Run status of a registry build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub enum BuildStatus {
    Queued,
    Started,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Error,
    Timeout,
    /// Missing or not recognised by this client.
    #[default]
    #[serde(other)]
    Unknown,
}

/// OS the build ran on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    /// `Linux` or `Windows`.
    #[serde(default)]
    pub os_type: Option<String>,
}

/// An image pushed by a build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ImageDescriptor {
    #[serde(default)]
    pub registry: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
}

impl ImageDescriptor {
    /// Digest shortened to `abcde...vwxyz` for display; short digests are returned whole.
    pub fn short_digest(&self) -> Option<String> {
        let digest = self.digest.as_deref()?;
        let chars: Vec<char> = digest.chars().collect();
        if chars.len() <= 10 {
            return Some(digest.to_string());
        }
        let head: String = chars[..5].iter().collect();
        let tail: String = chars[chars.len() - 5..].iter().collect();
        Some(format!("{head}...{tail}"))
    }
}

/// One build run as reported by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Build {
    pub build_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub build_task: Option<String>,
    #[serde(default)]
    pub status: BuildStatus,
    #[serde(default)]
    pub create_time: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub finish_time: Option<String>,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub output_images: Option<Vec<Option<ImageDescriptor>>>,
}

impl Build {
    /// Output images, skipping the null entries the registry sometimes returns.
    pub fn images(&self) -> impl Iterator<Item = &ImageDescriptor> {
        self.output_images
            .iter()
            .flatten()
            .filter_map(Option::as_ref)
    }
}

impl CatalogRecord for Build {
    fn id(&self) -> &str {
        &self.build_id
    }
}
