//! Client-side record filters applied while a page is appended.

use crate::model::{Build, ImageDescriptor};

/// Decides whether a fetched record is kept by the catalog.
pub trait RecordFilter<R>: Send + Sync {
    /// True if `record` should be kept.
    fn matches(&self, record: &R) -> bool;
}

impl<R, F> RecordFilter<R> for F
where
    F: Fn(&R) -> bool + Send + Sync,
{
    fn matches(&self, record: &R) -> bool {
        self(record)
    }
}

/// Scope of a build listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BuildFilter {
    /// Every build of the registry.
    #[default]
    All,
    /// Builds started by the named build task.
    Task(String),
    /// Builds that pushed an image into the named repository.
    Repository(String),
    /// Builds that pushed the given image, as `repo:tag` or a bare tag.
    Image(String),
}

impl BuildFilter {
    /// True when nothing is filtered out.
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl RecordFilter<Build> for BuildFilter {
    fn matches(&self, build: &Build) -> bool {
        match self {
            Self::All => true,
            Self::Task(name) => build.build_task.as_deref() == Some(name.as_str()),
            Self::Repository(name) => build
                .images()
                .any(|img| img.repository.as_deref() == Some(name.as_str())),
            Self::Image(reference) => {
                let (repository, tag) = split_reference(reference);
                build.images().any(|img| image_matches(img, repository, tag))
            }
        }
    }
}

fn split_reference(reference: &str) -> (Option<&str>, &str) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !repo.is_empty() => (Some(repo), tag),
        Some((_, tag)) => (None, tag),
        None => (None, reference),
    }
}

fn image_matches(img: &ImageDescriptor, repository: Option<&str>, tag: &str) -> bool {
    if img.tag.as_deref() != Some(tag) {
        return false;
    }
    match repository {
        Some(repo) => img.repository.as_deref() == Some(repo),
        None => true,
    }
}
