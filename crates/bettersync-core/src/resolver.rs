//! Logical path to handle resolution.
//!
//! Resolution tries three layers in order and stops at the first hit:
//!
//! 1. **Traversal**: walk the tree component by component for each spelling
//!    produced by [`path_variations`], matching names case-insensitively.
//! 2. **Catalog name**: scan the configured roots and match audio files by
//!    filename, then by filename with the numeric track prefix stripped.
//! 3. **Fuzzy**: match the last two segments, parent folder exactly and base
//!    names by equality or containment.
//!
//! Playlists written by other tools rarely agree on case, drive prefixes or
//! track numbering; the later layers exist for those.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{Dispatch, debug, info};

use crate::catalog::{Catalog, CatalogScanner};
use crate::error::{Error, PathError, Result};
use crate::folder::FolderNavigator;
use crate::logging;
use crate::path::{LogicalPath, base_name, path_variations, split_components, strip_track_prefix};
use crate::retry::{self, RetryPolicy};
use crate::transport::{PARENT_ROOT, Transport};

/// Layer that produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Component-by-component traversal.
    Traversal,
    /// Catalog filename match.
    CatalogName,
    /// Parent folder and base name match.
    Fuzzy,
}

/// A successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Object handle.
    pub handle: u32,
    /// Layer that found it.
    pub strategy: Strategy,
    /// Device path of the match when found through the catalog.
    pub matched_path: Option<LogicalPath>,
}

/// Maps logical paths to handles.
pub struct PathResolver<'a, T: ?Sized> {
    transport: &'a T,
    dispatch: Dispatch,
    scan_roots: Vec<String>,
    listing: RetryPolicy,
}

impl<'a, T: Transport + ?Sized> PathResolver<'a, T> {
    /// Create a resolver scanning `/Music` for its fallbacks.
    pub fn new(transport: &'a T, dispatch: Dispatch) -> Self {
        Self {
            transport,
            dispatch,
            scan_roots: vec!["/Music".to_string()],
            listing: RetryPolicy::new(3, Duration::from_millis(100)),
        }
    }

    /// Roots scanned by the catalog fallbacks.
    #[must_use]
    pub fn with_scan_roots(mut self, roots: Vec<String>) -> Self {
        self.scan_roots = roots;
        self
    }

    /// Use `policy` for listing retries during traversal.
    #[must_use]
    pub const fn with_listing_policy(mut self, policy: RetryPolicy) -> Self {
        self.listing = policy;
        self
    }

    /// Resolve `path` to a handle.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when every layer fails.
    pub fn resolve(&self, storage_id: u32, path: &LogicalPath) -> Result<u32> {
        self.resolve_detailed(storage_id, path).map(|r| r.handle)
    }

    /// Resolve `path`, reporting which layer matched.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when every layer fails.
    pub fn resolve_detailed(&self, storage_id: u32, path: &LogicalPath) -> Result<Resolved> {
        logging::scoped(&self.dispatch, || {
            if let Some(handle) = self.traverse(storage_id, path) {
                debug!("Resolved {} by traversal (handle {})", path, handle);
                return Ok(Resolved {
                    handle,
                    strategy: Strategy::Traversal,
                    matched_path: None,
                });
            }

            debug!("Traversal failed for {}, scanning catalog", path);
            let catalog = CatalogScanner::new(self.transport, self.dispatch.clone())
                .scan(storage_id, &self.scan_roots);

            let found = Self::match_catalog_name(&catalog, path)
                .or_else(|| Self::match_fuzzy(&catalog, path));
            match found {
                Some(resolved) => {
                    info!(
                        "Resolved {} via {:?} as {}",
                        path,
                        resolved.strategy,
                        resolved
                            .matched_path
                            .as_ref()
                            .map_or("?", LogicalPath::as_str)
                    );
                    Ok(resolved)
                }
                None => Err(Error::Path(PathError::NotFound {
                    path: path.to_string(),
                })),
            }
        })
    }

    /// Resolve a folder path by traversal only.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when a component is missing and `NotAFolder` when
    /// it names a file.
    pub fn find_folder(&self, storage_id: u32, folder_path: &str) -> Result<u32> {
        FolderNavigator::new(self.transport, self.dispatch.clone())
            .with_listing_policy(self.listing)
            .find_path(storage_id, folder_path)
    }

    /// Layer 1: try each spelling of the path until one traverses fully.
    fn traverse(&self, storage_id: u32, path: &LogicalPath) -> Option<u32> {
        let mut tried: HashSet<Vec<String>> = HashSet::new();

        for variation in path_variations(&path.normalized()) {
            let components: Vec<String> = split_components(&variation)
                .map(str::to_uppercase)
                .collect();
            if components.is_empty() || !tried.insert(components.clone()) {
                continue;
            }
            if let Some(handle) = self.traverse_components(storage_id, &components) {
                return Some(handle);
            }
        }
        None
    }

    fn traverse_components(&self, storage_id: u32, components: &[String]) -> Option<u32> {
        let mut current = PARENT_ROOT;
        for component in components {
            let children =
                retry::children_info(self.transport, &self.listing, storage_id, current).ok()?;
            let next = children
                .iter()
                .find(|info| info.filename == *component)
                .or_else(|| {
                    children
                        .iter()
                        .find(|info| info.filename.eq_ignore_ascii_case(component))
                })?;
            current = next.handle;
        }
        Some(current)
    }

    /// Layer 2: filename match, exact then without track prefix.
    fn match_catalog_name(catalog: &Catalog, path: &LogicalPath) -> Option<Resolved> {
        let wanted = path.file_name()?;
        let wanted_stripped = strip_track_prefix(&wanted);

        let exact = catalog
            .audio()
            .iter()
            .find(|entry| entry.file_name().eq_ignore_ascii_case(&wanted));
        let entry = exact.or_else(|| {
            catalog.audio().iter().find(|entry| {
                strip_track_prefix(&entry.file_name()).eq_ignore_ascii_case(wanted_stripped)
            })
        })?;

        Some(Resolved {
            handle: entry.handle,
            strategy: Strategy::CatalogName,
            matched_path: Some(entry.logical_path.clone()),
        })
    }

    /// Layer 3: same parent folder, related base names.
    fn match_fuzzy(catalog: &Catalog, path: &LogicalPath) -> Option<Resolved> {
        let wanted_parent = path.parent_name()?;
        let wanted_base = base_name(&path.file_name()?);
        if wanted_base.is_empty() {
            return None;
        }

        let entry = catalog.audio().iter().find(|entry| {
            let Some(parent) = entry.logical_path.parent_name() else {
                return false;
            };
            if !parent.eq_ignore_ascii_case(&wanted_parent) {
                return false;
            }
            let candidate = base_name(&entry.file_name());
            !candidate.is_empty()
                && (candidate == wanted_base
                    || candidate.contains(&wanted_base)
                    || wanted_base.contains(&candidate))
        })?;

        Some(Resolved {
            handle: entry.handle,
            strategy: Strategy::Fuzzy,
            matched_path: Some(entry.logical_path.clone()),
        })
    }
}
