//! Image discovery for ranking.
//!
//! Lists the raster image files in a directory. Every directory entry is
//! considered: hidden files are included and ignore files are not honored.

/// File extensions treated as images, compared case-insensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif"];

/// Whether `path` has one of the [`IMAGE_EXTENSIONS`].
#[must_use]
pub fn is_image_path(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Find image files in `dir`.
///
/// Only direct children are returned unless `recursive` is set. Paths are
/// joined onto `dir` and sorted, so the order (and with it tie-breaking in
/// the ranking) is the same across runs.
///
/// Entries the walk cannot read (dangling symlinks, symlink loops,
/// unreadable subdirectories) are logged and skipped. Only a missing or
/// non-directory `dir` is an error.
pub fn find_images(
    dir: &std::path::Path,
    recursive: bool,
) -> eyre::Result<Vec<std::path::PathBuf>> {
    if !dir.is_dir() {
        eyre::bail!("{} is not a directory", dir.display());
    }

    let mut builder = ignore::WalkBuilder::new(dir);
    builder.standard_filters(false).follow_links(true);
    if !recursive {
        builder.max_depth(Some(1));
    }

    let mut images = Vec::new();

    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(%e, "skipping unreadable directory entry");
                continue;
            }
        };
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        if !is_image_path(path) {
            tracing::debug!(?path, "skipping non-image file");
            continue;
        }

        images.push(path.to_path_buf());
    }

    images.sort();
    tracing::debug!(count = images.len(), dir = %dir.display(), "found images");

    Ok(images)
}
