//! Rollback target selection

use super::image::matches_version;
use crate::error::{Error, Result};
use crate::models::{non_empty, RevisionRecord, RollbackSpec};

/// Pick the revision a rollback should restore.
///
/// Precedence: explicit revision id, then an image or version match in
/// history order, then the revision before the newest one.
pub fn resolve_revision(history: &[RevisionRecord], spec: &RollbackSpec) -> Result<RevisionRecord> {
    let target = &spec.target;

    if let Some(id) = non_empty(&spec.revision_id) {
        return history
            .iter()
            .find(|r| r.id == id || r.revision.as_deref() == Some(id))
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("revision {} not found for {}", id, target))
            });
    }

    if let Some(image) = non_empty(&spec.revision_image) {
        return find_image(history, |candidate| candidate == image).ok_or_else(|| {
            Error::NotFound(format!("no revision of {} runs image {}", target, image))
        });
    }

    if let Some(version) = non_empty(&spec.version) {
        return find_image(history, |candidate| matches_version(candidate, version))
            .ok_or_else(|| {
                Error::NotFound(format!("no revision of {} runs version {}", target, version))
            });
    }

    let mut ordered: Vec<&RevisionRecord> = history.iter().collect();
    // Newest first by number, then by creation time; unnumbered and undated records sink
    ordered.sort_by(|a, b| {
        (b.revision_number(), b.created_at).cmp(&(a.revision_number(), a.created_at))
    });
    ordered
        .get(1)
        .map(|r| (*r).clone())
        .ok_or_else(|| {
            Error::Validation(format!(
                "cannot rollback {}, insufficient history",
                target
            ))
        })
}

fn find_image(history: &[RevisionRecord], matches: impl Fn(&str) -> bool) -> Option<RevisionRecord> {
    history
        .iter()
        .find(|r| {
            r.containers
                .iter()
                .filter_map(|c| c.image.as_deref())
                .any(&matches)
        })
        .cloned()
}
