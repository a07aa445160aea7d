//! Current-revision resolution
//!
//! Pure functions over the revisions of one page. Visibility depends only on
//! the tombstone flag and the revision number; `next_id` describes chain
//! structure and is ignored here.

use crate::model::RevisionRow;

/// The live revision with the greatest revision number, if any
pub fn resolve<'a, I>(revisions: I) -> Option<&'a RevisionRow>
where
    I: IntoIterator<Item = &'a RevisionRow>,
{
    revisions
        .into_iter()
        .filter(|r| !r.is_deleted)
        .max_by_key(|r| r.revision_number)
}

/// A specific revision regardless of its delete state
pub fn resolve_historical<'a, I>(revisions: I, revision_number: u32) -> Option<&'a RevisionRow>
where
    I: IntoIterator<Item = &'a RevisionRow>,
{
    revisions
        .into_iter()
        .find(|r| r.revision_number == revision_number)
}

/// Highest revision number across all revisions, deleted or not
pub fn max_revision_number<'a, I>(revisions: I) -> Option<u32>
where
    I: IntoIterator<Item = &'a RevisionRow>,
{
    revisions.into_iter().map(|r| r.revision_number).max()
}

/// Resolve the current revision of every page present in `revisions`.
///
/// Rows may belong to many pages; the result holds one entry per page that
/// has at least one live revision, ordered by page key.
pub fn current_revisions(revisions: &[RevisionRow]) -> Vec<&RevisionRow> {
    let mut by_page: std::collections::BTreeMap<String, &RevisionRow> =
        std::collections::BTreeMap::new();
    for row in revisions.iter().filter(|r| !r.is_deleted) {
        by_page
            .entry(row.page_key())
            .and_modify(|best| {
                if row.revision_number > best.revision_number {
                    *best = row;
                }
            })
            .or_insert(row);
    }
    by_page.into_values().collect()
}
