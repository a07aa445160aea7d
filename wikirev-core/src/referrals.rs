//! Site-health queries over the referral index

use std::collections::HashSet;

use crate::config::WikiConfig;
use crate::model::{page_key, PageName, Referral, RevisionRow};

/// Current pages nothing links to.
///
/// Sub-pages and the configured core pages are never orphans. `current` must
/// hold one current revision per page.
pub fn orphans<'a>(
    current: &[&'a RevisionRow],
    referrals: &[Referral],
    config: &WikiConfig,
) -> Vec<&'a RevisionRow> {
    let referenced: HashSet<String> = referrals.iter().map(|r| page_key(&r.referral)).collect();
    current
        .iter()
        .copied()
        .filter(|row| !PageName::new(&row.page_name).is_sub_page())
        .filter(|row| !config.is_orphan_exempt(&row.page_name))
        .filter(|row| !referenced.contains(&row.page_key()))
        .collect()
}

/// Referrals whose target page does not currently exist.
///
/// Rows from the sandbox page and rows pointing at reserved synthetic
/// prefixes are skipped. `existing` holds the keys of current pages.
pub fn broken_links(
    referrals: &[Referral],
    existing: &HashSet<String>,
    config: &WikiConfig,
) -> Vec<Referral> {
    referrals
        .iter()
        .filter(|r| !config.is_sandbox(&r.referrer))
        .filter(|r| !config.is_reserved_link(&r.referral))
        .filter(|r| !existing.contains(&page_key(&r.referral)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(page: &str) -> RevisionRow {
        RevisionRow {
            id: 1,
            page_name: page.to_string(),
            revision_number: 1,
            markup: String::new(),
            author_id: 1,
            author_name: None,
            create_timestamp: Utc::now(),
            is_deleted: false,
            next_id: None,
            minor_edit: false,
            revision_message: None,
            version: 0,
        }
    }

    fn referral(from: &str, to: &str) -> Referral {
        Referral {
            referrer: from.to_string(),
            referral: to.to_string(),
            excerpt: format!("[{}]", to),
        }
    }

    #[test]
    fn test_orphans_skip_sub_pages_and_core_pages() {
        let rows = [row("Parent"), row("Parent/Child"), row("FrontPage"), row("Linked")];
        let current: Vec<&RevisionRow> = rows.iter().collect();
        let refs = vec![referral("FrontPage", "linked")];
        let names: Vec<&str> = orphans(&current, &refs, &WikiConfig::default())
            .into_iter()
            .map(|r| r.page_name.as_str())
            .collect();
        assert_eq!(names, vec!["Parent"]);
    }

    #[test]
    fn test_broken_links_filters() {
        let existing: HashSet<String> = ["y".to_string()].into_iter().collect();
        let refs = vec![
            referral("X", "Y"),
            referral("X", "Z"),
            referral("SandBox", "Nowhere"),
            referral("X", "Subs-Nes"),
            referral("X", "Movies-Snes"),
        ];
        let broken = broken_links(&refs, &existing, &WikiConfig::default());
        assert_eq!(broken, vec![referral("X", "Z")]);
    }
}
