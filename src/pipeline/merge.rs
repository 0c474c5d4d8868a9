//! Field-level merge policy and the hierarchical-subject namespace contract
//! consumed by the external sidecar writer.

use crate::record::dedup_tags;

/// Roots owned by this system inside `HierarchicalSubject`. Paths under
/// them are cleared and rewritten on every export; foreign paths are
/// preserved untouched.
pub const TAXONOMY_ROOT: &str = "AI|Taxonomy";
pub const GEO_ROOT: &str = "GeOFF";

/// Whether generation should run for a text field, given the per-field
/// overwrite flag and the value already present from extraction or a prior
/// record.
pub fn should_generate(enabled: bool, overwrite: bool, existing: Option<&str>) -> bool {
    if !enabled {
        return false;
    }
    overwrite || existing.map_or(true, |v| v.trim().is_empty())
}

/// Merge LLM tags into the snapshot taken before the concurrent section.
/// `overwrite` replaces the list wholesale; otherwise generated tags absent
/// from the existing list (case-insensitive) are appended.
pub fn merge_tags(existing: &[String], generated: &[String], overwrite: bool) -> Vec<String> {
    if overwrite {
        return dedup_tags(generated.to_vec());
    }

    let mut merged = dedup_tags(existing.to_vec());
    for tag in generated {
        if !merged.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            merged.push(tag.clone());
        }
    }
    merged
}

/// Rewrite the hierarchical-subject list: drop previously-written paths
/// under our roots, keep foreign paths, then append the fresh taxonomy and
/// geo paths.
pub fn merge_hierarchical_subjects(
    existing: &[String],
    taxonomy_levels: Option<&[String; 7]>,
    geo_hierarchy: Option<&str>,
) -> Vec<String> {
    let mut subjects: Vec<String> = existing
        .iter()
        .filter(|path| !is_owned_path(path))
        .cloned()
        .collect();

    if let Some(levels) = taxonomy_levels {
        let path = taxonomy_subject_path(levels);
        if !path.is_empty() {
            subjects.push(path);
        }
    }

    if let Some(hierarchy) = geo_hierarchy {
        if let Some(path) = geo_subject_path(hierarchy) {
            subjects.push(path);
        }
    }

    subjects
}

fn is_owned_path(path: &str) -> bool {
    path == TAXONOMY_ROOT
        || path.starts_with("AI|Taxonomy|")
        || path == GEO_ROOT
        || path.starts_with("GeOFF|")
}

/// `AI|Taxonomy|<kingdom>|...|<epithet>` with empty levels dropped.
pub fn taxonomy_subject_path(levels: &[String; 7]) -> String {
    let filled: Vec<&str> = levels
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    if filled.is_empty() {
        return String::new();
    }
    format!("{}|{}", TAXONOMY_ROOT, filled.join("|"))
}

/// `GeOFF|<continent>|...` from a `Geo|`-rooted hierarchy.
pub fn geo_subject_path(hierarchy: &str) -> Option<String> {
    let rest = hierarchy.strip_prefix("Geo|")?;
    if rest.is_empty() {
        return None;
    }
    Some(format!("{GEO_ROOT}|{rest}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels() -> [String; 7] {
        [
            "Animalia".into(),
            "Chordata".into(),
            "Aves".into(),
            "Passeriformes".into(),
            "Passeridae".into(),
            "Passer".into(),
            "domesticus".into(),
        ]
    }

    #[test]
    fn test_should_generate_matrix() {
        assert!(should_generate(true, true, Some("Vista del lago")));
        assert!(!should_generate(true, false, Some("Vista del lago")));
        assert!(should_generate(true, false, Some("   ")));
        assert!(should_generate(true, false, None));
        assert!(!should_generate(false, true, None));
    }

    #[test]
    fn test_merge_tags_append() {
        let existing = vec!["Firenze".to_string(), "estate".to_string()];
        let generated = vec!["FIRENZE".to_string(), "tramonto".to_string()];
        let merged = merge_tags(&existing, &generated, false);
        assert_eq!(merged, vec!["Firenze", "estate", "tramonto"]);
    }

    #[test]
    fn test_merge_tags_overwrite() {
        let existing = vec!["vecchio".to_string()];
        let generated = vec!["nuovo".to_string(), "Nuovo".to_string()];
        let merged = merge_tags(&existing, &generated, true);
        assert_eq!(merged, vec!["nuovo"]);
    }

    #[test]
    fn test_hierarchical_merge_preserves_foreign() {
        let existing = vec![
            "Viaggi|2024|Estate".to_string(),
            "AI|Taxonomy|Animalia|Chordata|Aves".to_string(),
            "GeOFF|Europe|Italy".to_string(),
            "Famiglia|Compleanni".to_string(),
        ];

        let merged = merge_hierarchical_subjects(
            &existing,
            Some(&levels()),
            Some("Geo|Europe|Italy|Toscana|Firenze"),
        );

        assert_eq!(
            merged,
            vec![
                "Viaggi|2024|Estate".to_string(),
                "Famiglia|Compleanni".to_string(),
                "AI|Taxonomy|Animalia|Chordata|Aves|Passeriformes|Passeridae|Passer|domesticus"
                    .to_string(),
                "GeOFF|Europe|Italy|Toscana|Firenze".to_string(),
            ]
        );
    }

    #[test]
    fn test_hierarchical_merge_clears_stale_owned_paths() {
        let existing = vec!["AI|Taxonomy|Plantae".to_string(), "GeOFF|Asia|Japan".to_string()];
        let merged = merge_hierarchical_subjects(&existing, None, None);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_taxonomy_path_drops_empty_levels() {
        let mut partial = levels();
        partial[6] = String::new();
        assert_eq!(
            taxonomy_subject_path(&partial),
            "AI|Taxonomy|Animalia|Chordata|Aves|Passeriformes|Passeridae|Passer"
        );

        let empty: [String; 7] = Default::default();
        assert_eq!(taxonomy_subject_path(&empty), "");
    }

    #[test]
    fn test_geo_subject_path() {
        assert_eq!(
            geo_subject_path("Geo|Europe|Italy|Toscana|Firenze").as_deref(),
            Some("GeOFF|Europe|Italy|Toscana|Firenze")
        );
        assert_eq!(geo_subject_path("Europe|Italy"), None);
        assert_eq!(geo_subject_path("Geo|"), None);
    }
}
