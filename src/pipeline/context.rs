//! Context propagation: taxonomy and geo results become advisory hints for
//! the LLM prompts and prepend rules for its outputs. Pure functions, no
//! I/O.

use crate::llm::{LlmOutcome, PromptContext};
use crate::models::bioclip::TaxonomyPrediction;
use crate::llm::prompts::category_hint_for_class;
use crate::record::ImageRecord;

/// Minimum confidence for the taxonomy to steer titles, descriptions and
/// tags. Below this the prediction is still stored, but never prepended.
pub const BIOCLIP_CONTEXT_FLOOR: f32 = 0.15;

/// Taxonomy-derived context for prompt building and output prepending.
#[derive(Debug, Clone)]
pub struct BioclipContext {
    pub latin_name: String,
    pub common_name: Option<String>,
    pub confidence: f32,
}

/// Build the prepend context from a stored prediction. None below the
/// confidence floor or when no latin name can be formed.
pub fn derive_bioclip_context(prediction: &TaxonomyPrediction) -> Option<BioclipContext> {
    if prediction.best.confidence < BIOCLIP_CONTEXT_FLOOR {
        return None;
    }

    let latin_name = prediction.best.entry.latin_name()?;
    let common_name = {
        let name = prediction.best.entry.common_name.trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    };

    Some(BioclipContext {
        latin_name,
        common_name,
        confidence: prediction.best.confidence,
    })
}

/// Italian category noun for the predicted class, for any stored prediction.
pub fn derive_category_hint(prediction: &TaxonomyPrediction) -> Option<String> {
    category_hint_for_class(prediction.best.entry.class_level()).map(|s| s.to_string())
}

/// Assemble the prompt context from the optional hint sources.
pub fn build_prompt_context(
    category_hint: Option<String>,
    location_hint: Option<String>,
) -> PromptContext {
    PromptContext {
        category_hint,
        location_hint,
    }
}

/// Apply the prepend rules to freshly generated fields:
/// description `"<latin>: <text>"`, title `"<latin> - <text>"`, and the
/// latin name as first tag.
pub fn apply_prepend_rules(outcome: &mut LlmOutcome, context: &BioclipContext) {
    if let Some(description) = outcome.description.take() {
        outcome.description = Some(format!("{}: {}", context.latin_name, description));
    }
    if let Some(title) = outcome.title.take() {
        outcome.title = Some(format!("{} - {}", context.latin_name, title));
    }
    if let Some(tags) = outcome.tags.take() {
        let mut merged = vec![context.latin_name.clone()];
        merged.extend(
            tags.into_iter()
                .filter(|t| !t.eq_ignore_ascii_case(&context.latin_name)),
        );
        outcome.tags = Some(merged);
    }
}

/// Append the geographic leaf (city) to the tag list when absent.
pub fn append_geo_leaf(record: &mut ImageRecord, leaf: &str) {
    if !leaf.is_empty() {
        record.add_tag(leaf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bioclip::{parse_taxonomy, SpeciesEntry, SpeciesScore};

    fn prediction(confidence: f32, common_name: &str) -> TaxonomyPrediction {
        let entry = SpeciesEntry {
            levels: parse_taxonomy("Animalia;Chordata;Aves;Passeriformes;Passeridae;Passer;domesticus"),
            common_name: common_name.to_string(),
        };
        let best = SpeciesScore { entry, confidence };
        TaxonomyPrediction {
            candidates: vec![best.clone()],
            best,
        }
    }

    #[test]
    fn test_context_above_floor() {
        let context = derive_bioclip_context(&prediction(0.42, "House Sparrow")).unwrap();
        assert_eq!(context.latin_name, "Passer domesticus");
        assert_eq!(context.common_name.as_deref(), Some("House Sparrow"));
    }

    #[test]
    fn test_context_below_floor_dropped() {
        assert!(derive_bioclip_context(&prediction(0.08, "House Sparrow")).is_none());
        assert!(derive_bioclip_context(&prediction(0.1499, "")).is_none());
    }

    #[test]
    fn test_category_hint_from_class() {
        assert_eq!(
            derive_category_hint(&prediction(0.2, "")),
            Some("uccello".to_string())
        );
    }

    #[test]
    fn test_prepend_rules() {
        let mut outcome = LlmOutcome {
            title: Some("Passero al tramonto".to_string()),
            description: Some("Un passero su un ramo.".to_string()),
            tags: Some(vec![
                "passero".to_string(),
                "Passer Domesticus".to_string(),
                "ramo".to_string(),
            ]),
        };
        let context = derive_bioclip_context(&prediction(0.42, "")).unwrap();
        apply_prepend_rules(&mut outcome, &context);

        assert_eq!(
            outcome.title.as_deref(),
            Some("Passer domesticus - Passero al tramonto")
        );
        assert_eq!(
            outcome.description.as_deref(),
            Some("Passer domesticus: Un passero su un ramo.")
        );
        let tags = outcome.tags.unwrap();
        assert_eq!(tags[0], "Passer domesticus");
        // case-insensitive duplicate was removed
        assert_eq!(tags.len(), 3);
    }

    #[test]
    fn test_append_geo_leaf_dedup() {
        let mut record = ImageRecord::new("/x.jpg");
        record.add_tag("firenze");
        append_geo_leaf(&mut record, "Firenze");
        assert_eq!(record.tags, vec!["firenze"]);

        append_geo_leaf(&mut record, "Toscana");
        assert_eq!(record.tags, vec!["firenze", "Toscana"]);
    }
}
