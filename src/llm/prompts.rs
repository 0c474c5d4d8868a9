//! Deterministic prompt templates and response cleaning for the vision LLM.
//!
//! Output language is Italian. Every prompt carries the rule against
//! invented species names; category and location hints are advisory lines
//! added only when available.

use crate::record::dedup_tags;

/// The three generation modes issued per image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmMode {
    Title,
    Description,
    Tags,
}

impl LlmMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmMode::Title => "title",
            LlmMode::Description => "description",
            LlmMode::Tags => "tags",
        }
    }
}

/// Advisory context lines derived from taxonomy and geo enrichment.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    /// Italian noun for the taxonomic class, e.g. "uccello".
    pub category_hint: Option<String>,
    /// "city, region, country" from the geo enricher.
    pub location_hint: Option<String>,
}

/// Length caps applied per mode.
#[derive(Debug, Clone, Copy)]
pub struct LengthCaps {
    pub max_words: usize,
    pub max_tags: usize,
    pub max_title_words: usize,
}

/// Token budget per mode.
pub fn num_predict(mode: LlmMode, caps: LengthCaps) -> u32 {
    match mode {
        LlmMode::Description => ((caps.max_words as f64 * 1.5).ceil() as u32) + 20,
        LlmMode::Tags => (caps.max_tags as u32) * 3 + 10,
        LlmMode::Title => (caps.max_title_words as u32) * 2 + 10,
    }
}

/// Build the full prompt for a mode.
pub fn build_prompt(mode: LlmMode, context: &PromptContext, caps: LengthCaps) -> String {
    let mut prompt = String::new();

    prompt.push_str("Rispondi esclusivamente in italiano.\n");
    prompt.push_str(
        "Non inventare mai nomi di specie: se non sei sicuro della specie esatta, \
         usa un termine generico (ad esempio \"uccello\" invece di un nome scientifico).\n",
    );

    if let Some(category) = &context.category_hint {
        prompt.push_str(&format!("Suggerimento: il soggetto principale e' un {category}.\n"));
    }
    if let Some(location) = &context.location_hint {
        prompt.push_str(&format!("La foto e' stata scattata vicino a: {location}.\n"));
    }

    prompt.push('\n');
    match mode {
        LlmMode::Title => {
            prompt.push_str(&format!(
                "Scrivi un titolo breve ed evocativo per questa fotografia, \
                 al massimo {} parole. Rispondi solo con il titolo, senza virgolette.",
                caps.max_title_words
            ));
        }
        LlmMode::Description => {
            prompt.push_str(&format!(
                "Descrivi questa fotografia in modo naturale e informativo: \
                 soggetto principale, ambientazione, luce e atmosfera. \
                 Al massimo {} parole. Rispondi solo con la descrizione.",
                caps.max_words
            ));
        }
        LlmMode::Tags => {
            prompt.push_str(&format!(
                "Elenca al massimo {} parole chiave per catalogare questa fotografia, \
                 separate da virgole, in minuscolo. Rispondi solo con l'elenco.",
                caps.max_tags
            ));
        }
    }

    prompt
}

/// Italian category nouns keyed by taxonomic class. Out-of-table classes get
/// no hint.
const CATEGORY_HINTS: &[(&str, &str)] = &[
    ("Actinopterygii", "pesce"),
    ("Agaricomycetes", "fungo"),
    ("Amphibia", "anfibio"),
    ("Anthozoa", "corallo"),
    ("Arachnida", "ragno"),
    ("Asteroidea", "stella marina"),
    ("Aves", "uccello"),
    ("Bivalvia", "mollusco"),
    ("Bryopsida", "muschio"),
    ("Cephalopoda", "mollusco"),
    ("Chilopoda", "centopiedi"),
    ("Chondrichthyes", "squalo o razza"),
    ("Clitellata", "verme"),
    ("Collembola", "insetto"),
    ("Diplopoda", "millepiedi"),
    ("Echinoidea", "riccio di mare"),
    ("Entognatha", "insetto"),
    ("Gastropoda", "mollusco"),
    ("Holothuroidea", "cetriolo di mare"),
    ("Hydrozoa", "medusa"),
    ("Insecta", "insetto"),
    ("Lecanoromycetes", "lichene"),
    ("Liliopsida", "pianta"),
    ("Magnoliopsida", "pianta"),
    ("Malacostraca", "crostaceo"),
    ("Mammalia", "mammifero"),
    ("Pinopsida", "conifera"),
    ("Polypodiopsida", "felce"),
    ("Reptilia", "rettile"),
    ("Scyphozoa", "medusa"),
];

/// Map a taxonomic class to its Italian category noun.
pub fn category_hint_for_class(class: &str) -> Option<&'static str> {
    let trimmed = class.trim();
    if trimmed.is_empty() {
        return None;
    }
    CATEGORY_HINTS
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(trimmed))
        .map(|(_, hint)| *hint)
}

/// Remove `<think>...</think>` reasoning blocks. An unclosed block drops
/// everything from its opening tag.
pub fn strip_think_blocks(text: &str) -> String {
    let mut out = String::new();
    let mut rest = text;

    loop {
        match rest.find("<think>") {
            Some(start) => {
                out.push_str(&rest[..start]);
                match rest[start..].find("</think>") {
                    Some(end_rel) => {
                        rest = &rest[start + end_rel + "</think>".len()..];
                    }
                    None => break, // unclosed: drop the remainder
                }
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }

    out.trim().to_string()
}

/// Trim surrounding quotes and stray punctuation from a generated title.
pub fn clean_title(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '\u{201c}' || c == '\u{201d}')
        .trim_end_matches(|c: char| c == '.' || c == ',' || c == ';' || c == ':')
        .trim()
        .to_string()
}

/// Split a tag response on commas/semicolons, validate, dedupe and cap.
pub fn parse_tags(text: &str, max_tags: usize) -> Vec<String> {
    let raw: Vec<String> = text
        .split(|c| c == ',' || c == ';' || c == '\n')
        .map(|t| t.trim().trim_matches('"').trim_matches('.').trim().to_string())
        .filter(|t| is_valid_tag(t))
        .collect();

    let mut tags = dedup_tags(raw);
    tags.truncate(max_tags);
    tags
}

fn is_valid_tag(tag: &str) -> bool {
    let len = tag.chars().count();
    if len <= 2 || len >= 50 {
        return false;
    }
    let lower = tag.to_lowercase();
    !(lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> LengthCaps {
        LengthCaps {
            max_words: 60,
            max_tags: 10,
            max_title_words: 8,
        }
    }

    #[test]
    fn test_num_predict_budgets() {
        assert_eq!(num_predict(LlmMode::Description, caps()), 110); // ceil(60*1.5)+20
        assert_eq!(num_predict(LlmMode::Tags, caps()), 40); // 10*3+10
        assert_eq!(num_predict(LlmMode::Title, caps()), 26); // 8*2+10
    }

    #[test]
    fn test_prompt_always_has_language_and_species_rule() {
        for mode in [LlmMode::Title, LlmMode::Description, LlmMode::Tags] {
            let prompt = build_prompt(mode, &PromptContext::default(), caps());
            assert!(prompt.contains("italiano"));
            assert!(prompt.contains("Non inventare mai nomi di specie"));
            assert!(!prompt.contains("Suggerimento"));
        }
    }

    #[test]
    fn test_prompt_with_hints() {
        let context = PromptContext {
            category_hint: Some("uccello".to_string()),
            location_hint: Some("Firenze, Toscana, Italy".to_string()),
        };
        let prompt = build_prompt(LlmMode::Description, &context, caps());
        assert!(prompt.contains("un uccello"));
        assert!(prompt.contains("Firenze, Toscana, Italy"));
    }

    #[test]
    fn test_category_hint_table() {
        assert_eq!(category_hint_for_class("Aves"), Some("uccello"));
        assert_eq!(category_hint_for_class("Mammalia"), Some("mammifero"));
        assert_eq!(category_hint_for_class("Magnoliopsida"), Some("pianta"));
        assert_eq!(category_hint_for_class("Trilobita"), None);
        assert_eq!(category_hint_for_class(""), None);
    }

    #[test]
    fn test_strip_think_closed() {
        let text = "<think>ragionamento interno</think>Un passero sul ramo";
        assert_eq!(strip_think_blocks(text), "Un passero sul ramo");
    }

    #[test]
    fn test_strip_think_unclosed_drops_rest() {
        let text = "Inizio <think>mai chiuso e tutto il resto";
        assert_eq!(strip_think_blocks(text), "Inizio");

        let all = "<think>solo ragionamento";
        assert_eq!(strip_think_blocks(all), "");
    }

    #[test]
    fn test_strip_think_multiple_blocks() {
        let text = "<think>a</think>uno <think>b</think>due";
        assert_eq!(strip_think_blocks(text), "uno due");
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("\"Tramonto sul lago\""), "Tramonto sul lago");
        assert_eq!(clean_title("  Tramonto sul lago.  "), "Tramonto sul lago");
    }

    #[test]
    fn test_parse_tags_filters_and_caps() {
        let text = "natura, tramonto; NATURA, ab, https://spam.example, \
                    montagna, lago, cielo, nuvole, alberi, acqua, riflesso, extra";
        let tags = parse_tags(text, 8);
        assert_eq!(tags.len(), 8);
        assert_eq!(tags[0], "natura");
        assert!(!tags.iter().any(|t| t.starts_with("http")));
        assert!(!tags.iter().any(|t| t == "ab")); // too short
        // Case-insensitive dedup kept the first spelling only.
        assert_eq!(tags.iter().filter(|t| t.eq_ignore_ascii_case("natura")).count(), 1);
    }

    #[test]
    fn test_tag_length_bounds() {
        assert!(!is_valid_tag("ab"));
        assert!(is_valid_tag("abc"));
        let long = "a".repeat(50);
        assert!(!is_valid_tag(&long));
        assert!(is_valid_tag(&"a".repeat(49)));
    }
}
