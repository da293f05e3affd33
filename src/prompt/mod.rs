//! Prompt Assembler (spec.md §4.2): builds `(system_prompt, user_prompt)`
//! pairs from a catalog of templates, substituting placeholders from the
//! item's exposed `context_keys` and inserting the voice fragment and a
//! structural-diversity directive at fixed markers.
//!
//! No instruction text lives in code — everything comes from the catalog
//! file loaded at startup. Grounded in shape on the teacher's
//! `dashflow-prompts` registry (`thiserror` error enum, catalog entries
//! keyed and versioned, metadata carried alongside template text), scaled
//! down from a full versioned A/B-testing registry to the static
//! per-(domain, component) lookup this system needs.

use std::collections::HashMap;

use rand::Rng;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::item::{ItemRecord, PropertyLeaf};
use crate::error::{Error, Result};
use crate::voice::VoiceProfile;

/// Errors specific to prompt assembly, wrapped into `crate::Error` at the
/// call boundary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PromptError {
    #[error("no catalog entry for domain '{domain}' component '{component}'")]
    NoCatalogEntry { domain: String, component: String },

    #[error("placeholder '{0}' left unresolved after assembly")]
    UnresolvedPlaceholder(String),

    #[error("structural_directives for '{0}' is empty")]
    EmptyDirectivePool(String),
}

impl From<PromptError> for Error {
    fn from(err: PromptError) -> Self {
        Error::config(err.to_string())
    }
}

const VOICE_MARKER: &str = "{voice_instruction}";
const STRUCTURAL_MARKER: &str = "{structural_pattern}";

/// One weighted entry in a component's structural-diversity directive
/// pool (spec.md §4.2).
#[derive(Debug, Clone, Deserialize)]
pub struct WeightedDirective {
    pub text: String,
    pub weight: f64,
}

/// On-disk shape of one catalog entry, keyed by `"<domain>/<component>"`
/// in the catalog file.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    /// Loaded verbatim as the system prompt; never mutated at runtime.
    pub system_prompt: String,
    /// Component template with `{field}` placeholders restricted to the
    /// domain's `context_keys`, plus the two fixed markers.
    pub user_template: String,
    pub structural_directives: Vec<WeightedDirective>,
    /// Phrases the Structural Diversity evaluator flags as forbidden for
    /// this catalog entry (spec.md's catalog contract). Absent from older
    /// catalog files, so defaults to empty rather than failing to parse.
    #[serde(default)]
    pub forbidden_phrases: Vec<String>,
}

/// Raw catalog file shape: `{domain}/{component} -> CatalogEntry`.
#[derive(Debug, Clone, Deserialize)]
struct RawCatalog {
    #[serde(flatten)]
    entries: HashMap<String, CatalogEntry>,
}

/// The full set of prompt templates, loaded once at startup.
pub struct PromptCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl PromptCatalog {
    /// Parse a catalog YAML document. Keys are `"<domain>/<component>"`.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawCatalog = serde_yml::from_str(text)?;
        for (key, entry) in &raw.entries {
            if entry.structural_directives.is_empty() {
                return Err(PromptError::EmptyDirectivePool(key.clone()).into());
            }
        }
        Ok(Self { entries: raw.entries })
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read prompt catalog {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    fn lookup(&self, domain: &str, component: &str) -> Result<&CatalogEntry> {
        let key = format!("{domain}/{component}");
        self.entries
            .get(&key)
            .ok_or_else(|| {
                PromptError::NoCatalogEntry {
                    domain: domain.to_string(),
                    component: component.to_string(),
                }
                .into()
            })
    }
}

/// Output of one `PromptAssembler::build` call: the two prompt halves plus
/// the per-template metadata the evaluators need (spec.md §6's declared
/// length directive, and the catalog entry's forbidden-phrase list).
pub struct AssembledPrompt {
    pub system_prompt: String,
    pub user_prompt: String,
    /// The template's declared length directive — literally its first
    /// non-blank line (e.g. "2-3 sentences."), read before placeholder
    /// substitution since it is fixed text, not itself a placeholder.
    pub directive_text: String,
    pub forbidden_phrases: Vec<String>,
}

/// Picks a structural-diversity directive by configured weight and
/// substitutes context fields into catalog templates.
pub struct PromptAssembler {
    catalog: PromptCatalog,
}

impl PromptAssembler {
    #[must_use]
    pub fn new(catalog: PromptCatalog) -> Self {
        Self { catalog }
    }

    /// Build the assembled prompt for one generation attempt. `context_keys`
    /// restricts which item fields may be substituted — the adapter's own
    /// context-key allowlist.
    pub fn build(
        &self,
        domain: &str,
        component: &str,
        item: &ItemRecord,
        author: &VoiceProfile,
        context_keys: &[String],
    ) -> Result<AssembledPrompt> {
        let entry = self.catalog.lookup(domain, component)?;
        let directive_text = declared_length_directive(&entry.user_template);

        let mut user_prompt = entry.user_template.clone();
        for key in context_keys {
            let placeholder = format!("{{{key}}}");
            if let Some(value) = item.get_path(key) {
                let leaf = PropertyLeaf::classify(value);
                user_prompt = user_prompt.replace(&placeholder, &leaf.as_text());
            }
        }

        user_prompt = user_prompt.replace(VOICE_MARKER, &author.core_voice_instruction);

        let directive = pick_weighted(&entry.structural_directives)?;
        user_prompt = user_prompt.replace(STRUCTURAL_MARKER, &directive.text);

        if let Some(leftover) = find_unresolved_placeholder(&user_prompt) {
            return Err(PromptError::UnresolvedPlaceholder(leftover).into());
        }

        Ok(AssembledPrompt {
            system_prompt: entry.system_prompt.clone(),
            user_prompt,
            directive_text,
            forbidden_phrases: entry.forbidden_phrases.clone(),
        })
    }
}

/// The template's first non-blank trimmed line, read from the raw
/// (pre-substitution) template text (spec.md §6).
fn declared_length_directive(template: &str) -> String {
    template
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
        .to_string()
}

fn pick_weighted(pool: &[WeightedDirective]) -> Result<&WeightedDirective> {
    let total: f64 = pool.iter().map(|d| d.weight).sum();
    if total <= 0.0 {
        return Err(Error::config("structural_directives weights sum to zero"));
    }
    let mut roll = rand::thread_rng().gen_range(0.0..total);
    for directive in pool {
        if roll < directive.weight {
            return Ok(directive);
        }
        roll -= directive.weight;
    }
    Ok(pool.last().expect("pool checked non-empty at catalog load"))
}

fn find_unresolved_placeholder(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text[start..].find('}')? + start;
    Some(text[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yml::Mapping;

    fn catalog_yaml() -> &'static str {
        r#"
materials/pageDescription:
  system_prompt: "You write factual material descriptions."
  user_template: |
    2-3 sentences.
    Write about {category}. {voice_instruction} {structural_pattern}
  structural_directives:
    - text: "Keep it to 2-3 sentences."
      weight: 1.0
    - text: "Use exactly one paragraph."
      weight: 1.0
  forbidden_phrases:
    - "in conclusion"
"#
    }

    fn item() -> ItemRecord {
        let fields: Mapping = serde_yml::from_str("category: metal\nauthor_id: 7\n").unwrap();
        ItemRecord::new("aluminum", fields)
    }

    fn author() -> VoiceProfile {
        VoiceProfile {
            author_id: 7,
            name: "Test Author".to_string(),
            nationality: "Testland".to_string(),
            core_voice_instruction: "Write plainly.".to_string(),
        }
    }

    #[test]
    fn builds_prompt_with_substitutions() {
        let catalog = PromptCatalog::parse(catalog_yaml()).unwrap();
        let assembler = PromptAssembler::new(catalog);
        let context_keys = vec!["category".to_string()];
        let assembled = assembler
            .build("materials", "pageDescription", &item(), &author(), &context_keys)
            .unwrap();
        assert_eq!(assembled.system_prompt, "You write factual material descriptions.");
        assert!(assembled.user_prompt.contains("metal"));
        assert!(assembled.user_prompt.contains("Write plainly."));
        assert!(!assembled.user_prompt.contains('{'));
        assert_eq!(assembled.directive_text, "2-3 sentences.");
        assert_eq!(assembled.forbidden_phrases, vec!["in conclusion".to_string()]);
    }

    #[test]
    fn missing_catalog_entry_is_fatal() {
        let catalog = PromptCatalog::parse(catalog_yaml()).unwrap();
        let assembler = PromptAssembler::new(catalog);
        let context_keys = vec![];
        assert!(assembler
            .build("materials", "faq", &item(), &author(), &context_keys)
            .is_err());
    }

    #[test]
    fn unresolved_placeholder_is_fatal() {
        let yaml = r#"
materials/pageDescription:
  system_prompt: "sys"
  user_template: |
    1 sentence.
    About {missing_field}. {voice_instruction} {structural_pattern}
  structural_directives:
    - text: "short"
      weight: 1.0
"#;
        let catalog = PromptCatalog::parse(yaml).unwrap();
        let assembler = PromptAssembler::new(catalog);
        let context_keys = vec!["category".to_string()];
        let err = assembler
            .build("materials", "pageDescription", &item(), &author(), &context_keys)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn empty_directive_pool_rejected_at_load() {
        let yaml = r#"
materials/pageDescription:
  system_prompt: "sys"
  user_template: "About {voice_instruction} {structural_pattern}"
  structural_directives: []
"#;
        assert!(PromptCatalog::parse(yaml).is_err());
    }
}
