//! Regenerator: validate, and on failure regenerate exactly once
//!
//! Two states, no recursion. The first attempt uses the plain prompt; the
//! retry adds the previous SQL and an itemized list of violations.

use tenantql_model::ValidationIssue;

use crate::translator::{prompt, retry_prompt, Draft, GenerationTranslator, TranslationContext};
use crate::validator::validate;

enum Attempt {
    First,
    Retry {
        previous: Option<Draft>,
        issues: Vec<ValidationIssue>,
        failure: Option<String>,
    },
}

/// Final state of the complex path for one query
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub sql: String,
    pub confidence: f64,
    pub reasoning: String,
    pub warnings: Vec<String>,
    pub validation_errors: Vec<String>,
    /// Generation calls made
    pub attempts: u32,
}

impl Outcome {
    fn from_draft(draft: Draft, validation_errors: Vec<String>, attempts: u32) -> Self {
        Self {
            sql: draft.sql,
            confidence: draft.confidence,
            reasoning: draft.reasoning,
            warnings: draft.warnings,
            validation_errors,
            attempts,
        }
    }
}

/// Generate, validate, and regenerate once if needed. Returns the latest SQL
/// together with whatever errors remain.
pub async fn generate_validated(translator: &GenerationTranslator, ctx: &TranslationContext<'_>) -> Outcome {
    let mut state = Attempt::First;
    let mut attempts = 0;

    loop {
        let request = match &state {
            Attempt::First => prompt(ctx),
            Attempt::Retry {
                previous,
                issues,
                failure,
            } => retry_prompt(
                ctx,
                previous.as_ref().map(|d| d.sql.as_str()).unwrap_or_default(),
                issues,
                failure.as_deref(),
            ),
        };
        attempts += 1;

        match (translator.translate(&request).await, state) {
            (Ok(draft), Attempt::First) => {
                let validation = validate(&draft.sql, ctx.schema, ctx.analysis, ctx.mappings);
                if validation.valid {
                    return Outcome::from_draft(draft, Vec::new(), attempts);
                }
                tracing::warn!(
                    errors = ?validation.messages(),
                    "Generated SQL failed validation, regenerating"
                );
                state = Attempt::Retry {
                    previous: Some(draft),
                    issues: validation.errors,
                    failure: None,
                };
            }
            (Err(e), Attempt::First) => {
                tracing::warn!(error = %e, "Generation failed, regenerating");
                state = Attempt::Retry {
                    previous: None,
                    issues: Vec::new(),
                    failure: Some(format!("generation failed: {}", e)),
                };
            }
            (Ok(mut draft), Attempt::Retry { previous, .. }) => {
                let validation = validate(&draft.sql, ctx.schema, ctx.analysis, ctx.mappings);
                if !validation.valid {
                    tracing::warn!(errors = ?validation.messages(), "Regenerated SQL still invalid");
                }
                if let Some(previous) = previous {
                    let mut warnings = previous.warnings;
                    warnings.append(&mut draft.warnings);
                    draft.warnings = warnings;
                }
                return Outcome::from_draft(draft, validation.messages(), attempts);
            }
            (Err(e), Attempt::Retry { previous, issues, .. }) => {
                tracing::warn!(error = %e, "Regeneration failed");
                let message = format!("generation failed: {}", e);
                return match previous {
                    Some(draft) => {
                        let mut errors: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
                        errors.push(message);
                        Outcome::from_draft(draft, errors, attempts)
                    }
                    None => Outcome {
                        sql: String::new(),
                        confidence: 0.0,
                        reasoning: String::new(),
                        warnings: Vec::new(),
                        validation_errors: vec![message],
                        attempts,
                    },
                };
            }
        }
    }
}
