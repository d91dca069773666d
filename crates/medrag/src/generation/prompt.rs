//! Prompt templates for evidence-grounded generation

use crate::context::AssembledContext;

/// Prompt builder for medical questions over an assembled context
pub struct PromptBuilder;

impl PromptBuilder {
    /// Citation marker the model is asked to emit for a passage
    pub fn marker(passage_id: &str) -> String {
        format!("[P:{}]", passage_id)
    }

    /// Render the excerpts, each headed by its citation marker
    pub fn build_context(context: &AssembledContext) -> String {
        let mut rendered = String::new();

        for excerpt in &context.excerpts {
            rendered.push_str(&format!(
                "{} {}\n\nContent:\n{}{}\n\n---\n\n",
                Self::marker(excerpt.passage_id.as_str()),
                excerpt.label,
                excerpt.text,
                if excerpt.truncated { " ..." } else { "" }
            ));
        }

        rendered
    }

    /// Build the full prompt with strict grounding rules
    pub fn build_prompt(question: &str, context: &AssembledContext) -> String {
        format!(
            r#"You are a medical evidence assistant that ONLY uses information from the provided passages.

CRITICAL GROUNDING RULES - YOU MUST FOLLOW THESE EXACTLY:
1. ONLY use information that is EXPLICITLY stated in the PASSAGES below
2. If the answer is not in the passages: respond with "This information is not available in the provided sources."
3. NEVER use external knowledge, general knowledge, or training data
4. NEVER make inferences, assumptions, or educated guesses beyond what is explicitly stated
5. Every claim MUST cite its passage using the exact marker shown before it, for example {example}
6. Only cite markers that appear in the PASSAGES section
7. Do NOT give dosing or treatment advice that the passages do not state

RESPONSE STRUCTURE:
- Provide a clear, well-organized answer using ONLY information from the passages
- Place the marker directly after each claim it supports
- If multiple passages support a point, cite all of them

PASSAGES:
{passages}
QUESTION: {question}

Provide a grounded answer using ONLY the passages above:"#,
            example = context
                .excerpts
                .first()
                .map(|e| Self::marker(e.passage_id.as_str()))
                .unwrap_or_else(|| Self::marker("id")),
            passages = Self::build_context(context),
            question = question
        )
    }
}
