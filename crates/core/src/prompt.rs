use crate::models::SearchHit;

const CONTEXT_PLACEHOLDER: &str = "{context}";
const QUESTION_PLACEHOLDER: &str = "{question}";

pub const GROUNDED_ANSWER_TEMPLATE: &str = "\
You are a careful assistant answering questions about a single document.

Answer the question using ONLY the context below. Do not use outside knowledge.
If the context does not contain the answer, reply that the document does not say.
Keep the answer short and quote names, dates and numbers exactly as they appear.

Context:
{context}

Question: {question}

Answer:";

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: GROUNDED_ANSWER_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Returns `None` unless the template has both `{context}` and `{question}`.
    pub fn new(template: impl Into<String>) -> Option<Self> {
        let template = template.into();
        if template.contains(CONTEXT_PLACEHOLDER) && template.contains(QUESTION_PLACEHOLDER) {
            Some(Self { template })
        } else {
            None
        }
    }

    pub fn render(&self, question: &str, hits: &[SearchHit]) -> String {
        let context = hits
            .iter()
            .map(|hit| hit.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        self.template
            .replace(CONTEXT_PLACEHOLDER, &context)
            .replace(QUESTION_PLACEHOLDER, question.trim())
    }
}
