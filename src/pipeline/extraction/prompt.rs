use super::ExtractionError;

/// Ceiling on rendered prompt size, in characters. Keeps the request under
/// the model's input window with room left for the completion.
pub const MAX_PROMPT_CHARS: usize = 60_000;

/// Substitution slot in the template text.
const CONTENT_SLOT: &str = "{content}";

/// Instructional template wrapped around the fetched page. Static text,
/// versioned with the crate, one slot. The embedded JSON example — trailing
/// commas included — shows the model the expected shape.
const SHAREHOLDER_TEMPLATE: &str = r#"Between >>> and <<< is the raw HTML returned by a listed company's
quarterly shareholder disclosure page.

The page holds one or more shareholder tables, each under a reporting
cut-off date. Extract every shareholder name and holding percentage.
Use each cut-off date as a key of the returned JSON data, so when the
page carries several cut-off dates the output must include all of them
as keys.

>>> {content} <<<

Return the data in the following JSON format:
{
  "date_of_quarter": [
    {
      "holder_name": "a",
      "percentage": "50"
    },
    {
      "holder_name": "b",
      "percentage": "30"
    },
  ]
}

For example, with a cut-off date of 2023-03-31 the JSON data should
look like:
{
  "2023-03-31": [
    {
      "holder_name": "a",
      "percentage": "50"
    },
    {
      "holder_name": "b",
      "percentage": "30"
    },
  ]
}
Extracted:"#;

/// Prompt template with exactly one `{content}` slot.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            text: SHAREHOLDER_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Custom template text. Must contain the `{content}` slot exactly once.
    pub fn new(text: &str) -> Result<Self, ExtractionError> {
        if text.matches(CONTENT_SLOT).count() != 1 {
            return Err(ExtractionError::Config(format!(
                "template must contain the {CONTENT_SLOT} slot exactly once"
            )));
        }
        Ok(Self {
            text: text.to_string(),
        })
    }

    /// Substitute the fetched page into the slot.
    ///
    /// Exact string replacement, no escaping — the surrounding instructional
    /// text and the embedded JSON-shape example are literal boilerplate.
    /// Pure: all model-facing intelligence lives in the invocation, not here.
    pub fn render(&self, raw_document: &str) -> Result<String, ExtractionError> {
        if raw_document.trim().is_empty() {
            return Err(ExtractionError::EmptyInput);
        }
        let prompt = self.text.replacen(CONTENT_SLOT, raw_document, 1);
        let len = prompt.chars().count();
        if len > MAX_PROMPT_CHARS {
            return Err(ExtractionError::InputTooLarge(len));
        }
        Ok(prompt)
    }
}
