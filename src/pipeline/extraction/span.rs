//! Extraction phase: locate the structured span inside the model's free-text
//! response. The model may wrap its JSON in prose or markdown fencing, so
//! the scan looks for balanced top-level brace pairs rather than fence
//! markers — fenced output is just a special case of prose-wrapped output.

use super::ExtractionError;

/// Find the candidate structured span in `response`.
///
/// Scans for outermost balanced `{ … }` pairs, ignoring braces inside JSON
/// string literals. When several top-level spans exist the longest wins;
/// ties go to the leftmost. No balanced span at all → `MalformedResponse`.
/// An unclosed span at the end of the text (truncated response) is ignored.
pub fn find_structured_span(response: &str) -> Result<&str, ExtractionError> {
    let mut best: Option<(usize, usize)> = None;
    let mut start: Option<usize> = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in response.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            // Only track string literals inside a span; a stray quote in
            // surrounding prose must not swallow the payload.
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        let s = start.take().unwrap_or(i);
                        let end = i + c.len_utf8();
                        let longer = match best {
                            Some((bs, be)) => end - s > be - bs,
                            None => true,
                        };
                        if longer {
                            best = Some((s, end));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    match best {
        Some((s, e)) => Ok(&response[s..e]),
        None => Err(ExtractionError::MalformedResponse(
            "no balanced structured span in response".into(),
        )),
    }
}
