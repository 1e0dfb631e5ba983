use crate::extract::SENTINEL;
use crate::generation::styles::WritingStyle;
use crate::model::Item;
use anyhow::{Context, Result};
use serde::Serialize;

/// Record shape every summary must follow.
pub const SHAPE: &str = r#"{
  "title": "Exact episode title",
  "podcaster": "Host or show name",
  "guest": "Guest name, if any",
  "summary": {
    "essence": "One punchy opening sentence, then one or two more on the core message.",
    "top_takeaways": ["4-5 self-contained insights; last one an exact quote: -- Quote -- Speaker"],
    "game_changing_ideas": ["4-5 ideas that challenge conventional wisdom; last one an exact quote"],
    "things_you_can_do": ["4-5 concrete, accessible actions"],
    "why_this_matters": "One short paragraph on the broader significance."
  }
}"#;

#[derive(Serialize)]
struct PromptItem<'a> {
    index: usize,
    podcaster: &'a str,
    title: &'a str,
    transcript: &'a str,
}

/// Prompt asking for one record per item, each followed by the sentinel.
pub fn batch_prompt(items: &[Item], style: &WritingStyle) -> Result<String> {
    let batch: Vec<PromptItem<'_>> = items
        .iter()
        .enumerate()
        .map(|(i, item)| PromptItem {
            index: i + 1,
            podcaster: &item.channel,
            title: &item.title,
            transcript: item.transcript.as_deref().unwrap_or(""),
        })
        .collect();
    let transcripts = serde_json::to_string_pretty(&batch).context("failed to encode batch")?;

    Ok(format!(
        "You are an expert podcast summarizer writing for a general audience.\n\n\
         I'm sending you {count} transcripts. Summarize each one, in the order given.\n\n\
         WRITING STYLE: {name} ({description}).\nExample of the tone to emulate:\n---\n{example}\n---\n\n\
         For EACH transcript produce exactly this JSON structure:\n\n{shape}\n\n\
         Guidelines:\n\
         1. Hook the reader with the first sentence of the essence.\n\
         2. Plain, conversational language; short sentences.\n\
         3. Quotes must be exact excerpts from the transcript.\n\
         4. Between 400 and 600 words per summary across all sections.\n\
         5. Return ONLY valid JSON. No markdown, no commentary.\n\n\
         AFTER EACH JSON OBJECT put this delimiter on its own line:\n{sentinel}\n\n\
         Transcripts:\n{transcripts}\n",
        count = items.len(),
        name = style.name,
        description = style.description,
        example = style.example,
        shape = SHAPE,
        sentinel = SENTINEL,
        transcripts = transcripts,
    ))
}

/// Prompt asking the generator to turn `raw` into `expected` strictly valid
/// records of the required shape.
pub fn corrective_prompt(raw: &str, expected: usize) -> String {
    let count = if expected == 1 {
        "one JSON object".to_string()
    } else {
        format!("{} JSON objects, each followed by the line {}", expected, SENTINEL)
    };
    format!(
        "You are a JSON repair assistant. The text below should contain {count} \
         but is malformed or inconsistently formatted. Return {count} in exactly this \
         structure, filling any missing field with a sensible value taken from the text. \
         Return only the JSON. No explanation, no markdown.\n\n{shape}\n\nText to repair:\n{raw}\n",
        count = count,
        shape = SHAPE,
        raw = raw,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::styles::resolve;

    #[test]
    fn batch_prompt_lists_items_in_order() {
        let items = vec![
            Item::new("a", "First", "Show A").with_transcript("hello"),
            Item::new("b", "Second", "Show B"),
        ];
        let prompt = batch_prompt(&items, resolve(Some("minimalist"))).unwrap();
        assert!(prompt.contains("2 transcripts"));
        assert!(prompt.contains(SENTINEL));
        assert!(prompt.contains("minimalist"));
        let first = prompt.find("\"First\"").unwrap();
        let second = prompt.find("\"Second\"").unwrap();
        assert!(first < second);
        assert!(prompt.contains("\"transcript\": \"hello\""));
    }

    #[test]
    fn corrective_prompt_carries_raw_text() {
        let p = corrective_prompt("{broken", 1);
        assert!(p.contains("{broken"));
        assert!(p.contains("one JSON object"));
        assert!(corrective_prompt("x", 3).contains("3 JSON objects"));
    }
}
