//! Recover structured records from free generated text.
//!
//! Local strategies run strict to permissive: sentinel split, string-aware
//! brace scan, then the brace scan again with mechanical repairs applied to
//! spans that fail to parse. Each span is parsed on its own so one broken
//! record never takes its neighbours down. When the local chain comes up short
//! the raw text goes back to the generator with a corrective prompt.

use crate::generation::prompt::corrective_prompt;
use crate::generation::Generator;
use crate::retry::RetryPolicy;
use crate::validate::is_valid;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Separator the generator is asked to place after each record.
pub const SENTINEL: &str = "--- END OF SUMMARY ---";

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[A-Za-z]*").expect("valid fence regex"));
static TRAILING_BRACKET: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*\]").expect("valid regex"));
static TRAILING_BRACE: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*\}").expect("valid regex"));
static BARE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Delimiter,
    BraceScan,
    Aggressive,
    Corrective,
}

const LOCAL_CHAIN: [Strategy; 3] = [Strategy::Delimiter, Strategy::BraceScan, Strategy::Aggressive];
const STRICT_CHAIN: [Strategy; 2] = [Strategy::Delimiter, Strategy::BraceScan];

/// Result of running a chain of strategies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub candidates: Vec<Value>,
    /// Step whose output was kept; `None` when nothing was found.
    pub strategy: Option<Strategy>,
    /// Every step that ran, in order.
    pub tried: Vec<Strategy>,
}

impl Extraction {
    pub fn is_complete(&self, expected: usize) -> bool {
        self.candidates.len() == expected
    }
}

/// Counters for corrective generation calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairStats {
    pub attempts: u32,
    pub successes: u32,
}

impl RepairStats {
    pub fn add(&mut self, other: RepairStats) {
        self.attempts += other.attempts;
        self.successes += other.successes;
    }
}

/// Remove markdown code fences, keeping their contents.
pub fn strip_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").into_owned()
}

/// Top-level balanced `{...}` spans. Braces inside JSON strings are ignored.
pub fn balanced_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
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
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    spans
}

/// Mechanical fixes: trailing separators and unquoted keys. String literals
/// are copied through untouched.
pub fn repair_text(span: &str) -> String {
    let mut out = String::with_capacity(span.len() + 16);
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in span.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                out.push_str(&span[start..=i]);
                start = i + 1;
            }
        } else if c == '"' {
            out.push_str(&repair_structure(&span[start..i]));
            in_string = true;
            start = i;
        }
    }
    let rest = &span[start..];
    if in_string {
        out.push_str(rest);
    } else {
        out.push_str(&repair_structure(rest));
    }
    out
}

fn repair_structure(text: &str) -> String {
    let fixed = TRAILING_BRACKET.replace_all(text, "]");
    let fixed = TRAILING_BRACE.replace_all(&fixed, "}");
    BARE_KEY.replace_all(&fixed, "$1\"$2\":").into_owned()
}

fn objects(value: Value) -> Vec<Value> {
    match value {
        Value::Object(_) => vec![value],
        Value::Array(items) => items.into_iter().filter(Value::is_object).collect(),
        _ => Vec::new(),
    }
}

fn parse_span(span: &str, repair: bool) -> Option<Value> {
    match serde_json::from_str::<Value>(span) {
        Ok(v) if v.is_object() => Some(v),
        Ok(_) => None,
        Err(err) if repair => {
            let fixed = repair_text(span);
            match serde_json::from_str::<Value>(&fixed) {
                Ok(v) if v.is_object() => {
                    debug!("span parsed after mechanical repair");
                    Some(v)
                }
                _ => {
                    debug!(?err, "span unrecoverable");
                    None
                }
            }
        }
        Err(_) => None,
    }
}

/// One record per sentinel-separated segment.
pub fn split_on_sentinel(text: &str) -> Vec<Value> {
    let mut out = Vec::new();
    for segment in text.split(SENTINEL) {
        let segment = strip_fences(segment);
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(segment) {
            Ok(v) => out.extend(objects(v)),
            // Prose around the record: take the first balanced object.
            Err(_) => {
                if let Some(v) = balanced_spans(segment).into_iter().find_map(|s| parse_span(s, false)) {
                    out.push(v);
                }
            }
        }
    }
    out
}

pub fn brace_scan(text: &str) -> Vec<Value> {
    scan(text, false)
}

pub fn aggressive_scan(text: &str) -> Vec<Value> {
    scan(text, true)
}

fn scan(text: &str, repair: bool) -> Vec<Value> {
    let text = strip_fences(text);
    balanced_spans(&text)
        .into_iter()
        .filter_map(|s| parse_span(s, repair))
        .collect()
}

fn run_step(step: Strategy, text: &str) -> Vec<Value> {
    match step {
        Strategy::Delimiter if text.contains(SENTINEL) => split_on_sentinel(text),
        Strategy::Delimiter => Vec::new(),
        Strategy::BraceScan => brace_scan(text),
        Strategy::Aggressive => aggressive_scan(text),
        Strategy::Corrective => Vec::new(),
    }
}

/// Run `steps` in order, stopping at the first that yields exactly
/// `expected` candidates. Otherwise keep the largest result, truncated.
pub fn run_chain(text: &str, expected: usize, steps: &[Strategy]) -> Extraction {
    let mut best = Extraction::default();
    for &step in steps {
        best.tried.push(step);
        let found = run_step(step, text);
        debug!(?step, found = found.len(), expected, "extraction step");
        if found.len() == expected {
            best.candidates = found;
            best.strategy = Some(step);
            return best;
        }
        if found.len() > best.candidates.len() {
            best.candidates = found;
            best.strategy = Some(step);
        }
    }
    best.candidates.truncate(expected);
    best
}

/// Local chain only; never calls the generator.
pub fn extract_local(text: &str, expected: usize) -> Extraction {
    run_chain(text, expected, &LOCAL_CHAIN)
}

/// Extraction pipeline with corrective re-generation as the last resort.
pub struct Extractor<'a> {
    generator: &'a dyn Generator,
    retry: RetryPolicy,
    stats: Mutex<RepairStats>,
}

impl<'a> Extractor<'a> {
    pub fn new(generator: &'a dyn Generator, retry: RetryPolicy) -> Self {
        Self {
            generator,
            retry,
            stats: Mutex::new(RepairStats::default()),
        }
    }

    pub fn stats(&self) -> RepairStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn count(&self, success: bool) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.attempts += 1;
        if success {
            stats.successes += 1;
        }
    }

    /// Recover up to `expected` candidates from `raw`. A short result is
    /// returned as-is; callers decide what to do with the missing records.
    #[instrument(skip(self, raw))]
    pub async fn extract(&self, raw: &str, expected: usize) -> Extraction {
        let mut local = extract_local(raw, expected);
        if local.candidates.len() >= expected {
            return local;
        }
        warn!(
            found = local.candidates.len(),
            expected, "local extraction came up short; asking for a corrected response"
        );
        local.tried.push(Strategy::Corrective);
        let corrected = self.corrective(raw, expected).await;
        if corrected.len() > local.candidates.len() {
            local.candidates = corrected;
            local.strategy = Some(Strategy::Corrective);
        }
        local
    }

    /// Send `raw` back with the corrective prompt until the response yields
    /// `expected` candidates or the attempts run out. Returns the best result.
    pub async fn corrective(&self, raw: &str, expected: usize) -> Vec<Value> {
        let prompt = corrective_prompt(raw, expected);
        let mut best: Vec<Value> = Vec::new();
        for attempt in 1..=self.retry.attempts {
            info!(attempt, max = self.retry.attempts, "corrective generation");
            match self.generator.generate(&prompt).await {
                Ok(text) => {
                    let found = run_chain(&text, expected, &STRICT_CHAIN).candidates;
                    self.count(!found.is_empty());
                    if found.len() > best.len() {
                        best = found;
                    }
                    if best.len() >= expected {
                        break;
                    }
                }
                Err(err) => {
                    self.count(false);
                    warn!(?err, attempt, "corrective generation failed");
                }
            }
            if attempt < self.retry.attempts && !self.retry.delay.is_zero() {
                tokio::time::sleep(self.retry.delay).await;
            }
        }
        best.truncate(expected);
        best
    }

    /// Ask for a corrected version of one record that failed validation.
    /// Returns the first corrected candidate that validates.
    pub async fn repair_record(&self, record: &Value) -> Option<Value> {
        let raw = serde_json::to_string_pretty(record).unwrap_or_else(|_| record.to_string());
        let prompt = corrective_prompt(&raw, 1);
        for attempt in 1..=self.retry.attempts {
            match self.generator.generate(&prompt).await {
                Ok(text) => {
                    let fixed = run_chain(&text, 1, &STRICT_CHAIN)
                        .candidates
                        .into_iter()
                        .find(is_valid);
                    self.count(fixed.is_some());
                    if fixed.is_some() {
                        info!(attempt, "record repaired");
                        return fixed;
                    }
                    warn!(attempt, "corrected record still invalid");
                }
                Err(err) => {
                    self.count(false);
                    warn!(?err, attempt, "record repair call failed");
                }
            }
            if attempt < self.retry.attempts && !self.retry.delay.is_zero() {
                tokio::time::sleep(self.retry.delay).await;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct Scripted {
        replies: Mutex<VecDeque<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Generator for Scripted {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("no scripted reply")))
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    fn valid(title: &str) -> Value {
        json!({
            "title": title,
            "podcaster": "Show",
            "summary": {
                "essence": "e",
                "top_takeaways": ["a"],
                "game_changing_ideas": ["b"],
                "things_you_can_do": ["c"],
                "why_this_matters": "w"
            }
        })
    }

    #[test]
    fn sentinel_split_short_circuits() {
        let text = "{\"a\":1}\n--- END OF SUMMARY ---\n{\"a\":2}";
        let out = extract_local(text, 2);
        assert_eq!(out.candidates, vec![json!({"a": 1}), json!({"a": 2})]);
        assert_eq!(out.strategy, Some(Strategy::Delimiter));
        assert_eq!(out.tried, vec![Strategy::Delimiter]);
    }

    #[tokio::test]
    async fn sentinel_split_never_calls_generator() {
        let generator = Scripted::new(vec![]);
        let extractor = Extractor::new(&generator, policy());
        let out = extractor
            .extract("{\"a\":1}\n--- END OF SUMMARY ---\n{\"a\":2}", 2)
            .await;
        assert_eq!(out.candidates.len(), 2);
        assert_eq!(generator.calls(), 0);
        assert_eq!(extractor.stats(), RepairStats::default());
    }

    #[test]
    fn trailing_comma_needs_aggressive_step() {
        let text = "Here you go:\n{\"a\": 1}\nand\n{\"a\": 2, \"b\": [1, 2,],}\n";
        let out = extract_local(text, 2);
        assert_eq!(out.candidates, vec![json!({"a": 1}), json!({"a": 2, "b": [1, 2]})]);
        assert_eq!(out.strategy, Some(Strategy::Aggressive));
        assert_eq!(
            out.tried,
            vec![Strategy::Delimiter, Strategy::BraceScan, Strategy::Aggressive]
        );
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let text = r#"{"t": "a } tricky { one", "q": "say \"}\""} {"t": 2}"#;
        let spans = balanced_spans(text);
        assert_eq!(spans.len(), 2);
        assert_eq!(brace_scan(text).len(), 2);
    }

    #[test]
    fn bare_keys_are_quoted() {
        let fixed = repair_text("{title: \"x\", nested: {a_b: 1,}}");
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v, json!({"title": "x", "nested": {"a_b": 1}}));
    }

    #[test]
    fn repair_leaves_string_contents_alone() {
        let text = r#"{"a": 1} {"essence": "Two ideas, namely: focus", "x": [1,],}"#;
        let found = aggressive_scan(text);
        assert_eq!(
            found,
            vec![json!({"a": 1}), json!({"essence": "Two ideas, namely: focus", "x": [1]})]
        );

        let fixed = repair_text(r#"{"s": "a,]", "t": "b, c: \"d,}\"", u: 1,}"#);
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v, json!({"s": "a,]", "t": "b, c: \"d,}\"", "u": 1}));
    }

    #[test]
    fn fenced_segments_and_arrays() {
        let text = "```json\n[{\"a\":1},{\"a\":2}]\n```\n--- END OF SUMMARY ---\n";
        let out = extract_local(text, 2);
        assert_eq!(out.candidates.len(), 2);
        assert_eq!(out.strategy, Some(Strategy::Delimiter));
    }

    #[test]
    fn surplus_is_truncated() {
        let out = extract_local("{\"a\":1} {\"a\":2} {\"a\":3}", 2);
        assert_eq!(out.candidates.len(), 2);
        assert_eq!(out.candidates[1], json!({"a": 2}));
    }

    #[tokio::test]
    async fn corrective_fills_the_gap() {
        let fixed = format!("{}\n{}\n{}", valid("one"), SENTINEL, valid("two"));
        let generator = Scripted::new(vec![Err(anyhow!("overloaded")), Ok(fixed)]);
        let extractor = Extractor::new(&generator, policy());
        let out = extractor.extract("garbage {not json", 2).await;
        assert_eq!(out.strategy, Some(Strategy::Corrective));
        assert_eq!(out.candidates.len(), 2);
        assert_eq!(generator.calls(), 2);
        assert_eq!(extractor.stats(), RepairStats { attempts: 2, successes: 1 });
    }

    #[tokio::test]
    async fn corrective_gives_up_after_bound() {
        let generator = Scripted::new(vec![
            Ok("still nothing".into()),
            Ok("nope".into()),
            Ok("{\"a\": 1}".into()),
        ]);
        let extractor = Extractor::new(&generator, policy());
        let out = extractor.extract("no records here", 2).await;
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(generator.calls(), 3);
        assert_eq!(extractor.stats(), RepairStats { attempts: 3, successes: 1 });
    }

    #[tokio::test]
    async fn repair_record_returns_first_valid() {
        let generator = Scripted::new(vec![
            Ok("{\"title\": \"still broken\"}".into()),
            Ok(valid("fixed").to_string()),
        ]);
        let extractor = Extractor::new(&generator, policy());
        let repaired = extractor.repair_record(&json!({"title": "broken"})).await.unwrap();
        assert_eq!(repaired["title"], "fixed");
        assert_eq!(extractor.stats(), RepairStats { attempts: 2, successes: 1 });
    }
}
