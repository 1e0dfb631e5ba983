//! Pure per-destination layouts for a summary.

use crate::model::Destination;
use crate::summary::StructuredSummary;
use once_cell::sync::Lazy;
use regex::Regex;

pub const TWITTER_MAX_CHARS: usize = 25_000;
pub const FACEBOOK_MAX_CHARS: usize = 63_206;
pub const TELEGRAM_MAX_CHARS: usize = 4_096;

const CTA: &str = "✨ Start your day 1% smarter. Follow for daily breakthroughs.";
const FALLBACK_LINK: &str = "https://www.youtube.com";

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").expect("valid tag regex"));

pub fn char_limit(destination: Destination) -> usize {
    match destination {
        Destination::Telegram => TELEGRAM_MAX_CHARS,
        Destination::Twitter => TWITTER_MAX_CHARS,
        Destination::Facebook => FACEBOOK_MAX_CHARS,
    }
}

/// Content for `destination`. Telegram text is split later, the others are
/// truncated to their limit here.
pub fn for_destination(destination: Destination, summary: &StructuredSummary) -> String {
    match destination {
        Destination::Telegram => telegram_html(summary),
        other => truncate_chars(&plain_text(summary), char_limit(other)),
    }
}

fn featuring(summary: &StructuredSummary) -> &str {
    match summary.guest.as_deref() {
        Some(g) if !g.trim().is_empty() && !g.eq_ignore_ascii_case("unknown") => g,
        _ => &summary.podcaster,
    }
}

fn link(summary: &StructuredSummary) -> String {
    summary.link().unwrap_or_else(|| FALLBACK_LINK.to_string())
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Telegram HTML layout.
pub fn telegram_html(summary: &StructuredSummary) -> String {
    let s = &summary.summary;
    let e = escape_html;
    let mut lines = vec![
        format!("🌀 <b>{}</b>", e(&summary.title)),
        format!("🎧 <b>{}</b>", e(&summary.podcaster)),
        format!("🧑 <b>Featuring:</b> {}", e(featuring(summary))),
        String::new(),
        format!("<i>{}</i>", e(&s.essence)),
        String::new(),
    ];
    for (heading, points) in [
        ("Top Takeaways:", &s.top_takeaways),
        ("Game-Changing Ideas:", &s.game_changing_ideas),
        ("Things You Can Do:", &s.things_you_can_do),
    ] {
        lines.push(format!("<b>{}</b>", heading));
        lines.extend(points.iter().map(|p| format!("• {}", e(p))));
        lines.push(String::new());
    }
    lines.push("<b>Why This Matters:</b>".to_string());
    lines.push(e(&s.why_this_matters));
    lines.push(String::new());
    if !summary.tags.is_empty() {
        lines.push(summary.tags.join(" "));
    }
    lines.push(format!("👉 Watch the full episode: {}", link(summary)));
    lines.push(CTA.to_string());
    lines.join("\n")
}

/// Plain-text layout shared by twitter and facebook.
pub fn plain_text(summary: &StructuredSummary) -> String {
    let s = &summary.summary;
    let mut lines = vec![
        format!("🌀 {}", summary.title),
        format!("🎧 {}", summary.podcaster),
        format!("🧑 Featuring: {}", featuring(summary)),
        String::new(),
        s.essence.clone(),
        String::new(),
    ];
    for (heading, points) in [
        ("Top Takeaways:", &s.top_takeaways),
        ("Game-Changing Ideas:", &s.game_changing_ideas),
        ("Things You Can Do:", &s.things_you_can_do),
    ] {
        lines.push(heading.to_string());
        lines.extend(points.iter().map(|p| format!("- {}", p)));
        lines.push(String::new());
    }
    lines.push("Why This Matters:".to_string());
    lines.push(s.why_this_matters.clone());
    lines.push(String::new());
    if !summary.tags.is_empty() {
        lines.push(summary.tags.join(" "));
    }
    lines.push(format!("👉 Watch the full episode: {}", link(summary)));
    lines.push(CTA.to_string());
    lines.join("\n")
}

/// Cut to `limit` characters, ending in `...` when shortened.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Drop HTML tags and undo the entity escaping of [`escape_html`].
pub fn strip_html(text: &str) -> String {
    HTML_TAG
        .replace_all(text, "")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Split into parts of at most `max` characters, preferring line breaks.
/// Multi-part messages are numbered `(i/n)`.
pub fn split_message(text: &str, max: usize) -> Vec<String> {
    if text.chars().count() <= max {
        return vec![text.to_string()];
    }
    // Room for the "(nn/nn) " prefix.
    let budget = max.saturating_sub(10).max(1);
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for line in text.split('\n') {
        let mut line: Vec<char> = line.chars().collect();
        loop {
            let sep = usize::from(current_len > 0);
            if current_len + sep + line.len() <= budget {
                if sep == 1 {
                    current.push('\n');
                }
                current.extend(line.iter());
                current_len += sep + line.len();
                break;
            }
            if current_len > 0 {
                parts.push(std::mem::take(&mut current));
                current_len = 0;
                continue;
            }
            // A single line longer than the budget: hard split.
            let rest = line.split_off(budget);
            parts.push(line.into_iter().collect());
            line = rest;
        }
    }
    if current_len > 0 || parts.is_empty() {
        parts.push(current);
    }
    let total = parts.len();
    parts
        .into_iter()
        .enumerate()
        .map(|(i, p)| format!("({}/{}) {}", i + 1, total, p))
        .collect()
}
