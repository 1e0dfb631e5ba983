//! Named writing styles injected into the batch prompt.
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritingStyle {
    pub name: &'static str,
    pub description: &'static str,
    pub example: &'static str,
}

pub const DEFAULT_STYLE: &str = "casual";

pub const STYLES: &[WritingStyle] = &[
    WritingStyle {
        name: "casual",
        description: "Friendly, conversational tone with simple language",
        example: "This episode is a wake-up call about sleep. Turns out the hour you \
                  skip tonight costs you way more tomorrow than you think.",
    },
    WritingStyle {
        name: "professional",
        description: "More formal tone with industry terminology",
        example: "The discussion examines the measurable effect of sleep deprivation on \
                  executive function and outlines evidence-based recovery protocols.",
    },
    WritingStyle {
        name: "enthusiastic",
        description: "High-energy, passionate tone with emphasis on excitement",
        example: "This one is HUGE! One simple change to your evening routine can \
                  completely transform how sharp you feel every single morning!",
    },
    WritingStyle {
        name: "analytical",
        description: "Data-focused, insightful analysis with careful examination",
        example: "Participants sleeping under six hours showed a 30% drop in recall. \
                  The effect compounds: three short nights roughly equal one missed night.",
    },
    WritingStyle {
        name: "minimalist",
        description: "Brief, concise summaries with only essential information",
        example: "Sleep less, think worse. Fix: fixed bedtime, no screens after nine.",
    },
];

pub fn available() -> Vec<&'static str> {
    STYLES.iter().map(|s| s.name).collect()
}

pub fn find(name: &str) -> Option<&'static WritingStyle> {
    let name = name.trim();
    STYLES.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

/// Style for `name`; unknown or absent names fall back to the default.
pub fn resolve(name: Option<&str>) -> &'static WritingStyle {
    if let Some(name) = name {
        if let Some(style) = find(name) {
            return style;
        }
        warn!(style = name, available = ?available(), "unknown writing style; using default");
    }
    find(DEFAULT_STYLE).unwrap_or(&STYLES[0])
}
