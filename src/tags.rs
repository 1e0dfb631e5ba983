//! Keyword-scored hashtag selection.
use crate::model::{Item, TAG_COUNT};
use crate::summary::StructuredSummary;
use std::collections::HashMap;

/// Assigns exactly [`TAG_COUNT`] tags to a summarized item.
pub trait Tagger: Send + Sync {
    fn tags(&self, item: &Item, summary: &StructuredSummary) -> Vec<String>;
}

/// Tag library in fill order; used for ties and padding.
const LIBRARY: &[&str] = &[
    "#AI", "#Crypto", "#Web3", "#Bitcoin", "#Blockchain", "#Technology", "#Leadership",
    "#Motivation", "#Mindset", "#Success", "#Habits", "#Discipline", "#Wealth", "#Finance",
    "#Investing", "#Risk", "#Innovation", "#Startups", "#Spirituality", "#Presence", "#Healing",
    "#Awareness", "#Consciousness", "#Energy", "#Wisdom", "#Meditation", "#InnerWork", "#Love",
    "#Relationships", "#Parenting", "#Emotions", "#Resilience", "#Trauma", "#Purpose",
    "#Podcast", "#Interview", "#Shorts", "#Lecture",
];

const FORMAT_TAGS: &[&str] = &["#Podcast", "#Interview", "#Shorts", "#Lecture"];

const KEYWORDS: &[(&str, &str)] = &[
    ("ai", "#AI"),
    ("artificial intelligence", "#AI"),
    ("machine learning", "#AI"),
    ("deep learning", "#AI"),
    ("tech", "#Technology"),
    ("technology", "#Technology"),
    ("software", "#Technology"),
    ("hardware", "#Technology"),
    ("computer", "#Technology"),
    ("digital", "#Technology"),
    ("crypto", "#Crypto"),
    ("cryptocurrency", "#Crypto"),
    ("ethereum", "#Crypto"),
    ("bitcoin", "#Bitcoin"),
    ("blockchain", "#Blockchain"),
    ("web3", "#Web3"),
    ("finance", "#Finance"),
    ("financial", "#Finance"),
    ("money", "#Finance"),
    ("economy", "#Finance"),
    ("investing", "#Investing"),
    ("investment", "#Investing"),
    ("wealth", "#Wealth"),
    ("leadership", "#Leadership"),
    ("motivation", "#Motivation"),
    ("motivational", "#Motivation"),
    ("mindset", "#Mindset"),
    ("discipline", "#Discipline"),
    ("habits", "#Habits"),
    ("success", "#Success"),
    ("goals", "#Success"),
    ("achievement", "#Success"),
    ("startup", "#Startups"),
    ("startups", "#Startups"),
    ("entrepreneur", "#Startups"),
    ("entrepreneurship", "#Startups"),
    ("business", "#Startups"),
    ("innovation", "#Innovation"),
    ("innovate", "#Innovation"),
    ("risk", "#Risk"),
    ("spiritual", "#Spirituality"),
    ("spirituality", "#Spirituality"),
    ("meditation", "#Meditation"),
    ("mindfulness", "#Meditation"),
    ("presence", "#Presence"),
    ("awareness", "#Awareness"),
    ("consciousness", "#Consciousness"),
    ("healing", "#Healing"),
    ("energy", "#Energy"),
    ("wisdom", "#Wisdom"),
    ("inner work", "#InnerWork"),
    ("love", "#Love"),
    ("relationship", "#Relationships"),
    ("relationships", "#Relationships"),
    ("parenting", "#Parenting"),
    ("family", "#Parenting"),
    ("children", "#Parenting"),
    ("emotion", "#Emotions"),
    ("emotions", "#Emotions"),
    ("emotional", "#Emotions"),
    ("resilience", "#Resilience"),
    ("trauma", "#Trauma"),
    ("purpose", "#Purpose"),
    ("meaning", "#Purpose"),
    ("podcast", "#Podcast"),
    ("interview", "#Interview"),
    ("conversation", "#Interview"),
    ("shorts", "#Shorts"),
    ("lecture", "#Lecture"),
    ("talk", "#Lecture"),
];

const TITLE_WEIGHT: u32 = 2;
const SUMMARY_WEIGHT: u32 = 1;

/// Scores library tags by keyword hits in the title (weight 2) and the
/// summary essence (weight 1); whole words only.
#[derive(Debug, Default, Clone)]
pub struct KeywordTagger;

impl KeywordTagger {
    pub fn select(&self, title: &str, summary_text: &str) -> Vec<String> {
        let mut scores: HashMap<&str, u32> = HashMap::new();
        let title = word_text(title);
        let summary_text = word_text(summary_text);
        for (keyword, tag) in KEYWORDS {
            let needle = format!(" {} ", keyword);
            if title.contains(&needle) {
                *scores.entry(*tag).or_default() += TITLE_WEIGHT;
            }
            if summary_text.contains(&needle) {
                *scores.entry(*tag).or_default() += SUMMARY_WEIGHT;
            }
        }

        let best_format = FORMAT_TAGS
            .iter()
            .map(|t| scores.get(t).copied().unwrap_or(0))
            .max()
            .unwrap_or(0);
        if best_format < TITLE_WEIGHT {
            *scores.entry("#Podcast").or_default() += TITLE_WEIGHT;
        }

        let mut ranked: Vec<(usize, &str, u32)> = LIBRARY
            .iter()
            .enumerate()
            .filter_map(|(pos, tag)| scores.get(tag).map(|s| (pos, *tag, *s)))
            .filter(|(_, _, s)| *s > 0)
            .collect();
        ranked.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));

        let mut tags: Vec<String> = ranked
            .into_iter()
            .take(TAG_COUNT)
            .map(|(_, t, _)| t.to_string())
            .collect();
        for tag in LIBRARY {
            if tags.len() >= TAG_COUNT {
                break;
            }
            if !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
        tags
    }
}

impl Tagger for KeywordTagger {
    fn tags(&self, item: &Item, summary: &StructuredSummary) -> Vec<String> {
        let title = if summary.title.trim().is_empty() {
            &item.title
        } else {
            &summary.title
        };
        self.select(title, &summary.summary.essence)
    }
}

/// Lowercase words separated by single spaces, padded at both ends.
fn word_text(s: &str) -> String {
    let lowered = s.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    format!(" {} ", words.join(" "))
}
