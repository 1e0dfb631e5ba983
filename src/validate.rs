//! Shape checks for structured summary records.
//!
//! Validation is pure: it never touches the network or the filesystem and
//! returns every violation found rather than stopping at the first.

use serde_json::Value;
use std::fmt;

/// Required top-level fields.
pub const REQUIRED_FIELDS: [&str; 2] = ["title", "podcaster"];

/// Required fields of the nested `summary` object.
pub const SUMMARY_FIELDS: [&str; 5] = [
    "essence",
    "top_takeaways",
    "game_changing_ideas",
    "things_you_can_do",
    "why_this_matters",
];

/// Summary fields that must be ordered sequences of strings.
pub const SEQUENCE_FIELDS: [&str; 3] = ["top_takeaways", "game_changing_ideas", "things_you_can_do"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    NotAnObject,
    MissingField(&'static str),
    MissingSummary,
    SummaryNotAnObject,
    NotASequence(&'static str),
    /// Shape was accepted but a field had an unusable type.
    Malformed(String),
}

impl Violation {
    /// Name of the offending field, when there is one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Violation::MissingField(f) | Violation::NotASequence(f) => Some(f),
            Violation::MissingSummary | Violation::SummaryNotAnObject => Some("summary"),
            _ => None,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::NotAnObject => f.write_str("record is not an object"),
            Violation::MissingField(name) => write!(f, "missing field: {}", name),
            Violation::MissingSummary => f.write_str("missing field: summary"),
            Violation::SummaryNotAnObject => f.write_str("summary is not an object"),
            Violation::NotASequence(name) => write!(f, "field is not a list: {}", name),
            Violation::Malformed(msg) => write!(f, "malformed record: {}", msg),
        }
    }
}

/// Check `record` against the required shape. Empty means valid.
pub fn validate(record: &Value) -> Vec<Violation> {
    let Some(obj) = record.as_object() else {
        return vec![Violation::NotAnObject];
    };

    let mut violations: Vec<Violation> = REQUIRED_FIELDS
        .iter()
        .filter(|f| is_absent(obj.get(**f)))
        .map(|f| Violation::MissingField(*f))
        .collect();

    match obj.get("summary") {
        None | Some(Value::Null) => violations.push(Violation::MissingSummary),
        Some(Value::Object(summary)) => {
            for field in SUMMARY_FIELDS {
                match summary.get(field) {
                    v if is_absent(v) => violations.push(Violation::MissingField(field)),
                    Some(v) if SEQUENCE_FIELDS.contains(&field) && !v.is_array() => {
                        violations.push(Violation::NotASequence(field))
                    }
                    _ => {}
                }
            }
        }
        Some(_) => violations.push(Violation::SummaryNotAnObject),
    }
    violations
}

pub fn is_valid(record: &Value) -> bool {
    validate(record).is_empty()
}

fn is_absent(v: Option<&Value>) -> bool {
    matches!(v, None | Some(Value::Null))
}

/// Join violations for logs and salvage files.
pub fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn complete() -> Value {
        json!({
            "title": "Episode",
            "podcaster": "Show",
            "summary": {
                "essence": "One line.",
                "top_takeaways": ["a", "b"],
                "game_changing_ideas": ["c"],
                "things_you_can_do": ["d"],
                "why_this_matters": "Because."
            }
        })
    }

    #[test]
    fn complete_record_is_valid() {
        assert!(validate(&complete()).is_empty());
    }

    #[test]
    fn missing_why_this_matters_is_named() {
        let mut r = complete();
        r["summary"].as_object_mut().unwrap().remove("why_this_matters");
        let v = validate(&r);
        assert_eq!(v, vec![Violation::MissingField("why_this_matters")]);
        assert!(describe(&v).contains("why_this_matters"));
    }

    #[test]
    fn scalar_where_list_expected() {
        let mut r = complete();
        r["summary"]["top_takeaways"] = json!("just one");
        assert_eq!(validate(&r), vec![Violation::NotASequence("top_takeaways")]);
    }

    #[test]
    fn reports_every_violation() {
        let v = validate(&json!({"title": null, "summary": "text"}));
        assert_eq!(
            v,
            vec![
                Violation::MissingField("title"),
                Violation::MissingField("podcaster"),
                Violation::SummaryNotAnObject,
            ]
        );
        assert_eq!(validate(&json!([1, 2])), vec![Violation::NotAnObject]);
        assert_eq!(validate(&json!({"title": "t", "podcaster": "p"})), vec![Violation::MissingSummary]);
    }
}
