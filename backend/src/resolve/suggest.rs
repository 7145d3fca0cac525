//! Fuzzy hints for unanswered questions.
//!
//! Uses Jaro-Winkler similarity over a record field. Suggestions are advisory
//! only: they never resolve a lookup by themselves.

use rapidfuzz::distance::jaro_winkler;

use super::Record;

/// Minimum similarity for a record to be suggested.
pub const SUGGESTION_THRESHOLD: f64 = 0.8;

/// Maximum suggestions attached to one question.
pub const MAX_SUGGESTIONS: usize = 3;

/// A nearby record.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    /// Value of the compared field.
    pub key: String,
    /// Value of the requested field.
    pub value: String,
    pub group: String,
    pub score: f64,
}

/// Records whose `field` resembles `query`, best first.
pub fn suggest(records: &[Record], field: &str, query: &str, take: &str) -> Vec<Suggestion> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<Suggestion> = records
        .iter()
        .filter_map(|record| {
            let key = record.get(field)?;
            let value = record.get(take)?;
            let score = jaro_winkler::similarity(query.chars(), key.trim().to_lowercase().chars());
            (score >= SUGGESTION_THRESHOLD).then(|| Suggestion {
                key: key.clone(),
                value: value.clone(),
                group: record.get("group").cloned().unwrap_or_default(),
                score,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(MAX_SUGGESTIONS);
    scored
}

/// Markdown line shown next to a question.
pub fn format_suggestion(s: &Suggestion) -> String {
    format!("**`{}`** for *`{}`*, in *{}*.", s.value, s.key, s.group)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, id: &str) -> Record {
        let mut r = Record::new();
        r.insert("customerName".into(), name.into());
        r.insert("fuseId".into(), id.into());
        r.insert("group".into(), "acme".into());
        r
    }

    #[test]
    fn test_close_names_are_suggested() {
        let records = vec![
            record("Bobs Diner", "F-1"),
            record("Bob's Diner Inc", "F-2"),
            record("Zebra Market", "F-3"),
        ];
        let hints = suggest(&records, "customerName", "Bob's Diner", "fuseId");
        assert!(!hints.is_empty());
        assert!(hints.iter().all(|h| h.value != "F-3"));
        assert!(hints.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_at_most_three() {
        let records: Vec<Record> = (0..10).map(|i| record("Acme Store", &format!("F-{}", i))).collect();
        assert_eq!(suggest(&records, "customerName", "Acme Store", "fuseId").len(), 3);
    }

    #[test]
    fn test_format() {
        let s = Suggestion { key: "Bobs".into(), value: "F-1".into(), group: "acme".into(), score: 0.9 };
        assert_eq!(format_suggestion(&s), "**`F-1`** for *`Bobs`*, in *acme*.");
    }
}
