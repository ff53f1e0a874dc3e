//! Intent detection.
//!
//! One ordered table of `{pattern, intent}` rows and one dispatch. The first
//! matching row wins, so more specific intents sit above broader ones.

use regex_lite::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    /// Needs fresh information from the web
    Lookup,
    /// Asks what the agent can do
    FeatureQuestion,
    /// Asks the agent to stop talking
    Silence,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::FeatureQuestion => "feature_question",
            Self::Silence => "silence",
        }
    }
}

const STANDARD_ROWS: &[(&str, Intent)] = &[
    (r"(?i)what can you do|what are you able to|how do i use you|\bhelp\b", Intent::FeatureQuestion),
    (r"何ができる|どんなことができる|できること|使い方|自己紹介|機能(を|について)?教えて", Intent::FeatureQuestion),
    (r"(?i)\b(be quiet|shut up|stop talking|go quiet|silence)\b", Intent::Silence),
    (r"静かに|黙って|しずかに", Intent::Silence),
    (r"(?i)\b(search|look up|google|news|latest)\b|tell me about", Intent::Lookup),
    (r"検索|調べて|ニュース|最新|速報|教えて", Intent::Lookup),
    (r"^\?\?|[?？]\s*$", Intent::Lookup),
];

static URL: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r#"https?://[^\s<>"]+"#).ok());

pub struct IntentTable {
    rows: Vec<(Regex, Intent)>,
}

impl IntentTable {
    /// Compile `rows` in order.
    pub fn new<'a>(rows: impl IntoIterator<Item = (&'a str, Intent)>) -> Result<Self, regex_lite::Error> {
        let rows = rows
            .into_iter()
            .map(|(pattern, intent)| Ok((Regex::new(pattern)?, intent)))
            .collect::<Result<Vec<_>, regex_lite::Error>>()?;
        Ok(Self { rows })
    }

    /// The built-in English and Japanese table.
    pub fn standard() -> Self {
        let rows = STANDARD_ROWS
            .iter()
            .filter_map(|(pattern, intent)| Regex::new(pattern).ok().map(|re| (re, *intent)))
            .collect();
        Self { rows }
    }

    pub fn classify(&self, text: &str) -> Option<Intent> {
        let text = text.trim();
        self.rows
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, intent)| *intent)
    }
}

impl Default for IntentTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Every http(s) URL in `text`, in order, with trailing punctuation removed.
pub fn extract_urls(text: &str) -> Vec<String> {
    let Some(re) = URL.as_ref() else {
        return Vec::new();
    };
    re.find_iter(text)
        .map(|m| {
            m.as_str()
                .trim_end_matches(['.', ',', ';', ':', '!', '?', ')', ']', '}', '\'', '。', '、', '」', '）'])
                .to_string()
        })
        .filter(|url| url.len() > "https://".len())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_compiles_every_row() {
        assert_eq!(IntentTable::standard().rows.len(), STANDARD_ROWS.len());
    }

    #[test]
    fn classifies_by_first_matching_row() {
        let table = IntentTable::standard();
        assert_eq!(table.classify("What can you do?"), Some(Intent::FeatureQuestion));
        assert_eq!(table.classify("please be quiet"), Some(Intent::Silence));
        assert_eq!(table.classify("ちょっと静かにして"), Some(Intent::Silence));
        assert_eq!(table.classify("search for kyoto temples"), Some(Intent::Lookup));
        assert_eq!(table.classify("最新のニュースを教えて"), Some(Intent::Lookup));
        assert_eq!(table.classify("is it raining in Osaka?"), Some(Intent::Lookup));
        assert_eq!(table.classify("明日は晴れる？ "), Some(Intent::Lookup));
        assert_eq!(table.classify("good morning"), None);
    }

    #[test]
    fn feature_question_wins_over_trailing_question_mark() {
        let table = IntentTable::standard();
        assert_eq!(table.classify("何ができるの？"), Some(Intent::FeatureQuestion));
    }

    #[test]
    fn custom_rows_are_evaluated_in_order() {
        let table = IntentTable::new([("weather", Intent::Lookup), ("weather", Intent::Silence)]).unwrap();
        assert_eq!(table.classify("weather please"), Some(Intent::Lookup));
        assert!(IntentTable::new([("(unclosed", Intent::Lookup)]).is_err());
    }

    #[test]
    fn word_boundaries_avoid_false_hits() {
        let table = IntentTable::standard();
        assert_eq!(table.classify("the helpdesk closed early"), None);
        assert_eq!(table.classify("research papers are long"), None);
    }

    #[test]
    fn urls_are_extracted_and_trimmed() {
        let urls = extract_urls("see https://example.com/a?b=1, and (http://x.org/page). done");
        assert_eq!(urls, vec!["https://example.com/a?b=1", "http://x.org/page"]);
        assert_eq!(extract_urls("これ見て https://example.jp/記事。"), vec!["https://example.jp/記事"]);
        assert!(extract_urls("no links, just ftp://old.host").is_empty());
        assert!(extract_urls("https://").is_empty());
    }
}
