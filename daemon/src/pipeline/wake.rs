/// Activation phrases, matched as case- and punctuation-insensitive
/// substrings. "atlases" and "heyatlas" both contain "atlas".
#[derive(Debug, Clone, PartialEq)]
pub struct WakePhrases {
    phrases: Vec<String>,
}

/// Lowercases (Unicode aware), drops punctuation and collapses whitespace.
fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|&c| c != '\'')
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl WakePhrases {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|p| normalize(p.as_ref()))
            .filter(|p: &String| !p.is_empty())
            .collect();
        Self { phrases }
    }

    /// The first configured phrase contained in `text`.
    pub fn find(&self, text: &str) -> Option<&str> {
        let haystack = normalize(text);
        self.phrases
            .iter()
            .find(|phrase| haystack.contains(phrase.as_str()))
            .map(String::as_str)
    }

    pub fn matches(&self, text: &str) -> bool {
        self.find(text).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phrases() -> WakePhrases {
        WakePhrases::new(["hey atlas", "atlas"])
    }

    #[test]
    fn test_matches_case_and_punctuation_insensitive() {
        let wake = phrases();
        assert!(wake.matches("hey atlas"));
        assert!(wake.matches("Hey, Atlas!"));
        assert!(wake.matches("ok ATLAS open netflix"));
        assert_eq!(wake.find("Hey Atlas."), Some("hey atlas"));
    }

    #[test]
    fn test_matches_inside_words() {
        let wake = phrases();
        assert!(wake.matches("atlases are heavy"));
        assert_eq!(wake.find("heyatlas open netflix"), Some("atlas"));
        assert!(!wake.matches("open netflix"));
        assert!(!wake.matches("at las"));
    }

    #[test]
    fn test_lowercases_non_ascii() {
        let wake = WakePhrases::new(["hey átlas"]);
        assert!(wake.matches("HEY ÁTLAS"));
        assert_eq!(wake.find("Hey, Átlas!"), Some("hey átlas"));
    }

    #[test]
    fn test_apostrophes_are_dropped() {
        let wake = WakePhrases::new(["what's up"]);
        assert!(wake.matches("Whats up?"));
        assert!(wake.matches("what's up"));
    }

    #[test]
    fn test_blank_phrases_are_ignored() {
        let wake = WakePhrases::new(["", "  ", "!!"]);
        assert!(wake.is_empty());
        assert!(!wake.matches("anything"));
    }
}
