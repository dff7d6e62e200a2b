//! Word-level matching helpers shared by the router and the translators.

/// Lowercase alphanumeric words of `text`. Hyphens and underscores split words.
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Naive English singular: `companies` → `company`, `vendors` → `vendor`.
pub fn singular(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if stem.len() > 1 {
            return format!("{}y", stem);
        }
    }
    for suffix in ["ches", "shes", "sses", "xes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

fn singular_words(text: &str) -> Vec<String> {
    words(text).iter().map(|w| singular(w)).collect()
}

/// Position (in words) of the first occurrence of `phrase` in `text`, matching
/// whole words and ignoring case and plural endings.
pub fn find_phrase(text: &str, phrase: &str) -> Option<usize> {
    let haystack = singular_words(text);
    let needle = singular_words(phrase);
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle.as_slice())
}

pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    find_phrase(text, phrase).is_some()
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_split_on_punctuation() {
        assert_eq!(
            words("High-risk customers, then: emails!"),
            vec!["high", "risk", "customers", "then", "emails"]
        );
    }

    #[test]
    fn test_singular() {
        assert_eq!(singular("customers"), "customer");
        assert_eq!(singular("companies"), "company");
        assert_eq!(singular("batches"), "batch");
        assert_eq!(singular("address"), "address");
        assert_eq!(singular("bus"), "bus");
    }

    #[test]
    fn test_find_phrase_is_plural_insensitive() {
        assert_eq!(find_phrase("List the customers above 40M", "customer"), Some(2));
        assert_eq!(find_phrase("flagged vendors", "Vendors"), Some(1));
        assert!(contains_phrase("What about BioMed Research?", "biomed research"));
        assert!(!contains_phrase("below target", "low"));
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n\t b  "), "a b");
    }
}
