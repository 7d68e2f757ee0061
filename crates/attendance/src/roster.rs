//! Name roster and suggestions
//!
//! A roster is plain text with one name per line. Suggestions match the typed
//! text anywhere in a known name, ignoring case, like the attendee autocomplete
//! on the entry form.

use parking_lot::RwLock;

/// Maximum number of suggestions returned
pub const MAX_SUGGESTIONS: usize = 10;

/// Split roster text into names, trimming each line and dropping blank ones
pub fn parse_roster(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Cached, sorted list of known names
#[derive(Debug)]
pub struct NameSuggester {
    names: RwLock<Option<Vec<String>>>,
    limit: usize,
}

impl Default for NameSuggester {
    fn default() -> Self {
        Self::new(MAX_SUGGESTIONS)
    }
}

impl NameSuggester {
    /// Create an empty suggester returning at most `limit` names
    pub fn new(limit: usize) -> Self {
        Self {
            names: RwLock::new(None),
            limit,
        }
    }

    /// Whether the cache holds a name list
    pub fn is_loaded(&self) -> bool {
        self.names.read().is_some()
    }

    /// Replace the cached list
    pub fn load(&self, names: impl IntoIterator<Item = String>) {
        let mut names: Vec<String> = names.into_iter().collect();
        names.sort();
        names.dedup();
        *self.names.write() = Some(names);
    }

    /// Drop the cached list; the next lookup reloads it
    pub fn invalidate(&self) {
        *self.names.write() = None;
    }

    /// Names containing `query`, case-insensitively, in sorted order.
    ///
    /// Returns `None` when the cache is not loaded. A blank query matches
    /// every name, so focusing an empty field lists the first names.
    pub fn suggest(&self, query: &str) -> Option<Vec<String>> {
        let names = self.names.read();
        let names = names.as_ref()?;

        let query = query.trim().to_lowercase();
        Some(
            names
                .iter()
                .filter(|name| name.to_lowercase().contains(&query))
                .take(self.limit)
                .cloned()
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roster() {
        let names = parse_roster("  Ana \n\nBo\r\n   \nCy");
        assert_eq!(names, vec!["Ana", "Bo", "Cy"]);
        assert!(parse_roster("\n  \n").is_empty());
    }

    #[test]
    fn test_suggest_substring_case_insensitive() {
        let suggester = NameSuggester::default();
        suggester.load(["Mariana".into(), "Ana".into(), "Bo".into(), "ANAIS".into()]);

        assert_eq!(
            suggester.suggest("an").unwrap(),
            vec!["ANAIS", "Ana", "Mariana"]
        );
        assert_eq!(suggester.suggest("zz").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_blank_query_lists_first_names() {
        let suggester = NameSuggester::new(3);
        suggester.load(["Dee".into(), "Ana".into(), "Cy".into(), "Bo".into()]);

        assert_eq!(suggester.suggest("").unwrap(), vec!["Ana", "Bo", "Cy"]);
        assert_eq!(suggester.suggest("   ").unwrap(), vec!["Ana", "Bo", "Cy"]);
    }

    #[test]
    fn test_suggest_limit() {
        let suggester = NameSuggester::default();
        suggester.load((0..25).map(|i| format!("Name {i:02}")));

        let found = suggester.suggest("name").unwrap();
        assert_eq!(found.len(), MAX_SUGGESTIONS);
        assert_eq!(found[0], "Name 00");
    }

    #[test]
    fn test_invalidate() {
        let suggester = NameSuggester::new(3);
        assert!(suggester.suggest("a").is_none());

        suggester.load(["Ana".into()]);
        assert!(suggester.is_loaded());

        suggester.invalidate();
        assert!(!suggester.is_loaded());
        assert!(suggester.suggest("a").is_none());
    }
}
