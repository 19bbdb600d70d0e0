//! Topic prompts for clusters of text snippets.

use crate::error::{EnrichError, Result};

/// Fixed delimiter candidates, in priority order.
pub const DELIMITER_CANDIDATES: [&str; 3] = ["///", "|||", "###"];

const COUNT_WORDS: [&str; 16] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen",
];

/// "two" … "fifteen", numerals outside that range.
pub fn count_word(n: usize) -> String {
    match n {
        2..=15 => COUNT_WORDS[n].to_string(),
        _ => n.to_string(),
    }
}

fn symbol_name(symbol: char) -> &'static str {
    match symbol {
        '/' => "forward slashes",
        '|' => "vertical bars",
        '#' => "hash symbols",
        _ => "characters",
    }
}

/// Describe a delimiter in words, e.g. "three forward slashes".
pub fn describe_delimiter(delimiter: &str) -> String {
    let Some(first) = delimiter.chars().next() else {
        return "an empty delimiter".to_string();
    };
    if delimiter.chars().all(|c| c == first) {
        format!(
            "{} {}",
            count_word(delimiter.chars().count()),
            symbol_name(first)
        )
    } else {
        format!("the character sequence {delimiter}")
    }
}

/// Snippets plus a delimiter that occurs in none of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptAssembly {
    snippets: Vec<String>,
    delimiter: Option<String>,
}

impl PromptAssembly {
    pub fn new(snippets: Vec<String>) -> Result<Self> {
        if snippets.is_empty() {
            return Err(EnrichError::EmptyInput(
                "no snippets to build a clustering prompt from".to_string(),
            ));
        }
        let delimiter = (snippets.len() > 1).then(|| select_delimiter(&snippets));
        Ok(Self {
            snippets,
            delimiter,
        })
    }

    pub fn snippets(&self) -> &[String] {
        &self.snippets
    }

    /// `None` for a single snippet.
    pub fn delimiter(&self) -> Option<&str> {
        self.delimiter.as_deref()
    }

    pub fn joined(&self) -> String {
        self.snippets.join(self.delimiter.as_deref().unwrap_or(""))
    }

    pub fn render(&self) -> String {
        match &self.delimiter {
            None => format!(
                "Identify the topic of the following text. Reply with a short topic label of \
                 at most five words and nothing else.\n\nText: {}",
                self.snippets[0]
            ),
            Some(delimiter) => format!(
                "The following {} texts belong to the same cluster. They are separated by {} \
                 ({}). Identify the single topic they have in common. Reply with a short topic \
                 label of at most five words and nothing else.\n\nTexts: {}",
                count_word(self.snippets.len()),
                describe_delimiter(delimiter),
                delimiter,
                self.joined()
            ),
        }
    }
}

/// First fixed candidate absent from every snippet, else the shortest
/// repetition of the first candidate that occurs in no snippet and still
/// splits the joined text back into the original snippets.
///
/// A snippet followed by another one must not end in `/`, or it would merge
/// with an all-slash delimiter. In that case the escalated delimiter is closed
/// with `#`, a character that occurs nowhere else in it.
pub fn select_delimiter(snippets: &[String]) -> String {
    let collides = |candidate: &str| snippets.iter().any(|s| s.contains(candidate));

    if let Some(candidate) = DELIMITER_CANDIDATES.iter().find(|c| !collides(**c)) {
        return candidate.to_string();
    }

    let base = DELIMITER_CANDIDATES[0];
    let followed = &snippets[..snippets.len().saturating_sub(1)];
    let closed = followed.iter().any(|s| s.ends_with('/'));

    // Candidates grow past every snippet's length, so this terminates.
    let mut repeat = 2;
    loop {
        let mut candidate = base.repeat(repeat);
        if closed {
            candidate.push('#');
        }
        if !collides(&candidate) && splits_back(snippets, &candidate) {
            return candidate;
        }
        repeat += 1;
    }
}

fn splits_back(snippets: &[String], delimiter: &str) -> bool {
    snippets
        .join(delimiter)
        .split(delimiter)
        .eq(snippets.iter().map(String::as_str))
}

pub fn build_clustering_prompt<S: AsRef<str>>(snippets: &[S]) -> Result<String> {
    let snippets = snippets.iter().map(|s| s.as_ref().to_string()).collect();
    Ok(PromptAssembly::new(snippets)?.render())
}
