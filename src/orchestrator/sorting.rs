//! Tolerant version ordering for declared version lists

use std::cmp::Ordering;

/// Version specifier meaning "whatever the registry resolves to"
pub const LATEST: &str = "latest";

/// Maven-style release qualifiers that carry no ordering information
const NEUTRAL_QUALIFIERS: [&str; 2] = ["final", "release"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(u64),
    Word(String),
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Token::Number(a), Token::Number(b)) => a.cmp(b),
            (Token::Word(a), Token::Word(b)) => a.cmp(b),
            (Token::Number(_), Token::Word(_)) => Ordering::Less,
            (Token::Word(_), Token::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Whether a version is an unresolved build property such as `${spring.version}`
pub fn is_placeholder(version: &str) -> bool {
    let version = version.trim();
    version.starts_with("${") && version.ends_with('}')
}

fn tokenize(version: &str) -> Vec<Token> {
    version
        .trim()
        .to_lowercase()
        .split(['.', '-', '_'])
        .map(str::trim)
        .filter(|part| !part.is_empty() && !NEUTRAL_QUALIFIERS.contains(part))
        .map(|part| match part.parse::<u64>() {
            Ok(n) => Token::Number(n),
            Err(_) => Token::Word(part.to_string()),
        })
        .collect()
}

/// Orders two version strings.
///
/// Numeric tokens compare numerically, other tokens lexically, and numbers
/// sort before words. Placeholders sort after every concrete version.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (is_placeholder(a), is_placeholder(b)) {
        (true, true) => a.cmp(b),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => tokenize(a).cmp(&tokenize(b)).then_with(|| a.cmp(b)),
    }
}

/// Declared versions of one package, ready for testing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortedVersions {
    /// Concrete versions, ascending, without duplicates
    pub concrete: Vec<String>,
    /// `latest` was declared
    pub has_latest: bool,
}

pub fn sort_versions<S: AsRef<str>>(versions: &[S]) -> SortedVersions {
    let mut concrete: Vec<String> = Vec::new();
    let mut has_latest = false;

    for version in versions {
        let version = version.as_ref().trim();
        if version.eq_ignore_ascii_case(LATEST) {
            has_latest = true;
        } else if !version.is_empty() && !concrete.iter().any(|v| v == version) {
            concrete.push(version.to_string());
        }
    }
    concrete.sort_by(|a, b| compare_versions(a, b));

    SortedVersions {
        concrete,
        has_latest,
    }
}
