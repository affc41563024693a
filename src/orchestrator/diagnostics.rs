//! Summaries of failed install attempts

const ERROR_KEYWORDS: [&str; 4] = ["error", "failed", "exception", "timeout"];

const MAX_ERROR_LINES: usize = 3;

/// Broad cause of an install failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Network,
    NativeBuild,
    Permissions,
    Dependency,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Network => "network",
            ErrorType::NativeBuild => "native_build",
            ErrorType::Permissions => "permissions",
            ErrorType::Dependency => "dependency",
            ErrorType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First three error-looking lines joined with `"; "`, or the whole text
/// when no line looks like an error.
pub fn extract_error_details(error: &str) -> String {
    let relevant: Vec<&str> = error
        .lines()
        .map(str::trim)
        .filter(|line| {
            let lower = line.to_lowercase();
            ERROR_KEYWORDS.iter().any(|k| lower.contains(k))
        })
        .take(MAX_ERROR_LINES)
        .collect();

    if relevant.is_empty() {
        error.trim().to_string()
    } else {
        relevant.join("; ")
    }
}

pub fn classify_error(error: &str) -> ErrorType {
    let lower = error.to_lowercase();
    let mentions = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if lower.is_empty() {
        ErrorType::Unknown
    } else if mentions(&["timeout", "timed out", "network", "connection", "resolve"]) {
        ErrorType::Network
    } else if mentions(&["gcc", "compile", "build", "cython"]) {
        ErrorType::NativeBuild
    } else if mentions(&["permission", "access"]) {
        ErrorType::Permissions
    } else if mentions(&["dependency", "requirement"]) {
        ErrorType::Dependency
    } else {
        ErrorType::Unknown
    }
}
