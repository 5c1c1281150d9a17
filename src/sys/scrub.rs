// src/sys/scrub.rs

use regex::Regex;

/// 🛡️ Redacts credential-shaped text from container output before it reaches
/// stdout or the log. Secret values themselves are never held here.
pub struct LogScrubber {
    rules: Vec<(Regex, &'static str)>,
}

impl LogScrubber {
    pub fn new() -> Self {
        let rules = [
            // https://[TOKEN]@host and git@[TOKEN]:repo
            (r"(://|git@)([^@\s/]+)@", "$1[REDACTED]@"),
            // AWS access key ids (long-term and STS)
            (r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b", "[REDACTED]"),
            // key = value / key: value for the secret access key
            (r"(?i)(aws_secret_access_key\s*[=:]\s*)\S+", "${1}[REDACTED]"),
        ];
        Self {
            rules: rules
                .into_iter()
                .map(|(pattern, replacement)| {
                    (Regex::new(pattern).expect("static scrub pattern"), replacement)
                })
                .collect(),
        }
    }

    pub fn scrub(&self, line: &str) -> String {
        self.rules
            .iter()
            .fold(line.to_string(), |acc, (re, rep)| re.replace_all(&acc, *rep).into_owned())
    }
}

impl Default for LogScrubber {
    fn default() -> Self {
        Self::new()
    }
}
