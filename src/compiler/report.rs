//! Decoding the compiler's `--report=json` stderr payload (§6).

use serde::{Deserialize, Serialize};

/// A styled or plain chunk of a problem message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageChunk {
    /// A plain string with no styling.
    Plain(String),
    /// A styled chunk.
    Styled {
        /// The text content.
        string: String,
        /// Whether the chunk is bold.
        #[serde(default)]
        bold: bool,
        /// Whether the chunk is underlined.
        #[serde(default)]
        underline: bool,
        /// The named colour, if any (§6 lists the accepted names).
        #[serde(default)]
        color: Option<String>,
    },
}

/// A source location, inclusive start, exclusive-ish end per the compiler's
/// own convention (not reinterpreted here).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

/// A region spanning from `start` to `end`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Region {
    /// The region's start position.
    pub start: Position,
    /// The region's end position.
    pub end: Position,
}

/// One problem reported against a single file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    /// A short, all-caps problem title (e.g. `"UNFINISHED MODULE DECLARATION"`).
    pub title: String,
    /// The span of source text the problem concerns.
    pub region: Region,
    /// The message body, a mix of plain and styled chunks.
    pub message: Vec<MessageChunk>,
}

/// One file's worth of reported problems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileError {
    /// The path of the file the problems concern.
    pub path: Option<String>,
    /// The problems found in this file, always non-empty.
    pub problems: Vec<Problem>,
}

/// The top-level shape of the compiler's JSON report (§6: two accepted
/// discriminants).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CompilerReport {
    /// A single general error, not tied to compiling a specific set of files.
    #[serde(rename = "error")]
    General {
        /// An optional path the error concerns.
        path: Option<String>,
        /// The message body.
        message: Vec<MessageChunk>,
    },
    /// Per-file compile errors.
    #[serde(rename = "compile-errors")]
    CompileErrors {
        /// One entry per file with at least one problem.
        errors: Vec<CompileError>,
    },
}

impl CompilerReport {
    /// Total number of individual problems represented by this report (1
    /// for a general error, the sum of per-file problem counts otherwise).
    #[must_use]
    pub fn problem_count(&self) -> usize {
        match self {
            Self::General { .. } => 1,
            Self::CompileErrors { errors } => errors.iter().map(|e| e.problems.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_general_error() {
        let json = r#"{"type":"error","path":null,"message":[{"string":"no elm.json found","bold":true}]}"#;
        let report: CompilerReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.problem_count(), 1);
    }

    #[test]
    fn decodes_compile_errors_with_mixed_chunks() {
        let json = r#"{
            "type":"compile-errors",
            "errors":[{
                "path":"src/Main.elm",
                "problems":[{
                    "title":"UNFINISHED MODULE DECLARATION",
                    "region":{"start":{"line":1,"column":1},"end":{"line":1,"column":7}},
                    "message":["plain text", {"string":"colored","color":"RED","bold":false,"underline":false}]
                }]
            }]
        }"#;
        let report: CompilerReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.problem_count(), 1);
        match report {
            CompilerReport::CompileErrors { errors } => {
                assert_eq!(errors[0].path.as_deref(), Some("src/Main.elm"));
                assert_eq!(errors[0].problems[0].title, "UNFINISHED MODULE DECLARATION");
            }
            CompilerReport::General { .. } => panic!("expected CompileErrors"),
        }
    }

    #[test]
    fn rejects_unknown_discriminant() {
        let json = r#"{"type":"something-else"}"#;
        assert!(serde_json::from_str::<CompilerReport>(json).is_err());
    }
}
