use super::Rule;
use thiserror::Error;

/// Failure to read a reply as a serialized value.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("syntax error at {line}:{column}: {message} in `{snippet}`")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
        /// The input line the error points into.
        snippet: String,
    },
    #[error("invalid literal `{text}`: {message}")]
    InvalidLiteral { text: String, message: String },
    #[error("invalid escape sequence `{sequence}`")]
    InvalidEscape { sequence: String },
    #[error("unexpected rule {found} (expected {expected})")]
    UnexpectedRule { expected: String, found: String },
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(e: pest::error::Error<Rule>) -> Self {
        let (line, column) = match e.line_col {
            pest::error::LineColLocation::Pos(pos) => pos,
            pest::error::LineColLocation::Span(start, _) => start,
        };
        ParseError::Syntax {
            line,
            column,
            message: e.variant.message().to_string(),
            snippet: e.line().to_string(),
        }
    }
}
