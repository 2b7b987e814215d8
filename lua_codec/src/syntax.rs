//! Pre-flight structural check for script fragments.
//!
//! This is not a Lua parser. It tokenizes just enough (strings, long
//! brackets, comments, identifiers, brackets) to verify that blocks and
//! brackets nest and that every string and comment is terminated. Those are
//! the mistakes that make a console upload fail without a useful reply.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct SyntaxIssue {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Open {
    Paren,
    Bracket,
    Brace,
    Function,
    If,
    /// `for`/`while` header waiting for its `do`.
    LoopHeader,
    Do,
    Repeat,
}

impl Open {
    fn describe(self) -> &'static str {
        match self {
            Open::Paren => "`(`",
            Open::Bracket => "`[`",
            Open::Brace => "`{`",
            Open::Function => "`function`",
            Open::If => "`if`",
            Open::LoopHeader => "loop header",
            Open::Do => "`do`",
            Open::Repeat => "`repeat`",
        }
    }
}

struct Checker {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    stack: Vec<(Open, usize)>,
}

/// Check a fragment; `Ok(())` means it is structurally sound.
pub fn check(source: &str) -> Result<(), SyntaxIssue> {
    Checker {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        stack: Vec::new(),
    }
    .run()
}

impl Checker {
    fn issue<T>(&self, line: usize, message: impl Into<String>) -> Result<T, SyntaxIssue> {
        Err(SyntaxIssue {
            line,
            message: message.into(),
        })
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if let Some(c) = c {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
            }
        }
        c
    }

    fn run(mut self) -> Result<(), SyntaxIssue> {
        while let Some(c) = self.peek(0) {
            match c {
                '-' if self.peek(1) == Some('-') => {
                    self.bump();
                    self.bump();
                    self.comment()?;
                }
                '"' | '\'' => self.short_string(c)?,
                '[' => {
                    if let Some(level) = self.long_bracket_level() {
                        let start = self.line;
                        self.long_bracket(level, start, "string")?;
                    } else {
                        self.bump();
                        self.stack.push((Open::Bracket, self.line));
                    }
                }
                '(' => {
                    self.bump();
                    self.stack.push((Open::Paren, self.line));
                }
                '{' => {
                    self.bump();
                    self.stack.push((Open::Brace, self.line));
                }
                ')' => self.close_bracket(Open::Paren, ')')?,
                ']' => self.close_bracket(Open::Bracket, ']')?,
                '}' => self.close_bracket(Open::Brace, '}')?,
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let word = self.word();
                    self.keyword(&word)?;
                }
                c if c.is_ascii_digit() => {
                    // Numbers may contain letters (hex, exponents); consume as one token
                    while self
                        .peek(0)
                        .map_or(false, |c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
                    {
                        self.bump();
                    }
                }
                _ => {
                    self.bump();
                }
            }
        }
        if let Some((open, line)) = self.stack.last() {
            return self.issue(*line, format!("{} is never closed", open.describe()));
        }
        Ok(())
    }

    fn word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek(0) {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        word
    }

    fn keyword(&mut self, word: &str) -> Result<(), SyntaxIssue> {
        let line = self.line;
        match word {
            "function" => self.stack.push((Open::Function, line)),
            "if" => self.stack.push((Open::If, line)),
            "for" | "while" => self.stack.push((Open::LoopHeader, line)),
            "repeat" => self.stack.push((Open::Repeat, line)),
            "do" => match self.stack.last_mut() {
                Some((open @ Open::LoopHeader, _)) => *open = Open::Do,
                _ => self.stack.push((Open::Do, line)),
            },
            "end" => match self.stack.pop() {
                Some((Open::Function | Open::If | Open::Do, _)) => {}
                Some((open, opened)) => {
                    return self.issue(
                        line,
                        format!("`end` closes {} opened on line {}", open.describe(), opened),
                    )
                }
                None => return self.issue(line, "`end` without an open block"),
            },
            "until" => match self.stack.pop() {
                Some((Open::Repeat, _)) => {}
                Some((open, opened)) => {
                    return self.issue(
                        line,
                        format!("`until` closes {} opened on line {}", open.describe(), opened),
                    )
                }
                None => return self.issue(line, "`until` without `repeat`"),
            },
            _ => {}
        }
        Ok(())
    }

    fn close_bracket(&mut self, expected: Open, c: char) -> Result<(), SyntaxIssue> {
        let line = self.line;
        self.bump();
        match self.stack.pop() {
            Some((open, _)) if open == expected => Ok(()),
            Some((open, opened)) => self.issue(
                line,
                format!("`{}` closes {} opened on line {}", c, open.describe(), opened),
            ),
            None => self.issue(line, format!("unbalanced `{}`", c)),
        }
    }

    fn comment(&mut self) -> Result<(), SyntaxIssue> {
        if self.peek(0) == Some('[') {
            if let Some(level) = self.long_bracket_level() {
                let start = self.line;
                return self.long_bracket(level, start, "comment");
            }
        }
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.bump();
        }
        Ok(())
    }

    fn short_string(&mut self, quote: char) -> Result<(), SyntaxIssue> {
        let start = self.line;
        self.bump();
        loop {
            match self.bump() {
                Some('\\') => {
                    self.bump();
                }
                Some('\n') | None => return self.issue(start, "unfinished string"),
                Some(c) if c == quote => return Ok(()),
                Some(_) => {}
            }
        }
    }

    /// At `[`: returns the level of a long bracket opener (`[[` = 0, `[=[` = 1, ...).
    fn long_bracket_level(&self) -> Option<usize> {
        let mut level = 0;
        while self.peek(1 + level) == Some('=') {
            level += 1;
        }
        (self.peek(1 + level) == Some('[')).then_some(level)
    }

    fn long_bracket(&mut self, level: usize, start: usize, what: &str) -> Result<(), SyntaxIssue> {
        // Skip the opener
        for _ in 0..level + 2 {
            self.bump();
        }
        while let Some(c) = self.bump() {
            if c == ']' {
                let mut eq = 0;
                while self.peek(eq) == Some('=') {
                    eq += 1;
                }
                if eq == level && self.peek(eq) == Some(']') {
                    for _ in 0..=eq {
                        self.bump();
                    }
                    return Ok(());
                }
            }
        }
        self.issue(start, format!("unfinished long {}", what))
    }
}
