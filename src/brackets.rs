//! Bracket matching for attribute lists and mixin arguments.
//!
//! Scans forward counting nested `(`, `{` and `[` against their closing
//! counterparts while skipping over quoted strings and comments, so that
//! `a(title="(" href='x')` closes on the final `)`.

/// A matched bracketed region. Indices are byte offsets into the scanned
/// input; `end` is the offset of the closing bracket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketRange {
    pub start: usize,
    pub end: usize,
    pub src: String,
}

/// Why a bracket scan failed. `index` is the byte offset where it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BracketError {
    EndOfString { index: usize },
    Mismatched { index: usize, expected: char, found: char },
}

impl BracketError {
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::EndOfString { index } | Self::Mismatched { index, .. } => *index,
        }
    }
}

/// Closing counterpart of an opening bracket.
#[must_use]
pub const fn closing(open: char) -> Option<char> {
    match open {
        '(' => Some(')'),
        '{' => Some('}'),
        '[' => Some(']'),
        _ => None,
    }
}

#[derive(Clone, Copy)]
enum State {
    Code,
    Str(char),
    LineComment,
    BlockComment,
}

/// Scan `input` from byte offset `start` until an unnested `close`.
///
/// # Errors
///
/// `EndOfString` when the input ends first, `Mismatched` when a closing
/// bracket does not match the innermost open one.
pub fn parse_until(
    input: &str,
    start: usize,
    close: char,
) -> Result<BracketRange, BracketError> {
    let mut stack: Vec<char> = Vec::new();
    let mut state = State::Code;
    let mut chars = input[start..].char_indices().peekable();

    while let Some((offset, ch)) = chars.next() {
        let index = start + offset;
        match state {
            State::Str(quote) => {
                if ch == '\\' {
                    chars.next();
                } else if ch == quote {
                    state = State::Code;
                }
            }
            State::LineComment => {
                if ch == '\n' {
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if ch == '*' && chars.peek().is_some_and(|(_, c)| *c == '/') {
                    chars.next();
                    state = State::Code;
                }
            }
            State::Code => match ch {
                '\'' | '"' | '`' => state = State::Str(ch),
                '/' if chars.peek().is_some_and(|(_, c)| *c == '/') => {
                    chars.next();
                    state = State::LineComment;
                }
                '/' if chars.peek().is_some_and(|(_, c)| *c == '*') => {
                    chars.next();
                    state = State::BlockComment;
                }
                '(' | '{' | '[' => {
                    if let Some(c) = closing(ch) {
                        stack.push(c);
                    }
                }
                ')' | '}' | ']' => match stack.pop() {
                    None if ch == close => {
                        return Ok(BracketRange {
                            start,
                            end: index,
                            src: input[start..index].to_string(),
                        });
                    }
                    None => {
                        return Err(BracketError::Mismatched {
                            index,
                            expected: close,
                            found: ch,
                        });
                    }
                    Some(expected) if expected != ch => {
                        return Err(BracketError::Mismatched {
                            index,
                            expected,
                            found: ch,
                        });
                    }
                    Some(_) => {}
                },
                _ => {}
            },
        }
    }

    Err(BracketError::EndOfString { index: input.len() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple() {
        let range = parse_until("(a b) rest", 1, ')').expect("should match");
        assert_eq!(range.end, 4);
        assert_eq!(range.src, "a b");
    }

    #[test]
    fn nested_and_quoted() {
        let input = r#"(title="(" data-x=[1, (2)] b='a\'b)') tail"#;
        let range = parse_until(input, 1, ')').expect("should match");
        assert_eq!(&input[range.end..], ") tail");
    }

    #[test]
    fn block_comment_skipped() {
        let range = parse_until("(a /* ) */ b)", 1, ')').expect("should match");
        assert_eq!(range.src, "a /* ) */ b");
    }

    #[test]
    fn unterminated() {
        let err = parse_until("(a b", 1, ')').unwrap_err();
        assert_eq!(err, BracketError::EndOfString { index: 4 });
    }

    #[test]
    fn mismatch() {
        let err = parse_until("(a ] b)", 1, ')').unwrap_err();
        assert!(matches!(
            err,
            BracketError::Mismatched {
                index: 3,
                expected: ')',
                found: ']'
            }
        ));
    }

    #[test]
    fn inner_mismatch() {
        let err = parse_until("(a [ } b)", 1, ')').unwrap_err();
        assert!(matches!(
            err,
            BracketError::Mismatched {
                expected: ']',
                found: '}',
                ..
            }
        ));
    }
}
