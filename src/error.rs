//! Shared error plumbing: the `PUGNEUM:` code namespace and the
//! annotated source excerpt every stage error renders with.

use std::fmt::Write as _;

use crate::token::Span;

/// Namespace prefixed to every error code.
pub const NAMESPACE: &str = "PUGNEUM";

/// Lines of context shown before and after the faulting line.
const CONTEXT_LINES: usize = 2;

/// Build a namespaced code such as `PUGNEUM:INVALID_TOKEN`.
#[must_use]
pub fn namespaced(reason: &str) -> String {
    format!("{NAMESPACE}:{reason}")
}

/// Render the full error message for `msg` at `span`.
///
/// The header is `filename:line:column` (filename and column omitted when
/// unknown). With a `source`, up to two lines of context surround the
/// faulting line, which is marked with `>`, and a caret line points at the
/// column. A line outside the source degrades to the bare header.
#[must_use]
pub fn annotate(msg: &str, span: &Span, column: Option<usize>, source: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(file) = &span.file {
        out.push_str(file);
        out.push(':');
    }
    let _ = write!(out, "{}", span.line);
    if let Some(col) = column {
        let _ = write!(out, ":{col}");
    }

    if let Some(src) = source {
        let lines: Vec<&str> = src.split('\n').collect();
        if span.line >= 1 && span.line <= lines.len() {
            let first = span.line.saturating_sub(CONTEXT_LINES).max(1);
            let last = (span.line + CONTEXT_LINES).min(lines.len());
            let width = last.to_string().len();
            for number in first..=last {
                let marker = if number == span.line { "  > " } else { "    " };
                let preamble = format!("{marker}{number:>width$}| ");
                let _ = write!(out, "\n{preamble}{}", lines[number - 1]);
                if number == span.line {
                    if let Some(col) = column.filter(|c| *c >= 1) {
                        let dashes = preamble.chars().count() + col - 1;
                        let _ = write!(out, "\n{}^", "-".repeat(dashes));
                    }
                }
            }
        }
    }

    out.push_str("\n\n");
    out.push_str(msg);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "foo\nbar\nbaz\nbash\nbing";

    fn span(file: Option<&str>, line: usize) -> Span {
        Span::new(file.map(str::to_string), line, 0)
    }

    #[test]
    fn source_and_filename() {
        let msg = annotate("My message", &span(Some("myfile"), 3), None, Some(SRC));
        assert_eq!(
            msg,
            "myfile:3\n    1| foo\n    2| bar\n  > 3| baz\n    4| bash\n    5| bing\n\nMy message"
        );
    }

    #[test]
    fn source_without_filename() {
        let msg = annotate("My message", &span(None, 3), None, Some(SRC));
        assert_eq!(
            msg,
            "3\n    1| foo\n    2| bar\n  > 3| baz\n    4| bash\n    5| bing\n\nMy message"
        );
    }

    #[test]
    fn no_source() {
        assert_eq!(
            annotate("My message", &span(Some("myfile"), 3), None, None),
            "myfile:3\n\nMy message"
        );
        assert_eq!(
            annotate("My message", &span(None, 3), Some(1), None),
            "3:1\n\nMy message"
        );
    }

    #[test]
    fn caret_under_column() {
        let msg = annotate("My message", &span(Some("myfile"), 3), Some(2), Some(SRC));
        assert_eq!(
            msg,
            "myfile:3:2\n    1| foo\n    2| bar\n  > 3| baz\n--------^\n    4| bash\n    5| bing\n\nMy message"
        );
    }

    #[test]
    fn context_is_clipped() {
        let msg = annotate("m", &span(None, 1), None, Some(SRC));
        assert_eq!(msg, "1\n  > 1| foo\n    2| bar\n    3| baz\n\nm");
    }

    #[test]
    fn out_of_range_line() {
        assert_eq!(annotate("m", &span(None, 0), None, Some(SRC)), "0\n\nm");
        assert_eq!(annotate("m", &span(None, 6), None, Some(SRC)), "6\n\nm");
    }

    #[test]
    fn line_numbers_right_aligned() {
        let src = (1..=12).map(|n| n.to_string()).collect::<Vec<_>>().join("\n");
        let msg = annotate("m", &span(None, 9), Some(1), Some(&src));
        assert!(msg.contains("\n     7| 7\n     8| 8\n  >  9| 9\n--------^\n    10| 10\n    11| 11"));
    }
}
