//! Lexer token streams and error reporting.

mod common;

use common::{names, tokens};
use pugneum::lexer::{LexStep, Lexer, LexerPlugin};
use pugneum::{LexErrorKind, LexOptions, TokenKind, lex};

fn lex_err(src: &str) -> pugneum::LexError {
    lex(src, &LexOptions::new()).expect_err("should fail to tokenize")
}

// -----------------------------------------------------------
// Token streams.
// -----------------------------------------------------------

#[test]
fn lex_empty_input() {
    assert_eq!(names(""), ["eos"]);
}

#[test]
fn lex_nested_tags() {
    assert_eq!(
        names("ul\n  li a\n  li b\n"),
        [
            "tag", "indent", "tag", "text", "newline", "tag", "text", "outdent", "eos"
        ]
    );
}

#[test]
fn lex_text_strips_one_space() {
    let toks = tokens("p  two spaces");
    assert_eq!(
        toks[1].kind,
        TokenKind::Text {
            val: " two spaces".into()
        }
    );
}

#[test]
fn lex_piped_text() {
    let toks = tokens("| plain");
    assert_eq!(toks[0].kind, TokenKind::Text { val: "plain".into() });
}

#[test]
fn lex_selectors_and_attributes() {
    let toks = tokens("a#main.nav.active(href=\"/\" hidden)");
    assert_eq!(
        toks.iter().map(|t| t.name()).collect::<Vec<_>>(),
        [
            "tag",
            "id",
            "class",
            "class",
            "start-attributes",
            "attribute",
            "attribute",
            "end-attributes",
            "eos"
        ]
    );
    assert_eq!(
        toks[6].kind,
        TokenKind::Attribute {
            name: "hidden".into(),
            val: pugneum::AttrValue::True
        }
    );
}

#[test]
fn lex_positions_are_one_based() {
    let toks = tokens("div\n  span x");
    let span = toks.iter().find(|t| t.name() == "tag" && t.kind.val() == Some("span"));
    let span = span.expect("span tag");
    assert_eq!((span.span.line, span.span.column), (2, 3));
}

#[test]
fn lex_filename_recorded() {
    let toks = lex("p", &LexOptions::new().filename("page.pg")).expect("tokenize");
    assert!(toks.iter().all(|t| t.span.file.as_deref() == Some("page.pg")));
}

#[test]
fn lex_pipeless_text_block() {
    let toks = tokens("p.\n  one\n  two\n");
    assert_eq!(
        toks.iter().map(|t| t.name()).collect::<Vec<_>>(),
        [
            "tag",
            "dot",
            "start-pipeless-text",
            "text",
            "newline",
            "text",
            "end-pipeless-text",
            "eos"
        ]
    );
}

#[test]
fn lex_pipeless_text_is_not_markup() {
    let toks = tokens("script.\n  if (a) { b(); }\n");
    assert!(toks.iter().all(|t| t.name() != "start-attributes"));
    assert!(
        toks.iter()
            .any(|t| t.kind == TokenKind::Text { val: "if (a) { b(); }".into() })
    );
}

#[test]
fn lex_tag_interpolation() {
    assert_eq!(
        names("p a #[em b] c"),
        [
            "tag",
            "text",
            "start-interpolation",
            "tag",
            "text",
            "end-interpolation",
            "text",
            "eos"
        ]
    );
}

#[test]
fn lex_code_interpolation() {
    let toks = tokens("p hi #{name}!");
    assert_eq!(
        toks[2].kind,
        TokenKind::InterpolatedCode {
            val: "name".into(),
            buffer: true,
            must_escape: true
        }
    );
    let toks = tokens("p !{raw}");
    assert!(matches!(
        toks[2].kind,
        TokenKind::InterpolatedCode {
            must_escape: false,
            ..
        }
    ));
}

#[test]
fn lex_inheritance_keywords() {
    assert_eq!(names("extends layout.pg"), ["extends", "path", "eos"]);
    assert_eq!(
        tokens("append scripts")[0].kind,
        TokenKind::Block {
            val: "scripts".into(),
            mode: pugneum::BlockMode::Append
        }
    );
    assert_eq!(
        tokens("block prepend head")[0].kind,
        TokenKind::Block {
            val: "head".into(),
            mode: pugneum::BlockMode::Prepend
        }
    );
}

#[test]
fn lex_include_with_filters() {
    assert_eq!(
        names("include:md:upper notes.md"),
        ["include", "filter", "filter", "path", "eos"]
    );
}

#[test]
fn lex_mixin_and_call() {
    let toks = tokens("mixin card(title, body)\n  p\n+card('a', 'b')");
    assert_eq!(
        toks[0].kind,
        TokenKind::Mixin {
            val: "card".into(),
            args: Some("title, body".into())
        }
    );
    let call = toks
        .iter()
        .find(|t| t.name() == "call")
        .expect("call token");
    assert_eq!(
        call.kind,
        TokenKind::Call {
            val: "card".into(),
            args: Some("'a', 'b'".into())
        }
    );
}

// -----------------------------------------------------------
// Errors.
// -----------------------------------------------------------

#[test]
fn lex_inconsistent_indentation() {
    let err = lex_err("div\n    a\n  b");
    assert_eq!(
        err.kind,
        LexErrorKind::InconsistentIndentation { outer: 0, inner: 4 }
    );
    assert_eq!(err.code(), "PUGNEUM:INCONSISTENT_INDENTATION");
    assert_eq!(err.span.line, 3);
}

#[test]
fn lex_mixed_indentation() {
    let err = lex_err("div\n \tp");
    assert_eq!(err.kind, LexErrorKind::InvalidIndentation);
}

#[test]
fn lex_unclosed_attributes() {
    let err = lex_err("a(href='x'");
    assert_eq!(err.code(), "PUGNEUM:NO_END_BRACKET");
}

#[test]
fn lex_unclosed_tag_interpolation() {
    let err = lex_err("p #[em oops");
    assert_eq!(err.code(), "PUGNEUM:NO_END_BRACKET");
}

#[test]
fn lex_error_message_has_excerpt() {
    let src = "div\n  p ok\n    a\n   b\n";
    let err = lex(src, &LexOptions::new().filename("bad.pg")).expect_err("should fail");
    let message = err.to_string();
    assert!(message.starts_with("bad.pg:4"), "{message}");
    assert!(message.contains("\n  > 4|    b\n"), "{message}");
    assert!(message.ends_with(&err.msg()), "{message}");
}

// -----------------------------------------------------------
// Plugins.
// -----------------------------------------------------------

/// Lexes `@@` as a raw line break.
struct LineBreak;

impl LexerPlugin for LineBreak {
    fn lex(&self, step: LexStep, lexer: &mut Lexer<'_>) -> Result<bool, pugneum::LexError> {
        if step != LexStep::Text || !lexer.rest().starts_with("@@") {
            return Ok(false);
        }
        lexer.emit(TokenKind::TextHtml { val: "<br>".into() }, 2);
        Ok(true)
    }
}

#[test]
fn lex_plugin_runs_before_builtin_step() {
    let plugins: Vec<Box<dyn LexerPlugin>> = vec![Box::new(LineBreak)];
    let toks = lex("@@", &LexOptions::new().plugins(&plugins)).expect("tokenize");
    assert_eq!(toks[0].kind, TokenKind::TextHtml { val: "<br>".into() });
}
