use std::num::ParseIntError;

use miette::{miette, LabeledSpan, Report, Severity};

use crate::lexer::Token;
use crate::parser::Bits;
use crate::span::Span;

// Lexer errors

pub fn lex_invalid_dir(span: Span, src: &'static str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "lex::dir",
        help = "valid directives are .orig, .fill, .stringz, .blkw, and .end",
        labels = vec![LabeledSpan::at(span, "incorrect directive")],
        "Encountered an invalid directive.",
    )
    .with_source_code(src)
}

pub fn lex_unknown_escape(span: Span, src: &'static str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "lex::escape",
        help = r#"valid escape sequences are \0, \n, \r, \", \\, and \e"#,
        labels = vec![LabeledSpan::at(span, "unknown escape")],
        "Encountered an unknown escape sequence in string literal.",
    )
    .with_source_code(src)
}

// First pass errors

pub fn parse_bad_lit(span: Span, src: &'static str, e: ParseIntError) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::bad_lit",
        help = "numeric literals look like #13, xFD02, or b-101",
        labels = vec![LabeledSpan::at(span, "incorrect literal")],
        "Encountered an invalid literal: {e}",
    )
    .with_source_code(src)
}

pub fn parse_lit_range(span: Span, src: &'static str, bits: Bits) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::lit_range",
        help = format!("this operand expects a literal that fits in {bits} bits"),
        labels = vec![LabeledSpan::at(span, "out-of-range literal")],
        "Found numeric literal of incorrect size",
    )
    .with_source_code(src)
}

pub fn parse_unexpected(src: &'static str, found: Token, expected: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::unexpected_token",
        help = "check the operands allowed for this instruction or directive",
        labels = vec![LabeledSpan::at(found.span, "unexpected token")],
        "Expected token of type {expected}, found {}",
        found.kind
    )
    .with_source_code(src)
}

pub fn parse_eof(src: &'static str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::unexpected_eof",
        help = "you may be missing operands in your last statement",
        labels = vec![LabeledSpan::at_offset(
            src.len().saturating_sub(1),
            "unexpected end of file"
        )],
        "Unexpected end of file",
    )
    .with_source_code(src)
}

pub fn parse_duplicate_label(span: Span, src: &'static str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::duplicate_label",
        help = "labels can only be defined once per file",
        labels = vec![LabeledSpan::at(span, "duplicate label")],
        "Duplicate label",
    )
    .with_source_code(src)
}

pub fn parse_outside_block(span: Span, src: &'static str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::outside_block",
        help = "code and labels must sit between an .orig directive and .end",
        labels = vec![LabeledSpan::at(span, "no address for this statement")],
        "Statement outside of an .orig/.end block",
    )
    .with_source_code(src)
}

pub fn parse_second_orig(span: Span, src: &'static str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::second_orig",
        help = "the object format holds a single contiguous image; \
                keep one .orig/.end block per file",
        labels = vec![LabeledSpan::at(span, "second .orig")],
        "Multi-segment programs are not supported",
    )
    .with_source_code(src)
}

// Second pass errors

pub fn encode_undefined_label(span: Span, src: &'static str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "encode::undefined_label",
        help = "every referenced label needs a definition somewhere in the file",
        labels = vec![LabeledSpan::at(span, "undefined label")],
        "Reference to undefined label",
    )
    .with_source_code(src)
}

pub fn encode_offset_range(span: Span, src: &'static str, bits: u32) -> Report {
    miette!(
        severity = Severity::Error,
        code = "encode::offset_range",
        help = format!(
            "the distance to this label must fit in a signed {bits}-bit offset"
        ),
        labels = vec![LabeledSpan::at(span, "label is too far away")],
        "Label reference out of range",
    )
    .with_source_code(src)
}
