use std::fmt::Display;
use std::str::FromStr;

use lazy_static::lazy_static;
use miette::Result;
use regex::Regex;

use crate::error;
use crate::lexer::cursor::Cursor;
use crate::span::{Idx, Span};
use crate::symbol::{DirKind, Flag, InstrKind, Register, TrapKind};

pub mod cursor;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Token { kind, span }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LiteralKind {
    Dec,
    Hex,
    Bin,
    Str,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    Dir(DirKind),
    Instr(InstrKind),
    Trap(TrapKind),
    Reg(Register),
    Lit(LiteralKind),
    Label,
    /// Line terminator; runs of blank lines collapse into one.
    NewLine,
    Eof,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TokenKind::Dir(_) => "directive",
            TokenKind::Instr(_) => "instruction",
            TokenKind::Trap(_) => "trap",
            TokenKind::Reg(_) => "register",
            TokenKind::Lit(LiteralKind::Dec) => "decimal literal",
            TokenKind::Lit(LiteralKind::Hex) => "hex literal",
            TokenKind::Lit(LiteralKind::Bin) => "binary literal",
            TokenKind::Lit(LiteralKind::Str) => "string literal",
            TokenKind::Label => "label",
            TokenKind::NewLine => "newline",
            TokenKind::Eof => "end of file",
        };
        f.write_str(name)
    }
}

/// Turn source text into a token stream, always terminated by [`TokenKind::Eof`].
pub fn tokenize(src: &'static str) -> Result<Vec<Token>> {
    let mut cur = Cursor::new(src);
    let mut toks = Vec::new();
    loop {
        let tok = cur.advance_token()?;
        if tok.kind == TokenKind::Eof {
            toks.push(tok);
            return Ok(toks);
        }
        // Blank lines carry no information for either pass
        if tok.kind == TokenKind::NewLine
            && toks.last().map_or(true, |t: &Token| t.kind == TokenKind::NewLine)
        {
            continue;
        }
        toks.push(tok);
    }
}

/// Contents of a string literal token with escape sequences applied.
///
/// `raw` includes the opening quote and, when the literal was closed before
/// the end of its line, the closing quote. Escapes were validated during
/// lexing.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.strip_prefix('"').unwrap_or(raw).chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => break,
            '\\' => match chars.next() {
                Some('0') => out.push('\0'),
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some('e') => out.push('\x1b'),
                // Rejected during lexing
                _ => (),
            },
            _ => out.push(c),
        }
    }
    out
}

lazy_static! {
    // Numeric literal patterns. Prefix characters and digits are
    // case-insensitive; the sign sits after the radix prefix.
    static ref HEX: Regex = Regex::new(r"(?i)^x-?[0-9a-f]+$").unwrap();
    static ref BIN: Regex = Regex::new(r"(?i)^b-?[01]+$").unwrap();
    static ref DEC: Regex = Regex::new(r"^#-?[0-9]+$").unwrap();
}

impl Cursor<'static> {
    pub fn advance_token(&mut self) -> Result<Token> {
        loop {
            // Commas count as plain separators
            self.take_while(|c| matches!(c, ' ' | '\t' | '\r' | ','));
            if self.is_eof() {
                return Ok(Token::new(TokenKind::Eof, Span::dummy()));
            }
            if self.first() == ';' {
                self.take_while(|c| c != '\n');
                continue;
            }
            break;
        }

        let start = self.pos();
        let kind = match self.first() {
            '\n' => {
                self.take_while(|c| matches!(c, '\n' | '\r' | ' ' | '\t' | ','));
                TokenKind::NewLine
            }
            '"' => self.string_literal()?,
            '.' => self.directive()?,
            _ => self.ident(),
        };
        let len = self.pos() - start;
        Ok(Token::new(kind, Span::new(Idx(start as u32), len as u16)))
    }

    fn string_literal(&mut self) -> Result<TokenKind> {
        // Opening quote
        self.bump();
        loop {
            // A newline also terminates the literal; the missing closing
            // quote is tolerated.
            if self.is_eof() || self.first() == '\n' {
                break;
            }
            match self.bump() {
                Some('"') => break,
                Some('\\') => {
                    let esc_at = self.pos() - 1;
                    match self.bump() {
                        Some('0' | 'n' | 'r' | '"' | '\\' | 'e') => (),
                        _ => {
                            let span = Span::new(Idx(esc_at as u32), 2);
                            return Err(error::lex_unknown_escape(span, self.src()));
                        }
                    }
                }
                _ => (),
            }
        }
        Ok(TokenKind::Lit(LiteralKind::Str))
    }

    fn directive(&mut self) -> Result<TokenKind> {
        let start = self.pos();
        // '.' then the directive word
        self.bump();
        self.take_while(|c| c.is_ascii_alphanumeric());
        let word = self.src()[start..self.pos()].to_ascii_lowercase();

        // Prefix match, as the original assembler treats these
        let kind = if word.starts_with(".orig") {
            DirKind::Orig
        } else if word.starts_with(".fill") {
            DirKind::Fill
        } else if word.starts_with(".stringz") {
            DirKind::Stringz
        } else if word.starts_with(".blkw") {
            DirKind::Blkw
        } else if word.starts_with(".end") {
            DirKind::End
        } else {
            let span = Span::new(Idx(start as u32), (self.pos() - start) as u16);
            return Err(error::lex_invalid_dir(span, self.src()));
        };
        Ok(TokenKind::Dir(kind))
    }

    fn ident(&mut self) -> TokenKind {
        let start = self.pos();
        self.take_while(|c| !matches!(c, ' ' | '\t' | '\r' | ',' | '\n' | ';' | '"'));
        classify(&self.src()[start..self.pos()])
    }
}

/// Classify a bare identifier: opcode, then register, then numeric literal,
/// then label.
fn classify(text: &str) -> TokenKind {
    let lower = text.to_ascii_lowercase();
    if let Some(kind) = opcode(&lower) {
        return kind;
    }
    if let Some(reg) = register(&lower) {
        return TokenKind::Reg(reg);
    }
    if HEX.is_match(text) {
        return TokenKind::Lit(LiteralKind::Hex);
    }
    if BIN.is_match(text) {
        return TokenKind::Lit(LiteralKind::Bin);
    }
    if DEC.is_match(text) {
        return TokenKind::Lit(LiteralKind::Dec);
    }
    TokenKind::Label
}

fn opcode(lower: &str) -> Option<TokenKind> {
    use TokenKind::{Instr, Trap};
    let kind = match lower {
        "add" => Instr(InstrKind::Add),
        "and" => Instr(InstrKind::And),
        "not" => Instr(InstrKind::Not),
        "ld" => Instr(InstrKind::Ld),
        "ldi" => Instr(InstrKind::Ldi),
        "ldr" => Instr(InstrKind::Ldr),
        "lea" => Instr(InstrKind::Lea),
        "st" => Instr(InstrKind::St),
        "sti" => Instr(InstrKind::Sti),
        "str" => Instr(InstrKind::Str),
        "jmp" => Instr(InstrKind::Jmp),
        "ret" => Instr(InstrKind::Ret),
        "rti" => Instr(InstrKind::Rti),
        "jsr" => Instr(InstrKind::Jsr),
        "jsrr" => Instr(InstrKind::Jsrr),
        "br" | "brnzp" => Instr(InstrKind::Br(Flag::Nzp)),
        "brn" => Instr(InstrKind::Br(Flag::N)),
        "brz" => Instr(InstrKind::Br(Flag::Z)),
        "brp" => Instr(InstrKind::Br(Flag::P)),
        "brnz" => Instr(InstrKind::Br(Flag::Nz)),
        "brnp" => Instr(InstrKind::Br(Flag::Np)),
        "brzp" => Instr(InstrKind::Br(Flag::Zp)),
        "trap" => Trap(TrapKind::Trap),
        "getc" => Trap(TrapKind::Getc),
        "out" => Trap(TrapKind::Out),
        "puts" => Trap(TrapKind::Puts),
        "in" => Trap(TrapKind::In),
        "putsp" => Trap(TrapKind::Putsp),
        "halt" => Trap(TrapKind::Halt),
        _ => return None,
    };
    Some(kind)
}

fn register(lower: &str) -> Option<Register> {
    let digits = lower.strip_prefix('r')?;
    Register::from_str(digits).ok()
}

#[cfg(test)]
mod test {
    use super::*;

    fn kinds(src: &'static str) -> Vec<TokenKind> {
        tokenize(src).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn ends_with_eof() {
        assert_eq!(kinds("").last(), Some(&TokenKind::Eof));
        assert_eq!(kinds("add r0 r1 #2").last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn lex_directives() {
        assert_eq!(
            kinds(".orig x3000\nhalt\n.end"),
            vec![
                TokenKind::Dir(DirKind::Orig),
                TokenKind::Lit(LiteralKind::Hex),
                TokenKind::NewLine,
                TokenKind::Trap(TrapKind::Halt),
                TokenKind::NewLine,
                TokenKind::Dir(DirKind::End),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_directive_case_insensitive() {
        assert_eq!(kinds(".STRINGZ")[0], TokenKind::Dir(DirKind::Stringz));
        assert_eq!(kinds(".Blkw")[0], TokenKind::Dir(DirKind::Blkw));
    }

    #[test]
    fn lex_invalid_directive() {
        assert!(tokenize(".bogus x3000").is_err());
    }

    #[test]
    fn lex_commas_are_separators() {
        assert_eq!(
            kinds("add r0, r1, #5"),
            vec![
                TokenKind::Instr(InstrKind::Add),
                TokenKind::Reg(Register::R0),
                TokenKind::Reg(Register::R1),
                TokenKind::Lit(LiteralKind::Dec),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_comment_produces_no_token() {
        assert_eq!(
            kinds("add r0 r0 #1 ; increment\nret"),
            vec![
                TokenKind::Instr(InstrKind::Add),
                TokenKind::Reg(Register::R0),
                TokenKind::Reg(Register::R0),
                TokenKind::Lit(LiteralKind::Dec),
                TokenKind::NewLine,
                TokenKind::Instr(InstrKind::Ret),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_newline_runs_collapse() {
        assert_eq!(
            kinds("foo\n\n\n   \nbar"),
            vec![
                TokenKind::Label,
                TokenKind::NewLine,
                TokenKind::Label,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn classify_opcodes() {
        assert_eq!(classify("ADD"), TokenKind::Instr(InstrKind::Add));
        assert_eq!(classify("br"), TokenKind::Instr(InstrKind::Br(Flag::Nzp)));
        assert_eq!(
            classify("BRzp"),
            TokenKind::Instr(InstrKind::Br(Flag::Zp))
        );
        assert_eq!(classify("putsp"), TokenKind::Trap(TrapKind::Putsp));
        assert_eq!(classify("TRAP"), TokenKind::Trap(TrapKind::Trap));
    }

    #[test]
    fn classify_registers() {
        assert_eq!(classify("r0"), TokenKind::Reg(Register::R0));
        assert_eq!(classify("R7"), TokenKind::Reg(Register::R7));
        // r8 does not exist, nor does a bare digit list
        assert_eq!(classify("r8"), TokenKind::Label);
        assert_eq!(classify("r01"), TokenKind::Label);
    }

    #[test]
    fn classify_literals() {
        assert_eq!(classify("x3000"), TokenKind::Lit(LiteralKind::Hex));
        assert_eq!(classify("X-3f"), TokenKind::Lit(LiteralKind::Hex));
        assert_eq!(classify("b101"), TokenKind::Lit(LiteralKind::Bin));
        assert_eq!(classify("B-01"), TokenKind::Lit(LiteralKind::Bin));
        assert_eq!(classify("#42"), TokenKind::Lit(LiteralKind::Dec));
        assert_eq!(classify("#-1"), TokenKind::Lit(LiteralKind::Dec));
    }

    #[test]
    fn classify_labels() {
        assert_eq!(classify("main"), TokenKind::Label);
        // Broken literals fall through to labels
        assert_eq!(classify("xg1"), TokenKind::Label);
        assert_eq!(classify("b102"), TokenKind::Label);
        assert_eq!(classify("adder"), TokenKind::Label);
    }

    #[test]
    fn lex_string_literal() {
        let toks = tokenize(r#".stringz "hey there""#).unwrap();
        assert_eq!(toks[1].kind, TokenKind::Lit(LiteralKind::Str));
    }

    #[test]
    fn lex_string_unterminated_is_tolerated() {
        assert_eq!(
            kinds("\"oops\nadd"),
            vec![
                TokenKind::Lit(LiteralKind::Str),
                TokenKind::NewLine,
                TokenKind::Instr(InstrKind::Add),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_string_bad_escape() {
        assert!(tokenize(r#""bad \q escape""#).is_err());
    }

    #[test]
    fn unescape_sequences() {
        assert_eq!(unescape(r#""a\n\"\\\e\0\r""#), "a\n\"\\\x1b\0\r");
        assert_eq!(unescape(r#""plain""#), "plain");
        // Unterminated literal has no closing quote to strip
        assert_eq!(unescape("\"open"), "open");
    }
}
