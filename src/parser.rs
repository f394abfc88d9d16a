use std::fmt::Display;
use std::iter::Peekable;
use std::vec::IntoIter;

use miette::Result;

use crate::error;
use crate::lexer::{self, LiteralKind, Token, TokenKind};
use crate::span::Span;
use crate::symbol::{self, DirKind, InstrKind, Register, TrapKind};

/// Bit-width bound for numeric literal operands.
///
/// A field of width `n` accepts anything that is encodable in `n` bits, in
/// either signedness: `[-2^(n-1), 2^n)`.
#[derive(Clone, Copy)]
pub enum Bits {
    Either(u8),
    /// Non-negative values only: `[0, 2^n)`.
    Unsigned(u8),
}

impl Bits {
    fn contains(self, val: i32) -> bool {
        match self {
            Bits::Either(n) => val >= -(1 << (n - 1)) && val < (1 << n),
            Bits::Unsigned(n) => val >= 0 && val < (1 << n),
        }
    }
}

impl Display for Bits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (Bits::Either(n) | Bits::Unsigned(n)) = self;
        f.write_str(&n.to_string())
    }
}

/// Last operand of ADD/AND: a source register or an inline constant.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RegOrImm {
    Reg(Register),
    Imm(i32),
}

impl RegOrImm {
    /// Low six bits of ADD/AND: the mode bit plus a register or imm5.
    pub fn bits(&self) -> u16 {
        match self {
            Self::Reg(reg) => *reg as u16,
            Self::Imm(val) => 0b100000 | (*val as u16 & 0b11111),
        }
    }
}

/// Cursor over the lexed token stream with typed operand checks. Both
/// assembler passes walk the stream through one of these.
pub struct TokenStream {
    /// Reference to the source file
    src: &'static str,
    toks: Peekable<IntoIter<Token>>,
}

impl TokenStream {
    pub fn new(src: &'static str, toks: Vec<Token>) -> Self {
        TokenStream {
            src,
            toks: toks.into_iter().peekable(),
        }
    }

    pub fn src(&self) -> &'static str {
        self.src
    }

    pub fn text(&self, tok: &Token) -> &'static str {
        &self.src[tok.span.as_range()]
    }

    /// Next token; the stream keeps yielding [`TokenKind::Eof`] once drained.
    pub fn next(&mut self) -> Token {
        self.toks
            .next()
            .unwrap_or(Token::new(TokenKind::Eof, Span::dummy()))
    }

    pub fn peek(&mut self) -> TokenKind {
        self.toks.peek().map_or(TokenKind::Eof, |tok| tok.kind)
    }

    fn expect_where(
        &mut self,
        check: impl Fn(&TokenKind) -> bool,
        expected: &str,
    ) -> Result<Token> {
        let tok = self.next();
        if check(&tok.kind) {
            Ok(tok)
        } else if tok.kind == TokenKind::Eof {
            Err(error::parse_eof(self.src))
        } else {
            Err(error::parse_unexpected(self.src, tok, expected))
        }
    }

    pub fn expect_reg(&mut self) -> Result<Register> {
        match self
            .expect_where(|kind| matches!(kind, TokenKind::Reg(_)), "register")?
            .kind
        {
            TokenKind::Reg(reg) => Ok(reg),
            _ => unreachable!(),
        }
    }

    pub fn expect_label(&mut self) -> Result<Token> {
        self.expect_where(|kind| *kind == TokenKind::Label, "label")
    }

    pub fn expect_str(&mut self) -> Result<Token> {
        self.expect_where(
            |kind| *kind == TokenKind::Lit(LiteralKind::Str),
            "string literal",
        )
    }

    /// Numeric literal operand, checked against the field bound.
    pub fn expect_lit(&mut self, bits: Bits) -> Result<i32> {
        let tok = self.expect_where(
            |kind| {
                matches!(
                    kind,
                    TokenKind::Lit(LiteralKind::Dec | LiteralKind::Hex | LiteralKind::Bin)
                )
            },
            "numeric literal",
        )?;
        let val = self.lit_value(&tok)?;
        if bits.contains(val) {
            Ok(val)
        } else {
            Err(error::parse_lit_range(tok.span, self.src, bits))
        }
    }

    pub fn expect_lit_or_reg(&mut self, bits: Bits) -> Result<RegOrImm> {
        match self.peek() {
            TokenKind::Reg(_) => Ok(RegOrImm::Reg(self.expect_reg()?)),
            TokenKind::Lit(_) => Ok(RegOrImm::Imm(self.expect_lit(bits)?)),
            TokenKind::Eof => Err(error::parse_eof(self.src)),
            _ => {
                let tok = self.next();
                Err(error::parse_unexpected(
                    self.src,
                    tok,
                    "register or numeric literal",
                ))
            }
        }
    }

    /// Value of a numeric literal token, widened so that bound checks can
    /// happen in one signed domain.
    pub fn lit_value(&self, tok: &Token) -> Result<i32> {
        let text = self.text(tok);
        let radix = match tok.kind {
            TokenKind::Lit(LiteralKind::Dec) => 10,
            TokenKind::Lit(LiteralKind::Hex) => 16,
            TokenKind::Lit(LiteralKind::Bin) => 2,
            _ => unreachable!("lit_value called on non-numeric token"),
        };
        // Strip the radix prefix; the sign stays with the digits
        i32::from_str_radix(&text[1..], radix)
            .map_err(|e| error::parse_bad_lit(tok.span, self.src, e))
    }
}

/// First assembler pass: walks the token stream checking operand shapes and
/// assigning an address to every label.
pub struct SymbolPass {
    toks: TokenStream,
    /// Location counter; only defined inside an .orig/.end block.
    lc: Option<u16>,
    orig_seen: bool,
}

impl SymbolPass {
    pub fn new(src: &'static str, toks: Vec<Token>) -> Self {
        SymbolPass {
            toks: TokenStream::new(src, toks),
            lc: None,
            orig_seen: false,
        }
    }

    /// Build the symbol table. Consumes self as the stream is spent.
    pub fn run(mut self) -> Result<()> {
        loop {
            let tok = self.toks.next();
            match tok.kind {
                TokenKind::Dir(DirKind::Orig) => {
                    if self.orig_seen {
                        return Err(error::parse_second_orig(tok.span, self.toks.src()));
                    }
                    self.orig_seen = true;
                    let addr = self.toks.expect_lit(Bits::Either(16))?;
                    self.lc = Some(addr as u16);
                }
                TokenKind::Dir(DirKind::End) => self.lc = None,
                TokenKind::Dir(DirKind::Blkw) => {
                    let len = self.toks.expect_lit(Bits::Unsigned(16))?;
                    self.bump_lc(tok.span, len as u16)?;
                }
                TokenKind::Dir(DirKind::Stringz) => {
                    let lit = self.toks.expect_str()?;
                    let len = lexer::unescape(self.toks.text(&lit)).chars().count() + 1;
                    self.bump_lc(tok.span, len as u16)?;
                }
                TokenKind::Dir(DirKind::Fill) => {
                    // Either an absolute label address or a raw value
                    match self.toks.peek() {
                        TokenKind::Label => {
                            self.toks.next();
                        }
                        _ => {
                            self.toks.expect_lit(Bits::Either(16))?;
                        }
                    }
                    self.bump_lc(tok.span, 1)?;
                }
                TokenKind::Label => {
                    let Some(lc) = self.lc else {
                        return Err(error::parse_outside_block(tok.span, self.toks.src()));
                    };
                    if !symbol::insert(self.toks.text(&tok), lc) {
                        return Err(error::parse_duplicate_label(tok.span, self.toks.src()));
                    }
                }
                TokenKind::Instr(kind) => {
                    self.check_instr(kind)?;
                    self.bump_lc(tok.span, 1)?;
                }
                TokenKind::Trap(kind) => {
                    if kind == TrapKind::Trap {
                        self.toks.expect_lit(Bits::Unsigned(12))?;
                    }
                    self.bump_lc(tok.span, 1)?;
                }
                TokenKind::NewLine => continue,
                TokenKind::Eof => break,
                TokenKind::Lit(_) | TokenKind::Reg(_) => {
                    return Err(error::parse_unexpected(
                        self.toks.src(),
                        tok,
                        "label, instruction, or directive",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Operand shapes per instruction; values are rechecked and packed by the
    /// second pass.
    fn check_instr(&mut self, kind: InstrKind) -> Result<()> {
        match kind {
            InstrKind::Add | InstrKind::And => {
                self.toks.expect_reg()?;
                self.toks.expect_reg()?;
                self.toks.expect_lit_or_reg(Bits::Either(5))?;
            }
            InstrKind::Not => {
                self.toks.expect_reg()?;
                self.toks.expect_reg()?;
            }
            InstrKind::Br(_) | InstrKind::Jsr => {
                self.toks.expect_label()?;
            }
            InstrKind::Jmp | InstrKind::Jsrr => {
                self.toks.expect_reg()?;
            }
            InstrKind::Ld
            | InstrKind::Ldi
            | InstrKind::Lea
            | InstrKind::St
            | InstrKind::Sti => {
                self.toks.expect_reg()?;
                self.toks.expect_label()?;
            }
            InstrKind::Ldr | InstrKind::Str => {
                self.toks.expect_reg()?;
                self.toks.expect_reg()?;
                self.toks.expect_lit(Bits::Either(6))?;
            }
            InstrKind::Ret | InstrKind::Rti => (),
        }
        Ok(())
    }

    fn bump_lc(&mut self, span: Span, words: u16) -> Result<()> {
        match self.lc {
            Some(lc) => {
                self.lc = Some(lc.wrapping_add(words));
                Ok(())
            }
            None => Err(error::parse_outside_block(span, self.toks.src())),
        }
    }
}
