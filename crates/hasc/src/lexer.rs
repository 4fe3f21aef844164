//! Tokenizer for the HAS surface syntax.
//!
//! Number literals come in four spellings: decimal `123`, C hex `0xFF`,
//! Motorola hex `$FF` and binary `%1010`. The binary form shares its sigil
//! with the modulo operator; the lexer resolves that by longest match, so
//! `%1010` is a literal while `x % 2` is an operation.
//!
//! Size suffixes (`.b`/`.w`/`.l`) are deliberately *not* a token of their
//! own: `pos.b` must stay a member access on a field named `b`. The parser
//! recognizes `.` + letter in declaration position instead.

use logos::Logos;

use crate::error::SyntaxError;

fn parse_dec(slice: &str) -> Option<i64> {
    slice.parse().ok()
}

fn parse_hex(slice: &str, prefix_len: usize) -> Option<i64> {
    i64::from_str_radix(&slice[prefix_len..], 16).ok()
}

fn parse_bin(slice: &str) -> Option<i64> {
    i64::from_str_radix(&slice[1..], 2).ok()
}

/// Strips the surrounding quotes; the inner text is kept raw so escape
/// sequences pass through to the assembler untouched.
fn string_body(slice: &str) -> String {
    slice[1..slice.len() - 1].to_owned()
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    // section headers
    #[token("data")]
    Data,
    #[token("data_chip")]
    DataChip,
    #[token("bss")]
    Bss,
    #[token("bss_chip")]
    BssChip,
    #[token("code")]
    Code,
    #[token("code_chip")]
    CodeChip,

    // declarations
    #[token("proc")]
    Proc,
    #[token("func")]
    Func,
    #[token("extern")]
    Extern,
    #[token("public")]
    Public,
    #[token("const")]
    Const,
    #[token("macro")]
    Macro,
    #[token("struct")]
    Struct,
    #[token("var")]
    Var,
    #[token("__reg")]
    RegMarker,

    // statements
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("for")]
    For,
    #[token("to")]
    To,
    #[token("by")]
    By,
    #[token("repeat")]
    Repeat,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("return")]
    Return,
    #[token("call")]
    Call,
    #[token("asm")]
    Asm,
    #[token("PUSH")]
    Push,
    #[token("POP")]
    Pop,
    #[token("GetReg")]
    GetReg,
    #[token("SetReg")]
    SetReg,

    // directives
    #[token("#warning")]
    HashWarning,
    #[token("#error")]
    HashError,
    #[token("#pragma")]
    HashPragma,
    #[token("#include")]
    HashInclude,
    #[token("@python")]
    AtPython,
    #[token("@template")]
    AtTemplate,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_owned())]
    Ident(String),

    #[regex(r"0x[0-9a-fA-F]+", |lex| parse_hex(lex.slice(), 2))]
    #[regex(r"\$[0-9a-fA-F]+", |lex| parse_hex(lex.slice(), 1))]
    #[regex(r"%[01]+", |lex| parse_bin(lex.slice()))]
    #[regex(r"[0-9]+", |lex| parse_dec(lex.slice()))]
    Number(i64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| string_body(lex.slice()))]
    Str(String),

    // compound assignment
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    MulAssign,
    #[token("/=")]
    DivAssign,
    #[token("%=")]
    ModAssign,
    #[token("&=")]
    AndAssign,
    #[token("|=")]
    OrAssign,
    #[token("^=")]
    XorAssign,

    // operators
    #[token("||")]
    OrOr,
    #[token("&&")]
    AndAnd,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LessEq,
    #[token(">=")]
    GreaterEq,
    #[token("<<")]
    ShiftLeft,
    #[token(">>")]
    ShiftRight,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("->")]
    Arrow,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("!")]
    Bang,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("=")]
    Assign,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
}

/// A token plus the byte range it came from.
pub type Spanned = (Token, std::ops::Range<usize>);

/// Converts a byte offset into a 1-based (line, column) pair.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let clamped = offset.min(source.len());
    let before = &source[..clamped];
    let line = before.bytes().filter(|&b| b == b'\n').count() + 1;
    let column = before.rfind('\n').map_or(clamped + 1, |nl| clamped - nl);
    (line, column)
}

/// Tokenizes a whole source text, failing on the first unexpected character.
pub fn lex(source: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                let (line, column) = line_col(source, span.start);
                let found = source[span.clone()].chars().next().unwrap_or('?');
                return Err(SyntaxError::new(line, column, format!("unexpected character '{found}'")));
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        lex(source).expect("lex").into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn number_literals_support_four_bases() {
        assert_eq!(
            kinds("123 0xFF $FF %1010"),
            vec![Token::Number(123), Token::Number(255), Token::Number(255), Token::Number(10)]
        );
    }

    #[test]
    fn binary_literal_wins_over_modulo_by_longest_match() {
        assert_eq!(kinds("%1010"), vec![Token::Number(10)]);
        assert_eq!(
            kinds("x % 2"),
            vec![Token::Ident("x".to_owned()), Token::Percent, Token::Number(2)]
        );
    }

    #[test]
    fn keywords_do_not_swallow_identifiers() {
        assert_eq!(
            kinds("data datax"),
            vec![Token::Data, Token::Ident("datax".to_owned())]
        );
        assert_eq!(kinds("data_chip"), vec![Token::DataChip]);
    }

    #[test]
    fn size_suffix_lexes_as_dot_plus_ident() {
        assert_eq!(
            kinds("table.w"),
            vec![Token::Ident("table".to_owned()), Token::Dot, Token::Ident("w".to_owned())]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(kinds("1 // two\n3"), vec![Token::Number(1), Token::Number(3)]);
    }

    #[test]
    fn strings_keep_raw_bodies() {
        assert_eq!(kinds(r#""hello\n""#), vec![Token::Str("hello\\n".to_owned())]);
    }

    #[test]
    fn unexpected_character_reports_position() {
        let err = lex("x = `").expect_err("backtick is not HAS");
        assert_eq!((err.line, err.column), (1, 5));
    }
}
