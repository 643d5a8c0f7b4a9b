//! Token types for the pasmhon lexer

use logos::Logos;

use super::LexError;

/// The kind of token produced by the lexer
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[logos(error = LexError)]
#[logos(skip r"[ \t\r\f]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"\\\r?\n")]
pub enum TokenKind {
    // ========== Keywords ==========
    #[token("False")]
    False,
    #[token("None")]
    None,
    #[token("True")]
    True,
    #[token("and")]
    And,
    #[token("as")]
    As,
    #[token("assert")]
    Assert,
    #[token("break")]
    Break,
    #[token("class")]
    Class,
    #[token("continue")]
    Continue,
    #[token("def")]
    Def,
    #[token("del")]
    Del,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("except")]
    Except,
    #[token("finally")]
    Finally,
    #[token("for")]
    For,
    #[token("from")]
    From,
    #[token("global")]
    Global,
    #[token("if")]
    If,
    #[token("import")]
    Import,
    #[token("in")]
    In,
    #[token("is")]
    Is,
    #[token("lambda")]
    Lambda,
    #[token("nonlocal")]
    Nonlocal,
    #[token("not")]
    Not,
    #[token("or")]
    Or,
    #[token("pass")]
    Pass,
    #[token("raise")]
    Raise,
    #[token("return")]
    Return,
    #[token("try")]
    Try,
    #[token("while")]
    While,
    #[token("with")]
    With,
    #[token("yield")]
    Yield,

    // ========== Literals ==========
    #[regex(r"[0-9][0-9_]*")]
    Int,

    #[regex(r"0[xX][0-9a-fA-F_]+")]
    HexInt,

    #[regex(r"0[bB][01_]+")]
    BinaryInt,

    #[regex(r"0[oO][0-7_]+")]
    OctalInt,

    #[regex(r"[0-9][0-9_]*\.[0-9_]*([eE][+-]?[0-9]+)?")]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+")]
    Float,

    /// Single-line string; the lexeme carries the decoded contents
    #[token("\"", |lex| scan_string(lex, '"'))]
    #[token("'", |lex| scan_string(lex, '\''))]
    String,

    /// Triple-quoted string, may span lines
    #[token("\"\"\"", |lex| scan_triple(lex, "\"\"\""))]
    #[token("'''", |lex| scan_triple(lex, "'''"))]
    TripleString,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    // ========== Delimiters ==========
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,
    #[token("->")]
    Arrow,

    // ========== Operators ==========
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    DoubleStar,
    #[token("/")]
    Slash,
    #[token("//")]
    DoubleSlash,
    #[token("%")]
    Percent,
    #[token("<<")]
    LShift,
    #[token(">>")]
    RShift,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,

    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,

    #[token("=")]
    Eq,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("//=")]
    DoubleSlashEq,
    #[token("%=")]
    PercentEq,
    #[token("**=")]
    DoubleStarEq,
    #[token("&=")]
    AmpEq,
    #[token("|=")]
    PipeEq,
    #[token("^=")]
    CaretEq,
    #[token("<<=")]
    LShiftEq,
    #[token(">>=")]
    RShiftEq,

    // ========== Layout ==========
    #[token("\n")]
    Newline,

    /// Increase of indentation at the start of a logical line
    Indent,

    /// Decrease of indentation, one per closed block
    Dedent,

    /// End of file (added by the lexer, not matched by logos)
    Eof,
}

/// Consume a quoted string up to its closing quote, honoring escapes.
fn scan_string(lex: &mut logos::Lexer<'_, TokenKind>, quote: char) -> Result<(), LexError> {
    let rest = lex.remainder();
    let mut escaped = false;
    for (i, c) in rest.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '\n' => {
                lex.bump(i);
                return Err(LexError::UnterminatedString);
            }
            c if c == quote => {
                lex.bump(i + c.len_utf8());
                return Ok(());
            }
            _ => {}
        }
    }
    lex.bump(rest.len());
    Err(LexError::UnterminatedString)
}

fn scan_triple(lex: &mut logos::Lexer<'_, TokenKind>, delimiter: &str) -> Result<(), LexError> {
    let rest = lex.remainder();
    match rest.find(delimiter) {
        Some(end) => {
            lex.bump(end + delimiter.len());
            Ok(())
        }
        None => {
            lex.bump(rest.len());
            Err(LexError::UnterminatedString)
        }
    }
}

impl TokenKind {
    /// Returns true if this token is a keyword
    #[must_use]
    pub const fn is_keyword(&self) -> bool {
        matches!(
            self,
            Self::False
                | Self::None
                | Self::True
                | Self::And
                | Self::As
                | Self::Assert
                | Self::Break
                | Self::Class
                | Self::Continue
                | Self::Def
                | Self::Del
                | Self::Elif
                | Self::Else
                | Self::Except
                | Self::Finally
                | Self::For
                | Self::From
                | Self::Global
                | Self::If
                | Self::Import
                | Self::In
                | Self::Is
                | Self::Lambda
                | Self::Nonlocal
                | Self::Not
                | Self::Or
                | Self::Pass
                | Self::Raise
                | Self::Return
                | Self::Try
                | Self::While
                | Self::With
                | Self::Yield
        )
    }

    /// Returns true for numeric literal tokens
    #[must_use]
    pub const fn is_number(&self) -> bool {
        matches!(
            self,
            Self::Int | Self::HexInt | Self::BinaryInt | Self::OctalInt | Self::Float
        )
    }

    /// Returns true if this token opens a bracketed region
    #[must_use]
    pub const fn is_open_bracket(&self) -> bool {
        matches!(self, Self::LParen | Self::LBracket | Self::LBrace)
    }

    /// Returns true if this token closes a bracketed region
    #[must_use]
    pub const fn is_close_bracket(&self) -> bool {
        matches!(self, Self::RParen | Self::RBracket | Self::RBrace)
    }

    /// Returns true for augmented assignment operators
    #[must_use]
    pub const fn is_augmented_assign(&self) -> bool {
        matches!(
            self,
            Self::PlusEq
                | Self::MinusEq
                | Self::StarEq
                | Self::SlashEq
                | Self::DoubleSlashEq
                | Self::PercentEq
                | Self::DoubleStarEq
                | Self::AmpEq
                | Self::PipeEq
                | Self::CaretEq
                | Self::LShiftEq
                | Self::RShiftEq
        )
    }

    /// A short human-readable description used in diagnostics
    #[must_use]
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::False => "'False'",
            Self::None => "'None'",
            Self::True => "'True'",
            Self::And => "'and'",
            Self::As => "'as'",
            Self::Assert => "'assert'",
            Self::Break => "'break'",
            Self::Class => "'class'",
            Self::Continue => "'continue'",
            Self::Def => "'def'",
            Self::Del => "'del'",
            Self::Elif => "'elif'",
            Self::Else => "'else'",
            Self::Except => "'except'",
            Self::Finally => "'finally'",
            Self::For => "'for'",
            Self::From => "'from'",
            Self::Global => "'global'",
            Self::If => "'if'",
            Self::Import => "'import'",
            Self::In => "'in'",
            Self::Is => "'is'",
            Self::Lambda => "'lambda'",
            Self::Nonlocal => "'nonlocal'",
            Self::Not => "'not'",
            Self::Or => "'or'",
            Self::Pass => "'pass'",
            Self::Raise => "'raise'",
            Self::Return => "'return'",
            Self::Try => "'try'",
            Self::While => "'while'",
            Self::With => "'with'",
            Self::Yield => "'yield'",
            Self::Int | Self::HexInt | Self::BinaryInt | Self::OctalInt => "integer",
            Self::Float => "float",
            Self::String | Self::TripleString => "string",
            Self::Ident => "identifier",
            Self::LParen => "'('",
            Self::RParen => "')'",
            Self::LBracket => "'['",
            Self::RBracket => "']'",
            Self::LBrace => "'{'",
            Self::RBrace => "'}'",
            Self::Comma => "','",
            Self::Colon => "':'",
            Self::Semicolon => "';'",
            Self::Dot => "'.'",
            Self::Arrow => "'->'",
            Self::Plus => "'+'",
            Self::Minus => "'-'",
            Self::Star => "'*'",
            Self::DoubleStar => "'**'",
            Self::Slash => "'/'",
            Self::DoubleSlash => "'//'",
            Self::Percent => "'%'",
            Self::LShift => "'<<'",
            Self::RShift => "'>>'",
            Self::Amp => "'&'",
            Self::Pipe => "'|'",
            Self::Caret => "'^'",
            Self::Tilde => "'~'",
            Self::Lt => "'<'",
            Self::Gt => "'>'",
            Self::Le => "'<='",
            Self::Ge => "'>='",
            Self::EqEq => "'=='",
            Self::NotEq => "'!='",
            Self::Eq => "'='",
            Self::PlusEq => "'+='",
            Self::MinusEq => "'-='",
            Self::StarEq => "'*='",
            Self::SlashEq => "'/='",
            Self::DoubleSlashEq => "'//='",
            Self::PercentEq => "'%='",
            Self::DoubleStarEq => "'**='",
            Self::AmpEq => "'&='",
            Self::PipeEq => "'|='",
            Self::CaretEq => "'^='",
            Self::LShiftEq => "'<<='",
            Self::RShiftEq => "'>>='",
            Self::Newline => "newline",
            Self::Indent => "indent",
            Self::Dedent => "dedent",
            Self::Eof => "end of file",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        TokenKind::lexer(source).filter_map(Result::ok).collect()
    }

    #[test]
    fn keywords_beat_identifiers() {
        assert_eq!(
            kinds("def define None Nonesuch"),
            vec![TokenKind::Def, TokenKind::Ident, TokenKind::None, TokenKind::Ident]
        );
    }

    #[test]
    fn longest_operator_wins() {
        assert_eq!(
            kinds("** **= // //= <<= ->"),
            vec![
                TokenKind::DoubleStar,
                TokenKind::DoubleStarEq,
                TokenKind::DoubleSlash,
                TokenKind::DoubleSlashEq,
                TokenKind::LShiftEq,
                TokenKind::Arrow,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("42 1_000 0xff 0b101 0o17 3.5 2e10 1."),
            vec![
                TokenKind::Int,
                TokenKind::Int,
                TokenKind::HexInt,
                TokenKind::BinaryInt,
                TokenKind::OctalInt,
                TokenKind::Float,
                TokenKind::Float,
                TokenKind::Float,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(kinds("x # trailing"), vec![TokenKind::Ident]);
    }

    #[test]
    fn strings_scan_to_closing_quote() {
        let mut lex = TokenKind::lexer(r#""a\"b" 'c'"#);
        assert_eq!(lex.next(), Some(Ok(TokenKind::String)));
        assert_eq!(lex.slice(), r#""a\"b""#);
        assert_eq!(lex.next(), Some(Ok(TokenKind::String)));
        assert_eq!(lex.slice(), "'c'");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let mut lex = TokenKind::lexer("\"abc\nx");
        assert_eq!(lex.next(), Some(Err(LexError::UnterminatedString)));
    }

    #[test]
    fn triple_quoted_spans_lines() {
        let mut lex = TokenKind::lexer("\"\"\"one\ntwo\"\"\" x");
        assert_eq!(lex.next(), Some(Ok(TokenKind::TripleString)));
        assert_eq!(lex.next(), Some(Ok(TokenKind::Ident)));
    }
}
