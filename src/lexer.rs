/// A token and where it starts in the program text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'a> {
    pub slice: &'a str,
    pub offset: usize,
    pub kind: TokenKind,
}

impl<'a> Token<'a> {
    /// Byte range of the token in the program text.
    pub fn span(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.slice.len()
    }
}

impl<'a> std::fmt::Display for Token<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TokenKind::Eof => write!(f, "<eof>"),
            _ => write!(f, "{}", self.slice),
        }
    }
}

/// Token class, decided by the first character and, for words, the keyword table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind {
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Semicolon,
    Plus,
    Minus,
    Star,
    Slash,
    Equal,
    Hash,
    Question,
    Colon,
    Integer,
    Ident,
    Var,
    Set,
    Func,
    If,
    Else,
    While,
    Return,
    Unknown,
    Eof,
}

impl TokenKind {
    /// Source text of a fixed token, as shown in diagnostics.
    pub fn lexeme(&self) -> &'static str {
        match self {
            TokenKind::LeftParen => "(",
            TokenKind::RightParen => ")",
            TokenKind::LeftBrace => "{",
            TokenKind::RightBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Equal => "=",
            TokenKind::Hash => "#",
            TokenKind::Question => "?",
            TokenKind::Colon => ":",
            TokenKind::Integer => "integer",
            TokenKind::Ident => "identifier",
            TokenKind::Var => "var",
            TokenKind::Set => "set",
            TokenKind::Func => "func",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::Return => "return",
            TokenKind::Unknown => "character",
            TokenKind::Eof => "<eof>",
        }
    }
}

/// Splits program text into tokens.
///
/// The lexer never fails: characters it does not recognise come out as
/// one-character `Unknown` tokens and are rejected by the parser instead.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    rest: &'a str,
    byte: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            rest: input,
            byte: 0,
        }
    }

    /// Returns the next token, or an `Eof` token on every call once the
    /// input is exhausted.
    pub fn next_token(&mut self) -> Token<'a> {
        let trimmed = self.rest.trim_start();
        self.byte += self.rest.len() - trimmed.len();
        self.rest = trimmed;

        let offset = self.byte;
        let Some(c) = self.rest.chars().next() else {
            return Token {
                slice: "",
                offset,
                kind: TokenKind::Eof,
            };
        };

        enum Started {
            Integer,
            Word,
            Single(TokenKind),
        }

        let started = match c {
            '0'..='9' => Started::Integer,
            c if c.is_alphabetic() => Started::Word,
            '(' => Started::Single(TokenKind::LeftParen),
            ')' => Started::Single(TokenKind::RightParen),
            '{' => Started::Single(TokenKind::LeftBrace),
            '}' => Started::Single(TokenKind::RightBrace),
            ',' => Started::Single(TokenKind::Comma),
            ';' => Started::Single(TokenKind::Semicolon),
            '+' => Started::Single(TokenKind::Plus),
            '-' => Started::Single(TokenKind::Minus),
            '*' => Started::Single(TokenKind::Star),
            '/' => Started::Single(TokenKind::Slash),
            '=' => Started::Single(TokenKind::Equal),
            '#' => Started::Single(TokenKind::Hash),
            '?' => Started::Single(TokenKind::Question),
            ':' => Started::Single(TokenKind::Colon),
            _ => Started::Single(TokenKind::Unknown),
        };

        let (len, kind) = match started {
            Started::Integer => {
                let end = self
                    .rest
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(self.rest.len());
                (end, TokenKind::Integer)
            }
            Started::Word => {
                let end = self
                    .rest
                    .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                    .unwrap_or(self.rest.len());
                let kind = match &self.rest[..end] {
                    "var" => TokenKind::Var,
                    "set" => TokenKind::Set,
                    "func" => TokenKind::Func,
                    "if" => TokenKind::If,
                    "else" => TokenKind::Else,
                    "while" => TokenKind::While,
                    "return" => TokenKind::Return,
                    _ => TokenKind::Ident,
                };
                (end, kind)
            }
            Started::Single(kind) => (c.len_utf8(), kind),
        };

        let slice = &self.rest[..len];
        self.rest = &self.rest[len..];
        self.byte += len;

        Token {
            slice,
            offset,
            kind,
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Token {
                kind: TokenKind::Eof,
                ..
            } => None,
            token => Some(token),
        }
    }
}
