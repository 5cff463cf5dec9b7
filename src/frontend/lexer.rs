use super::ParseError;

/// Byte range (and human-readable position of its start) in the source.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    IntLit,
    FloatLit,

    // Keywords
    KwVoid,
    KwChar,
    KwShort,
    KwInt,
    KwLong,
    KwFloat,
    KwDouble,
    KwSigned,
    KwUnsigned,
    KwConst,
    KwVolatile,
    KwStatic,
    KwExtern,
    KwInline,
    KwRestrict,
    KwStruct,
    KwEnum,
    KwTypedef,
    KwIf,
    KwElse,
    KwFor,
    KwWhile,
    KwDo,
    KwSwitch,
    KwCase,
    KwDefault,
    KwBreak,
    KwContinue,
    KwReturn,
    KwGoto,
    KwSizeof,

    // Delimiters
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Dot,
    Arrow,
    Question,
    Colon,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    BangEq,
    AmpAmp,
    PipePipe,
    Shl,
    Shr,
    PlusPlus,
    MinusMinus,
    Eq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    ShlEq,
    ShrEq,

    /// `#pragma scout`, the rest of the line is lexed as regular tokens,
    /// followed by [`TokenKind::PragmaEnd`].
    PragmaStart,
    PragmaEnd,

    Eof,
}

impl TokenKind {
    fn keyword(ident: &str) -> Option<Self> {
        Some(match ident {
            "void" => Self::KwVoid,
            "char" => Self::KwChar,
            "short" => Self::KwShort,
            "int" => Self::KwInt,
            "long" => Self::KwLong,
            "float" => Self::KwFloat,
            "double" => Self::KwDouble,
            "signed" => Self::KwSigned,
            "unsigned" => Self::KwUnsigned,
            "const" => Self::KwConst,
            "volatile" => Self::KwVolatile,
            "static" => Self::KwStatic,
            "extern" => Self::KwExtern,
            "inline" => Self::KwInline,
            "restrict" | "__restrict" => Self::KwRestrict,
            "struct" => Self::KwStruct,
            "enum" => Self::KwEnum,
            "typedef" => Self::KwTypedef,
            "if" => Self::KwIf,
            "else" => Self::KwElse,
            "for" => Self::KwFor,
            "while" => Self::KwWhile,
            "do" => Self::KwDo,
            "switch" => Self::KwSwitch,
            "case" => Self::KwCase,
            "default" => Self::KwDefault,
            "break" => Self::KwBreak,
            "continue" => Self::KwContinue,
            "return" => Self::KwReturn,
            "goto" => Self::KwGoto,
            "sizeof" => Self::KwSizeof,
            _ => return None,
        })
    }

    /// Human-readable description, for error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ident => "identifier",
            Self::IntLit => "integer literal",
            Self::FloatLit => "floating-point literal",
            Self::KwVoid => "void",
            Self::KwChar => "char",
            Self::KwShort => "short",
            Self::KwInt => "int",
            Self::KwLong => "long",
            Self::KwFloat => "float",
            Self::KwDouble => "double",
            Self::KwSigned => "signed",
            Self::KwUnsigned => "unsigned",
            Self::KwConst => "const",
            Self::KwVolatile => "volatile",
            Self::KwStatic => "static",
            Self::KwExtern => "extern",
            Self::KwInline => "inline",
            Self::KwRestrict => "restrict",
            Self::KwStruct => "struct",
            Self::KwEnum => "enum",
            Self::KwTypedef => "typedef",
            Self::KwIf => "if",
            Self::KwElse => "else",
            Self::KwFor => "for",
            Self::KwWhile => "while",
            Self::KwDo => "do",
            Self::KwSwitch => "switch",
            Self::KwCase => "case",
            Self::KwDefault => "default",
            Self::KwBreak => "break",
            Self::KwContinue => "continue",
            Self::KwReturn => "return",
            Self::KwGoto => "goto",
            Self::KwSizeof => "sizeof",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Semi => ";",
            Self::Comma => ",",
            Self::Dot => ".",
            Self::Arrow => "->",
            Self::Question => "?",
            Self::Colon => ":",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Amp => "&",
            Self::Pipe => "|",
            Self::Caret => "^",
            Self::Tilde => "~",
            Self::Bang => "!",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::EqEq => "==",
            Self::BangEq => "!=",
            Self::AmpAmp => "&&",
            Self::PipePipe => "||",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::PlusPlus => "++",
            Self::MinusMinus => "--",
            Self::Eq => "=",
            Self::PlusEq => "+=",
            Self::MinusEq => "-=",
            Self::StarEq => "*=",
            Self::SlashEq => "/=",
            Self::PercentEq => "%=",
            Self::AmpEq => "&=",
            Self::PipeEq => "|=",
            Self::CaretEq => "^=",
            Self::ShlEq => "<<=",
            Self::ShrEq => ">>=",
            Self::PragmaStart => "#pragma scout",
            Self::PragmaEnd => "end of pragma",
            Self::Eof => "end of file",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

pub struct Lexer<'src> {
    source: &'src str,
    pos: usize,
    line: u32,
    column: u32,

    /// Inside a `#pragma scout` line (newlines end it, instead of being whitespace).
    in_pragma: bool,

    /// Only whitespace/comments seen since the last newline (for `#` directives).
    at_line_start: bool,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self { source, pos: 0, line: 1, column: 1, in_pragma: false, at_line_start: true }
    }

    pub fn source(&self) -> &'src str {
        self.source
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.source[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
            self.at_line_start = true;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>, start: Span) -> ParseError {
        ParseError { message: message.into(), span: Span { end: self.pos, ..start } }
    }

    /// Skip whitespace and comments, stopping at a newline inside a pragma.
    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some('\n') if self.in_pragma => return Ok(()),
                Some('\\') if self.in_pragma && self.peek_next() == Some('\n') => {
                    self.advance();
                    self.advance();
                }
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.advance();
                    }
                }
                Some('/') if self.peek_next() == Some('*') => {
                    let start = self.here();
                    self.advance();
                    self.advance();
                    loop {
                        match self.advance() {
                            Some('*') if self.peek() == Some('/') => {
                                self.advance();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(self.error("unterminated block comment", start)),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn here(&self) -> Span {
        Span { start: self.pos, end: self.pos, line: self.line, column: self.column }
    }

    fn make_token(&self, kind: TokenKind, start: Span) -> Token {
        Token { kind, span: Span { end: self.pos, ..start } }
    }

    /// Get the next token from the source.
    pub fn next_token(&mut self) -> Result<Token, ParseError> {
        loop {
            self.skip_trivia()?;
            let start = self.here();

            if self.in_pragma && self.peek().is_none_or(|c| c == '\n') {
                self.in_pragma = false;
                return Ok(self.make_token(TokenKind::PragmaEnd, start));
            }

            if self.peek() == Some('#') {
                if !self.at_line_start {
                    self.advance();
                    return Err(self.error("unexpected `#`", start));
                }
                if let Some(token) = self.directive(start)? {
                    return Ok(token);
                }
                continue;
            }
            self.at_line_start = false;

            let Some(c) = self.advance() else {
                return Ok(self.make_token(TokenKind::Eof, start));
            };

            let kind = match c {
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                '{' => TokenKind::LBrace,
                '}' => TokenKind::RBrace,
                '[' => TokenKind::LBracket,
                ']' => TokenKind::RBracket,
                ';' => TokenKind::Semi,
                ',' => TokenKind::Comma,
                '?' => TokenKind::Question,
                ':' => TokenKind::Colon,
                '~' => TokenKind::Tilde,
                '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => {
                    return self.number(start);
                }
                '.' => TokenKind::Dot,
                '+' => {
                    if self.match_char('+') {
                        TokenKind::PlusPlus
                    } else if self.match_char('=') {
                        TokenKind::PlusEq
                    } else {
                        TokenKind::Plus
                    }
                }
                '-' => {
                    if self.match_char('-') {
                        TokenKind::MinusMinus
                    } else if self.match_char('=') {
                        TokenKind::MinusEq
                    } else if self.match_char('>') {
                        TokenKind::Arrow
                    } else {
                        TokenKind::Minus
                    }
                }
                '*' => if self.match_char('=') { TokenKind::StarEq } else { TokenKind::Star },
                '/' => if self.match_char('=') { TokenKind::SlashEq } else { TokenKind::Slash },
                '%' => {
                    if self.match_char('=') {
                        TokenKind::PercentEq
                    } else {
                        TokenKind::Percent
                    }
                }
                '^' => if self.match_char('=') { TokenKind::CaretEq } else { TokenKind::Caret },
                '!' => if self.match_char('=') { TokenKind::BangEq } else { TokenKind::Bang },
                '=' => if self.match_char('=') { TokenKind::EqEq } else { TokenKind::Eq },
                '&' => {
                    if self.match_char('&') {
                        TokenKind::AmpAmp
                    } else if self.match_char('=') {
                        TokenKind::AmpEq
                    } else {
                        TokenKind::Amp
                    }
                }
                '|' => {
                    if self.match_char('|') {
                        TokenKind::PipePipe
                    } else if self.match_char('=') {
                        TokenKind::PipeEq
                    } else {
                        TokenKind::Pipe
                    }
                }
                '<' => {
                    if self.match_char('<') {
                        if self.match_char('=') { TokenKind::ShlEq } else { TokenKind::Shl }
                    } else if self.match_char('=') {
                        TokenKind::Le
                    } else {
                        TokenKind::Lt
                    }
                }
                '>' => {
                    if self.match_char('>') {
                        if self.match_char('=') { TokenKind::ShrEq } else { TokenKind::Shr }
                    } else if self.match_char('=') {
                        TokenKind::Ge
                    } else {
                        TokenKind::Gt
                    }
                }
                c if c.is_ascii_digit() => return self.number(start),
                c if c.is_ascii_alphabetic() || c == '_' => {
                    while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
                        self.advance();
                    }
                    let ident = &self.source[start.start..self.pos];
                    TokenKind::keyword(ident).unwrap_or(TokenKind::Ident)
                }
                '\'' | '"' => {
                    return Err(
                        self.error("character and string literals are not supported", start)
                    );
                }
                c => return Err(self.error(format!("unexpected character `{c}`"), start)),
            };
            return Ok(self.make_token(kind, start));
        }
    }

    /// Handle a preprocessor line, returning [`TokenKind::PragmaStart`] for
    /// `#pragma scout`, and skipping anything else that can be ignored.
    fn directive(&mut self, start: Span) -> Result<Option<Token>, ParseError> {
        self.advance();
        let line = self.source[self.pos..].lines().next().unwrap_or_default();
        let mut words = line.split_whitespace();
        match words.next() {
            Some("pragma") if words.next() == Some("scout") => {
                // Skip `pragma scout` itself, the rest of the line is tokens.
                let rest = &self.source[self.pos..];
                let skip = rest.find("scout").map_or(0, |i| i + "scout".len());
                for _ in rest[..skip].chars() {
                    self.advance();
                }
                self.in_pragma = true;
                self.at_line_start = false;
                Ok(Some(self.make_token(TokenKind::PragmaStart, start)))
            }
            Some("pragma" | "include") | None => {
                self.skip_line();
                Ok(None)
            }
            Some(directive) => {
                let message = format!("unsupported preprocessor directive `#{directive}`");
                Err(self.error(message, start))
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            if c == '\\' && self.peek_next() == Some('\n') {
                self.advance();
            }
            self.advance();
        }
    }

    fn number(&mut self, start: Span) -> Result<Token, ParseError> {
        let digits_start = start.start;
        let is_hex = self.source[digits_start..].starts_with("0x")
            || self.source[digits_start..].starts_with("0X");
        if is_hex {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.advance();
            }
        } else {
            while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
                self.advance();
            }
            if matches!(self.peek(), Some('e' | 'E')) {
                self.advance();
                if matches!(self.peek(), Some('+' | '-')) {
                    self.advance();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }
        let body = &self.source[digits_start..self.pos];
        let is_float = !is_hex && body.contains(['.', 'e', 'E']);

        // Suffixes.
        while let Some(c) = self.peek().filter(|c| c.is_ascii_alphabetic()) {
            match c {
                'f' | 'F' if is_float => {}
                'l' | 'L' => {}
                'u' | 'U' => return Err(self.error("unsigned literals are not supported", start)),
                _ => return Err(self.error(format!("invalid suffix `{c}` on number"), start)),
            }
            self.advance();
        }

        Ok(self.make_token(if is_float { TokenKind::FloatLit } else { TokenKind::IntLit }, start))
    }
}
