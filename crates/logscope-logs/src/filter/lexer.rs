use super::ast::CompareOp;
use super::error::CompileError;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TokenKind {
    /// Unquoted word: a field name or a bare literal
    Word(String),
    /// Quoted string literal, escapes resolved
    Str(String),
    Op(CompareOp),
    And,
    Or,
    Contains,
    Between,
    Match,
    LParen,
    RParen,
}

impl TokenKind {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Word(w) => format!("'{}'", w),
            Self::Str(s) => format!("\"{}\"", s),
            Self::Op(op) => format!("'{}'", op.as_str()),
            Self::And => "AND".to_string(),
            Self::Or => "OR".to_string(),
            Self::Contains => "CONTAINS".to_string(),
            Self::Between => "BETWEEN".to_string(),
            Self::Match => "MATCH".to_string(),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Character offset of the token start
    pub pos: usize,
}

pub(crate) struct Tokenizer {
    input: Vec<char>,
    pos: usize,
}

impl Tokenizer {
    pub(crate) fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn read_while<F>(&mut self, predicate: F) -> String
    where
        F: Fn(char) -> bool,
    {
        let mut result = String::new();
        while let Some(ch) = self.peek() {
            if !predicate(ch) {
                break;
            }
            result.push(ch);
            self.pos += 1;
        }
        result
    }

    pub(crate) fn tokenize(mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();
            let start = self.pos;
            let Some(ch) = self.peek() else { break };

            let kind = match ch {
                '(' => {
                    self.advance();
                    TokenKind::LParen
                }
                ')' => {
                    self.advance();
                    TokenKind::RParen
                }
                '"' | '\'' => TokenKind::Str(self.read_quoted(ch)?),
                '=' => {
                    self.advance();
                    if self.peek() == Some('=') {
                        self.advance();
                        TokenKind::Op(CompareOp::StrictEq)
                    } else {
                        TokenKind::Op(CompareOp::Eq)
                    }
                }
                '!' => {
                    self.advance();
                    if self.peek() == Some('=') {
                        self.advance();
                        TokenKind::Op(CompareOp::Ne)
                    } else {
                        return Err(CompileError::new(start, "unknown operator '!'"));
                    }
                }
                '>' | '<' => {
                    self.advance();
                    let or_equal = self.peek() == Some('=');
                    if or_equal {
                        self.advance();
                    }
                    TokenKind::Op(match (ch, or_equal) {
                        ('>', false) => CompareOp::Gt,
                        ('>', true) => CompareOp::Gte,
                        ('<', false) => CompareOp::Lt,
                        _ => CompareOp::Lte,
                    })
                }
                _ => {
                    let word = self.read_while(is_word_char);
                    match word.to_ascii_uppercase().as_str() {
                        "AND" => TokenKind::And,
                        "OR" => TokenKind::Or,
                        "CONTAINS" => TokenKind::Contains,
                        "BETWEEN" => TokenKind::Between,
                        "MATCH" => TokenKind::Match,
                        _ => TokenKind::Word(word),
                    }
                }
            };

            tokens.push(Token { kind, pos: start });
        }

        Ok(tokens)
    }

    /// Read a quoted literal; backslash escapes the next character
    fn read_quoted(&mut self, quote: char) -> Result<String, CompileError> {
        let start = self.pos;
        self.advance();
        let mut result = String::new();

        loop {
            match self.advance() {
                None => return Err(CompileError::new(start, "unterminated string literal")),
                Some('\\') => match self.advance() {
                    Some('n') => result.push('\n'),
                    Some('t') => result.push('\t'),
                    Some(other) => result.push(other),
                    None => {
                        return Err(CompileError::new(start, "unterminated string literal"));
                    }
                },
                Some(ch) if ch == quote => return Ok(result),
                Some(ch) => result.push(ch),
            }
        }
    }
}

fn is_word_char(ch: char) -> bool {
    !ch.is_whitespace() && !matches!(ch, '(' | ')' | '"' | '\'' | '=' | '!' | '<' | '>')
}
