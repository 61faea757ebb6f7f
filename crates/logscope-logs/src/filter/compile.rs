use super::ast::{Comparison, Expression, Literal, Pattern, TextMatch};
use super::error::CompileError;
use super::lexer::{Token, TokenKind, Tokenizer};

/// Deepest parenthesis nesting a query may use
const MAX_NESTING: usize = 256;

/// Compile a filter query. A blank query means "no filter" and yields `None`.
pub fn compile(query: &str) -> Result<Option<Expression>, CompileError> {
    let tokens = Tokenizer::new(query).tokenize()?;
    if tokens.is_empty() {
        return Ok(None);
    }

    let end = query.chars().count();
    let mut parser = Parser::new(tokens, end);
    let expr = parser.parse_or()?;

    if let Some(token) = parser.peek() {
        let message = match token.kind {
            TokenKind::RParen => "unmatched ')'".to_string(),
            ref other => format!("unexpected {} after expression", other.describe()),
        };
        return Err(CompileError::new(token.pos, message));
    }

    Ok(Some(expr))
}

/// Recursive-descent parser over the token stream.
///
/// ```text
/// or        := and (OR and)*
/// and       := primary (AND primary)*
/// primary   := '(' or ')' | condition
/// condition := field op literal
///            | field CONTAINS literal
///            | field MATCH literal
///            | field BETWEEN literal AND literal
/// ```
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Position reported for errors at end of input
    end: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, end: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            end,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned()?;
        self.pos += 1;
        Some(token)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek().is_some_and(|t| &t.kind == kind)
    }

    fn parse_or(&mut self) -> Result<Expression, CompileError> {
        let mut left = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expression::or(left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, CompileError> {
        let mut left = self.parse_primary()?;
        while self.check(&TokenKind::And) {
            self.advance();
            let right = self.parse_primary()?;
            left = Expression::and(left, right);
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expression, CompileError> {
        if self.check(&TokenKind::LParen) {
            let open = self.advance().map(|t| t.pos).unwrap_or(self.end);
            if self.depth >= MAX_NESTING {
                return Err(CompileError::new(open, "expression nested too deeply"));
            }
            self.depth += 1;
            let inner = self.parse_or()?;
            self.depth -= 1;
            if !self.check(&TokenKind::RParen) {
                return Err(CompileError::new(open, "unclosed '('"));
            }
            self.advance();
            return Ok(inner);
        }
        self.parse_condition()
    }

    fn parse_condition(&mut self) -> Result<Expression, CompileError> {
        let field = self.parse_field()?;

        let Some(token) = self.advance() else {
            return Err(CompileError::new(self.end, "expected operator after field"));
        };

        match token.kind {
            TokenKind::Op(op) => {
                let literal = self.parse_literal()?;
                Ok(Expression::Compare {
                    field,
                    test: Comparison::Op(op, literal),
                })
            }
            TokenKind::Contains => {
                let needle = self.parse_literal()?;
                Ok(Expression::Text {
                    field,
                    test: TextMatch::Contains(needle.text),
                })
            }
            TokenKind::Match => {
                let pattern = self.parse_literal()?;
                Ok(Expression::Text {
                    field,
                    test: TextMatch::Regex(Pattern::new(pattern.text)),
                })
            }
            TokenKind::Between => {
                let low = self.parse_literal()?;
                match self.advance() {
                    Some(Token {
                        kind: TokenKind::And,
                        ..
                    }) => {}
                    Some(other) => {
                        return Err(CompileError::new(
                            other.pos,
                            format!("expected AND in BETWEEN, found {}", other.kind.describe()),
                        ));
                    }
                    None => return Err(CompileError::new(self.end, "expected AND in BETWEEN")),
                }
                let high = self.parse_literal()?;
                Ok(Expression::Compare {
                    field,
                    test: Comparison::Between(low, high),
                })
            }
            other => Err(CompileError::new(
                token.pos,
                format!("expected operator after field, found {}", other.describe()),
            )),
        }
    }

    fn parse_field(&mut self) -> Result<String, CompileError> {
        match self.advance() {
            Some(Token {
                kind: TokenKind::Word(name),
                pos,
            }) => {
                if let Some(offset) = name.chars().position(|c| !is_field_char(c)) {
                    return Err(CompileError::new(
                        pos + offset,
                        format!("invalid character in field name '{}'", name),
                    ));
                }
                Ok(name)
            }
            Some(token) => Err(CompileError::new(
                token.pos,
                format!("expected field name, found {}", token.kind.describe()),
            )),
            None => Err(CompileError::new(self.end, "expected field name")),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal, CompileError> {
        match self.advance() {
            Some(Token {
                kind: TokenKind::Word(text),
                ..
            }) => Ok(Literal::new(text, false)),
            Some(Token {
                kind: TokenKind::Str(text),
                ..
            }) => Ok(Literal::new(text, true)),
            Some(token) => Err(CompileError::new(
                token.pos,
                format!("expected value, found {}", token.kind.describe()),
            )),
            None => Err(CompileError::new(self.end, "expected value")),
        }
    }
}

fn is_field_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '.' | '-' | '@' | '$')
}
