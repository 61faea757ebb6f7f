use std::fmt;

use regex::Regex;

/// Comparison operators
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `==`, same meaning as `=`
    StrictEq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::StrictEq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    /// Whether `ordering` (left vs right) satisfies this operator
    pub fn holds(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Eq | Self::StrictEq => ordering == Equal,
            Self::Ne => ordering != Equal,
            Self::Gt => ordering == Greater,
            Self::Gte => ordering != Less,
            Self::Lt => ordering == Less,
            Self::Lte => ordering != Greater,
        }
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, Self::Eq | Self::StrictEq | Self::Ne)
    }
}

/// A literal operand, with its numeric reading precomputed
#[derive(Clone, Debug, PartialEq)]
pub struct Literal {
    pub text: String,
    pub number: Option<f64>,
    pub quoted: bool,
}

impl Literal {
    pub fn new(text: impl Into<String>, quoted: bool) -> Self {
        let text = text.into();
        let number = text.trim().parse::<f64>().ok();
        Self {
            text,
            number,
            quoted,
        }
    }

    pub fn boolean(&self) -> Option<bool> {
        match self.text.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }
}

/// A MATCH pattern, compiled once when the query is compiled
#[derive(Clone, Debug)]
pub struct Pattern {
    pub source: String,
    pub compiled: Result<Regex, String>,
}

impl Pattern {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let compiled = Regex::new(&source).map_err(|e| e.to_string());
        Self { source, compiled }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Value test of a comparison node
#[derive(Clone, Debug, PartialEq)]
pub enum Comparison {
    Op(CompareOp, Literal),
    /// Inclusive on both ends
    Between(Literal, Literal),
}

/// Text test of a text-match node
#[derive(Clone, Debug, PartialEq)]
pub enum TextMatch {
    /// Case-sensitive substring
    Contains(String),
    Regex(Pattern),
}

/// Compiled filter expression
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Compare { field: String, test: Comparison },
    Text { field: String, test: TextMatch },
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
}

impl Expression {
    pub fn and(left: Expression, right: Expression) -> Self {
        Self::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Self::Or(Box::new(left), Box::new(right))
    }

    /// Field names referenced anywhere in the tree, in order of appearance
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Compare { field, .. } | Self::Text { field, .. } => {
                if !out.contains(&field.as_str()) {
                    out.push(field);
                }
            }
            Self::And(l, r) | Self::Or(l, r) => {
                l.collect_fields(out);
                r.collect_fields(out);
            }
        }
    }
}

struct Quoted<'a>(&'a str);

impl fmt::Display for Quoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"")?;
        for ch in self.0.chars() {
            match ch {
                '"' | '\\' => write!(f, "\\{}", ch)?,
                '\n' => f.write_str("\\n")?,
                '\t' => f.write_str("\\t")?,
                _ => write!(f, "{}", ch)?,
            }
        }
        f.write_str("\"")
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.quoted {
            write!(f, "{}", Quoted(&self.text))
        } else {
            f.write_str(&self.text)
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare { field, test } => match test {
                Comparison::Op(op, lit) => write!(f, "{} {} {}", field, op.as_str(), lit),
                Comparison::Between(lo, hi) => write!(f, "{} BETWEEN {} AND {}", field, lo, hi),
            },
            Self::Text { field, test } => match test {
                TextMatch::Contains(needle) => write!(f, "{} CONTAINS {}", field, Quoted(needle)),
                TextMatch::Regex(p) => write!(f, "{} MATCH {}", field, Quoted(&p.source)),
            },
            Self::And(l, r) => {
                // OR binds looser, so it needs parentheses under AND
                for (i, side) in [l, r].into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    if matches!(**side, Self::Or(..)) {
                        write!(f, "({})", side)?;
                    } else {
                        write!(f, "{}", side)?;
                    }
                }
                Ok(())
            }
            Self::Or(l, r) => write!(f, "{} OR {}", l, r),
        }
    }
}
