use std::borrow::Cow;

use serde_json::Value;

use logscope_types::{FieldKind, KeyMap, Record};

use super::ast::{CompareOp, Comparison, Expression, Literal, TextMatch};
use super::error::EvalError;

impl Expression {
    /// Evaluate against one record.
    ///
    /// The key map decides how a field is compared: numerically, as a
    /// boolean, or lexically on its text form. A field the record does not
    /// have makes its sub-expression false.
    pub fn apply(&self, record: &Record, keys: &KeyMap) -> Result<bool, EvalError> {
        match self {
            Self::And(left, right) => Ok(left.apply(record, keys)? && right.apply(record, keys)?),
            Self::Or(left, right) => Ok(left.apply(record, keys)? || right.apply(record, keys)?),
            Self::Compare { field, test } => {
                let Some(value) = record.lookup(field) else {
                    return Ok(false);
                };
                compare(field, value, test, keys.kind(field))
            }
            Self::Text { field, test } => {
                if let TextMatch::Regex(pattern) = test {
                    if let Err(reason) = &pattern.compiled {
                        return Err(EvalError::InvalidPattern {
                            pattern: pattern.source.clone(),
                            reason: reason.clone(),
                        });
                    }
                }
                let Some(value) = record.lookup(field) else {
                    return Ok(false);
                };
                let text = text_form(value);
                Ok(match test {
                    TextMatch::Contains(needle) => text.contains(needle.as_str()),
                    TextMatch::Regex(pattern) => pattern
                        .compiled
                        .as_ref()
                        .is_ok_and(|re| re.is_match(&text)),
                })
            }
        }
    }
}

fn compare(
    field: &str,
    value: &Value,
    test: &Comparison,
    kind: Option<FieldKind>,
) -> Result<bool, EvalError> {
    let numeric = match kind {
        Some(FieldKind::Number) => true,
        Some(_) => false,
        None => {
            value.is_number()
                && match test {
                    Comparison::Op(_, lit) => lit.number.is_some(),
                    Comparison::Between(low, high) => {
                        low.number.is_some() && high.number.is_some()
                    }
                }
        }
    };

    if numeric {
        let left = as_number(field, value)?;
        return match test {
            Comparison::Op(op, lit) => Ok(holds(*op, left, literal_number(field, lit)?)),
            Comparison::Between(low, high) => {
                let low = literal_number(field, low)?;
                let high = literal_number(field, high)?;
                Ok(left >= low && left <= high)
            }
        };
    }

    if kind == Some(FieldKind::Boolean) {
        if let Comparison::Op(op, lit) = test {
            if let (true, Some(left), Some(right)) = (op.is_equality(), as_bool(value), lit.boolean())
            {
                return Ok(op.holds(left.cmp(&right)));
            }
        }
    }

    let left = text_form(value);
    Ok(match test {
        Comparison::Op(op, lit) => op.holds(left.as_ref().cmp(lit.text.as_str())),
        Comparison::Between(low, high) => {
            left.as_ref() >= low.text.as_str() && left.as_ref() <= high.text.as_str()
        }
    })
}

fn holds(op: CompareOp, left: f64, right: f64) -> bool {
    left.partial_cmp(&right).is_some_and(|o| op.holds(o))
}

fn as_number(field: &str, value: &Value) -> Result<f64, EvalError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| EvalError::NotNumeric {
        field: field.to_string(),
        value: text_form(value).into_owned(),
    })
}

fn literal_number(field: &str, lit: &Literal) -> Result<f64, EvalError> {
    lit.number.ok_or_else(|| EvalError::NotNumeric {
        field: field.to_string(),
        value: lit.text.clone(),
    })
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Text used for lexical comparison and substring tests: strings as-is,
/// everything else as compact JSON
fn text_form(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}
