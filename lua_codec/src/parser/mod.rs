//! Decoding of serialized tables and scalar literals.
//!
//! Parsing happens in two steps. [`parse_value`] builds a [`RawValue`] that
//! keeps table keys exactly as the remote side wrote them; [`decode`] then
//! normalizes tables into lists (keys `1..=n`) or string-keyed maps.

use crate::encode::encode_number;
use crate::value::Value;
use indexmap::IndexMap;
use pest::iterators::Pair;
use pest::Parser;

pub mod errors;
mod utils;

pub use errors::ParseError;
use utils::unescape;

#[derive(pest_derive::Parser)]
#[grammar = "parser/lua_table.pest"] // Path relative to src/
pub struct LuaTableParser;

/// A table key as written by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RawKey {
    Int(i64),
    Str(String),
    /// Any other key kind (floats, booleans), kept in literal form.
    Other(String),
}

/// Structural parse result, before list/map normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Scalar(Value),
    Table(IndexMap<RawKey, RawValue>),
}

/// Parse a reply into its structural form.
pub fn parse_value(input: &str) -> Result<RawValue, ParseError> {
    let mut pairs = LuaTableParser::parse(Rule::reply, input)?;
    let reply = pairs.next().ok_or_else(|| ParseError::UnexpectedRule {
        expected: "reply".to_string(),
        found: "nothing".to_string(),
    })?;
    let value = reply
        .into_inner()
        .find(|p| p.as_rule() != Rule::EOI)
        .ok_or_else(|| ParseError::UnexpectedRule {
            expected: "value".to_string(),
            found: "end of input".to_string(),
        })?;
    build_value(value)
}

/// Parse and normalize a reply into a [`Value`].
pub fn decode(input: &str) -> Result<Value, ParseError> {
    parse_value(input).map(normalize)
}

/// Turn raw tables into lists or maps, recursively.
///
/// A table is a list exactly when its keys are the integers `1..=n`; the empty
/// table counts as an empty list.
pub fn normalize(raw: RawValue) -> Value {
    match raw {
        RawValue::Scalar(v) => v,
        RawValue::Table(entries) => {
            if is_sequence(&entries) {
                let mut items: Vec<(i64, RawValue)> = entries
                    .into_iter()
                    .filter_map(|(k, v)| match k {
                        RawKey::Int(i) => Some((i, v)),
                        _ => None,
                    })
                    .collect();
                items.sort_by_key(|(i, _)| *i);
                Value::List(items.into_iter().map(|(_, v)| normalize(v)).collect())
            } else {
                Value::Map(
                    entries
                        .into_iter()
                        .map(|(k, v)| (key_to_string(k), normalize(v)))
                        .collect(),
                )
            }
        }
    }
}

fn is_sequence(entries: &IndexMap<RawKey, RawValue>) -> bool {
    let n = entries.len() as i64;
    entries
        .keys()
        .all(|k| matches!(k, RawKey::Int(i) if *i >= 1 && *i <= n))
}

fn key_to_string(key: RawKey) -> String {
    match key {
        RawKey::Int(i) => i.to_string(),
        RawKey::Str(s) | RawKey::Other(s) => s,
    }
}

fn build_value(pair: Pair<Rule>) -> Result<RawValue, ParseError> {
    match pair.as_rule() {
        Rule::table => build_table(pair),
        Rule::string => Ok(RawValue::Scalar(Value::String(build_string(pair)?))),
        Rule::number => Ok(RawValue::Scalar(build_number(pair.as_str())?)),
        Rule::special => Ok(RawValue::Scalar(Value::Number(build_special(pair.as_str())))),
        Rule::boolean => Ok(RawValue::Scalar(Value::Boolean(pair.as_str() == "true"))),
        Rule::nil => Ok(RawValue::Scalar(Value::Nil)),
        rule => Err(ParseError::UnexpectedRule {
            expected: "value".to_string(),
            found: format!("{:?}", rule),
        }),
    }
}

fn build_table(pair: Pair<Rule>) -> Result<RawValue, ParseError> {
    let mut entries = IndexMap::new();
    let mut next_index = 1i64;
    for field in pair.into_inner() {
        let rule = field.as_rule();
        let mut inner = field.into_inner();
        match rule {
            Rule::positional_field => {
                let value = build_value(next_pair(&mut inner, "positional value")?)?;
                entries.insert(RawKey::Int(next_index), value);
                next_index += 1;
            }
            Rule::named_field => {
                let name = next_pair(&mut inner, "field name")?.as_str().to_string();
                let value = build_value(next_pair(&mut inner, "field value")?)?;
                entries.insert(RawKey::Str(name), value);
            }
            Rule::keyed_field => {
                let key = build_key(next_pair(&mut inner, "field key")?)?;
                let value = build_value(next_pair(&mut inner, "field value")?)?;
                entries.insert(key, value);
            }
            other => {
                return Err(ParseError::UnexpectedRule {
                    expected: "table field".to_string(),
                    found: format!("{:?}", other),
                })
            }
        }
    }
    Ok(RawValue::Table(entries))
}

fn next_pair<'i>(
    inner: &mut pest::iterators::Pairs<'i, Rule>,
    what: &str,
) -> Result<Pair<'i, Rule>, ParseError> {
    inner.next().ok_or_else(|| ParseError::UnexpectedRule {
        expected: what.to_string(),
        found: "nothing".to_string(),
    })
}

fn build_key(pair: Pair<Rule>) -> Result<RawKey, ParseError> {
    match build_value(pair)? {
        RawValue::Scalar(Value::Integer(i)) => Ok(RawKey::Int(i)),
        RawValue::Scalar(Value::Number(n)) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
            Ok(RawKey::Int(n as i64))
        }
        RawValue::Scalar(Value::Number(n)) => Ok(RawKey::Other(encode_number(n))),
        RawValue::Scalar(Value::String(s)) => Ok(RawKey::Str(s)),
        RawValue::Scalar(Value::Boolean(b)) => Ok(RawKey::Other(b.to_string())),
        RawValue::Scalar(Value::Nil) => Err(ParseError::InvalidLiteral {
            text: "nil".to_string(),
            message: "nil cannot be a table key".to_string(),
        }),
        _ => Err(ParseError::InvalidLiteral {
            text: "{...}".to_string(),
            message: "table keys must be scalars".to_string(),
        }),
    }
}

fn build_string(pair: Pair<Rule>) -> Result<String, ParseError> {
    let body = pair
        .into_inner()
        .next()
        .map(|p| p.as_str())
        .unwrap_or_default();
    unescape(body)
}

fn build_number(text: &str) -> Result<Value, ParseError> {
    let invalid = |message: &str| ParseError::InvalidLiteral {
        text: text.to_string(),
        message: message.to_string(),
    };
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        let magnitude = i64::from_str_radix(hex, 16).map_err(|_| invalid("hex out of range"))?;
        return Ok(Value::Integer(if negative { -magnitude } else { magnitude }));
    }
    if digits.contains(|c: char| matches!(c, '.' | 'e' | 'E')) {
        return text
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| invalid("not a number"));
    }
    match text.parse::<i64>() {
        Ok(i) => Ok(Value::Integer(i)),
        // Integers beyond i64 still fit the remote side's double
        Err(_) => text
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| invalid("not a number")),
    }
}

fn build_special(text: &str) -> f64 {
    if text.contains("huge") || text.contains("inf") {
        if text.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        }
    } else {
        f64::NAN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_positional_table_is_list() {
        assert_eq!(
            decode("{1, 2, 3}").unwrap(),
            Value::List(vec![1.into(), 2.into(), 3.into()])
        );
    }

    #[test]
    fn test_explicit_consecutive_keys_are_list() {
        assert_eq!(
            decode(r#"{[1]="x",[2]="y",[3]="z"}"#).unwrap(),
            Value::from(vec!["x", "y", "z"])
        );
        // Out-of-order keys are still a sequence
        assert_eq!(
            decode(r#"{[2]="y",[1]="x"}"#).unwrap(),
            Value::from(vec!["x", "y"])
        );
    }

    #[test]
    fn test_sparse_keys_are_map() {
        let value = decode(r#"{[1]="x",[3]="z"}"#).unwrap();
        assert_eq!(value.get("1"), Some(&Value::from("x")));
        assert_eq!(value.get("3"), Some(&Value::from("z")));
    }

    #[test]
    fn test_string_keys_that_look_numeric_stay_map() {
        let value = decode(r#"{["1"]="x"}"#).unwrap();
        assert_eq!(value, Value::map([("1", "x")]));
    }

    #[test]
    fn test_named_fields_and_trailing_separator() {
        let value = decode("{ name = 'iron-plate'; count = 5, }").unwrap();
        assert_eq!(value, Value::map([("name", Value::from("iron-plate")), ("count", 5.into())]));
    }

    #[test]
    fn test_scalars() {
        assert_eq!(decode("  42 ").unwrap(), Value::Integer(42));
        assert_eq!(decode("-1.5e2").unwrap(), Value::Number(-150.0));
        assert_eq!(decode("0x10").unwrap(), Value::Integer(16));
        assert_eq!(decode("true").unwrap(), Value::Boolean(true));
        assert_eq!(decode("nil").unwrap(), Value::Nil);
        assert_eq!(decode("-math.huge").unwrap(), Value::Number(f64::NEG_INFINITY));
        assert!(matches!(decode("(0/0)").unwrap(), Value::Number(n) if n.is_nan()));
    }

    #[test]
    fn test_empty_table_is_empty_list() {
        assert_eq!(decode("{}").unwrap(), Value::List(vec![]));
    }

    #[test]
    fn test_nested_tables_and_comments() {
        let value = decode(
            "{ -- entity dump\n a = true, b = { position = {x = 1.5, y = -2}, [\"name\"] = \"burner-mining-drill\" } }",
        )
        .unwrap();
        let b = value.get("b").unwrap();
        assert_eq!(b.get("position").unwrap().get("x"), Some(&Value::Number(1.5)));
        assert_eq!(b.get("name"), Some(&Value::from("burner-mining-drill")));
    }

    #[test]
    fn test_raw_value_keeps_key_kinds() {
        let raw = parse_value(r#"{"a", [5] = true, ["k"] = 1}"#).unwrap();
        match raw {
            RawValue::Table(entries) => {
                let keys: Vec<_> = entries.keys().cloned().collect();
                assert_eq!(
                    keys,
                    vec![RawKey::Int(1), RawKey::Int(5), RawKey::Str("k".into())]
                );
            }
            other => panic!("expected table, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_a_syntax_error() {
        assert!(matches!(
            decode("{ a = }"),
            Err(ParseError::Syntax { .. })
        ));
        assert!(decode("Error: something broke").is_err());
    }

    #[test]
    fn test_syntax_error_points_at_offending_line() {
        match decode("{\n  a = 1,\n  b = ,\n}") {
            Err(ParseError::Syntax { line, snippet, .. }) => {
                assert_eq!(line, 3);
                assert_eq!(snippet, "  b = ,");
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }
}
