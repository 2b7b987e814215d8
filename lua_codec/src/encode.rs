//! Encoding of [`Value`]s into remote-language literal syntax.
//!
//! The output is valid Lua 5.2 expression text and is what gets substituted
//! for `argN` placeholders in script fragments.

use crate::value::Value;

/// Encode a value as a literal. Total: every value has a literal form.
pub fn encode(value: &Value) -> String {
    let mut out = String::new();
    encode_into(value, &mut out);
    out
}

/// Encode a list of positional parameters as a comma-separated argument list.
pub fn encode_args(values: &[Value]) -> String {
    values.iter().map(encode).collect::<Vec<_>>().join(", ")
}

fn encode_into(value: &Value, out: &mut String) {
    match value {
        Value::Nil => out.push_str("nil"),
        Value::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Integer(i) => out.push_str(&i.to_string()),
        Value::Number(n) => out.push_str(&encode_number(*n)),
        Value::String(s) => encode_string(s, out),
        Value::List(items) => {
            out.push('{');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                encode_into(item, out);
            }
            out.push('}');
        }
        Value::Map(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push('[');
                encode_string(key, out);
                out.push_str("] = ");
                encode_into(item, out);
            }
            out.push('}');
        }
    }
}

/// Floats always carry a `.` or an exponent so they never read back as integers.
pub fn encode_number(n: f64) -> String {
    if n.is_nan() {
        "(0/0)".to_string()
    } else if n == f64::INFINITY {
        "math.huge".to_string()
    } else if n == f64::NEG_INFINITY {
        "-math.huge".to_string()
    } else {
        // Debug formatting is the shortest representation that round-trips
        format!("{:?}", n)
    }
}

fn encode_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\{:03}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
