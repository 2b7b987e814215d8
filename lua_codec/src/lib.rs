// Lua codec
// Literal encoding, reply decoding and fragment pre-flight checks for the
// scripting language spoken over the remote console.

pub mod encode;
pub mod parser;
pub mod syntax;
pub mod value;

pub use encode::{encode, encode_args};
pub use parser::{decode, normalize, parse_value, ParseError, RawKey, RawValue};
pub use syntax::{check as check_syntax, SyntaxIssue};
pub use value::Value;
