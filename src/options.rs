use indexmap::IndexMap;
use serde::Deserialize;
use serde::de::IgnoredAny;

/// Caller-supplied options, kept in the order the caller gave them.
pub type OptionMap = IndexMap<String, OptionValue>;

/// Option names whose boolean values render as `1`/`0` and as bare flags.
pub const FLAG_KEYS: [&str; 2] = ["dircache", "auto-traverse-mounts"];

/// A single caller option value.
///
/// Anything that is not a string, number or boolean deserializes as
/// `Unsupported` and normalizes to an empty string, which drops the entry
/// from the merge.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Unsupported(IgnoredAny),
}

impl OptionValue {
    /// Render the value as a string. Booleans become `1`/`0` when
    /// `bool_as_int` is set, `true`/`false` otherwise.
    pub fn render(&self, bool_as_int: bool) -> String {
        match self {
            OptionValue::Bool(b) if bool_as_int => if *b { "1" } else { "0" }.to_string(),
            OptionValue::Bool(b) => b.to_string(),
            OptionValue::Int(n) => n.to_string(),
            OptionValue::Float(f) => f.to_string(),
            OptionValue::Str(s) => s.clone(),
            OptionValue::Unsupported(_) => String::new(),
        }
    }

    /// False only for an explicit boolean false (or its string form).
    pub fn is_set(&self) -> bool {
        match self {
            OptionValue::Bool(b) => *b,
            OptionValue::Str(s) => parse_bool(s) != Some(false),
            _ => true,
        }
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        OptionValue::Str(s.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        OptionValue::Str(s)
    }
}

impl From<i64> for OptionValue {
    fn from(n: i64) -> Self {
        OptionValue::Int(n)
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        OptionValue::Bool(b)
    }
}

/// Whether `key` uses flag-style boolean rendering.
pub fn is_flag_key(key: &str) -> bool {
    FLAG_KEYS.contains(&key)
}

/// Normalize `value` for `key` using the per-key boolean convention.
pub fn uniform_key_data(key: &str, value: &OptionValue) -> String {
    value.render(is_flag_key(key))
}

/// Parse the boolean spellings accepted in option strings.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
