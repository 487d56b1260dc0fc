//! The endpoint description string format.
//!
//! A description is a sequence of colon-separated fields. The first field
//! is the type tag; the rest are arguments, positional or `name=value`.
//! A backslash escapes the character after it, so colons and equals signs
//! can appear inside values. Within one field, only the first unescaped
//! `=` separates name from value; later ones are literal.

use std::collections::HashMap;

use berth_core::{EndpointError, EndpointResult};

/// A parsed endpoint description: the type tag plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// The type tag, e.g. `tcp` or `unix`.
    pub type_tag: String,
    /// Positional arguments, in order of appearance.
    pub positional: Vec<String>,
    /// Keyword arguments.
    pub keyword: HashMap<String, String>,
}

struct Field {
    key: Option<String>,
    value: String,
}

impl EndpointDescriptor {
    /// Parses a description string into its tag and arguments.
    pub fn parse(description: &str) -> EndpointResult<Self> {
        let mut fields = split_fields(description)?;
        if fields.is_empty() {
            return Err(EndpointError::Parse(
                "empty endpoint description".to_string(),
            ));
        }
        let first = fields.remove(0);
        if first.key.is_some() || first.value.is_empty() {
            return Err(EndpointError::Parse(
                "endpoint description must begin with a type tag".to_string(),
            ));
        }
        Ok(Self::from_fields(first.value, fields))
    }

    /// Parses a description whose tag may be implicit.
    ///
    /// If the first field is not a tag `is_known` recognizes, the whole
    /// string is reinterpreted as the arguments of `default_tag`.
    pub fn parse_with_default(
        description: &str,
        default_tag: &str,
        is_known: impl Fn(&str) -> bool,
    ) -> EndpointResult<Self> {
        let mut fields = split_fields(description)?;
        let qualified = fields
            .first()
            .is_some_and(|f| f.key.is_none() && is_known(&f.value));
        let tag = if qualified {
            fields.remove(0).value
        } else {
            default_tag.to_string()
        };
        Ok(Self::from_fields(tag, fields))
    }

    fn from_fields(type_tag: String, fields: Vec<Field>) -> Self {
        let mut positional = Vec::new();
        let mut keyword = HashMap::new();
        for field in fields {
            match field.key {
                Some(key) => {
                    keyword.insert(key, field.value);
                }
                None => positional.push(field.value),
            }
        }
        Self {
            type_tag,
            positional,
            keyword,
        }
    }
}

/// Splits a description into fields, honoring backslash escapes. A
/// trailing separator contributes no field.
fn split_fields(description: &str) -> EndpointResult<Vec<Field>> {
    let mut fields = Vec::new();
    let mut key: Option<String> = None;
    let mut current = String::new();
    let mut chars = description.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => {
                    return Err(EndpointError::Parse(
                        "endpoint description ends with an incomplete escape".to_string(),
                    ));
                }
            },
            ':' => fields.push(Field {
                key: key.take(),
                value: std::mem::take(&mut current),
            }),
            '=' if key.is_none() => key = Some(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if key.is_some() || !current.is_empty() || fields.is_empty() {
        fields.push(Field {
            key: key.take(),
            value: current,
        });
    }
    Ok(fields)
}

/// Escapes `value` so it survives as a single argument in a description
/// string. Only backslashes and colons need quoting; everything else,
/// including `=`, passes through untouched.
pub fn quote_string_argument(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || c == ':' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted
}

pub(crate) fn parse_port(name: &str, value: &str) -> EndpointResult<u16> {
    value
        .parse()
        .map_err(|_| EndpointError::Parse(format!("invalid value for {name}: '{value}'")))
}

pub(crate) fn parse_u32(name: &str, value: &str) -> EndpointResult<u32> {
    value
        .parse()
        .map_err(|_| EndpointError::Parse(format!("invalid value for {name}: '{value}'")))
}

/// File modes in descriptions are octal, with or without a leading zero.
pub(crate) fn parse_mode(name: &str, value: &str) -> EndpointResult<u32> {
    u32::from_str_radix(value, 8)
        .map_err(|_| EndpointError::Parse(format!("invalid octal value for {name}: '{value}'")))
}

/// Boolean arguments are integers: zero is false, anything else true.
pub(crate) fn parse_flag(name: &str, value: &str) -> EndpointResult<bool> {
    let n: i64 = value
        .parse()
        .map_err(|_| EndpointError::Parse(format!("invalid value for {name}: '{value}'")))?;
    Ok(n != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_simple_positional_fields() {
        let d = EndpointDescriptor::parse("tcp:4321").unwrap();
        assert_eq!(d.type_tag, "tcp");
        assert_eq!(d.positional, vec!["4321"]);
        assert!(d.keyword.is_empty());
    }

    #[test]
    fn test_keyword_fields() {
        let d = EndpointDescriptor::parse("unix:/var/run/finger:mode=660").unwrap();
        assert_eq!(d.type_tag, "unix");
        assert_eq!(d.positional, vec!["/var/run/finger"]);
        assert_eq!(d.keyword, kw(&[("mode", "660")]));
    }

    #[test]
    fn test_escaped_colon_stays_in_value() {
        let d = EndpointDescriptor::parse(r"unix:foo\:bar\=baz:address=hello").unwrap();
        assert_eq!(d.positional, vec!["foo:bar=baz"]);
        assert_eq!(d.keyword, kw(&[("address", "hello")]));
    }

    #[test]
    fn test_backslash_escapes_any_character() {
        let d = EndpointDescriptor::parse(r"unix:address=hello\ world").unwrap();
        assert_eq!(d.keyword, kw(&[("address", "hello world")]));
    }

    #[test]
    fn test_only_first_equals_starts_a_keyword() {
        let d = EndpointDescriptor::parse("tcp:www.example.com:port=80=x").unwrap();
        assert_eq!(d.keyword, kw(&[("port", "80=x")]));
    }

    #[test]
    fn test_nonstandard_default_is_preserved() {
        let d = EndpointDescriptor::parse(r"ssl:privateKey=mycert.pem").unwrap();
        assert_eq!(d.type_tag, "ssl");
        assert_eq!(d.keyword, kw(&[("privateKey", "mycert.pem")]));
    }

    #[test]
    fn test_trailing_empty_field_is_dropped() {
        let d = EndpointDescriptor::parse("stdio:").unwrap();
        assert_eq!(d.type_tag, "stdio");
        assert!(d.positional.is_empty());
        assert!(d.keyword.is_empty());
    }

    #[test]
    fn test_interior_empty_field_is_kept() {
        let d = EndpointDescriptor::parse("tcp:4321::foo").unwrap();
        assert_eq!(d.positional, vec!["4321", "", "foo"]);
    }

    #[test]
    fn test_trailing_backslash_is_an_error() {
        let err = EndpointDescriptor::parse("unix:foo\\").unwrap_err();
        assert!(matches!(err, EndpointError::Parse(_)));
    }

    #[test]
    fn test_empty_description_is_an_error() {
        let err = EndpointDescriptor::parse("").unwrap_err();
        assert!(matches!(err, EndpointError::Parse(_)));
    }

    #[test]
    fn test_parse_with_default_unqualified() {
        let d = EndpointDescriptor::parse_with_default("4321", "tcp", |t| t == "tcp").unwrap();
        assert_eq!(d.type_tag, "tcp");
        assert_eq!(d.positional, vec!["4321"]);
    }

    #[test]
    fn test_parse_with_default_unqualified_with_arguments() {
        let d = EndpointDescriptor::parse_with_default("4321:interface=127.0.0.1", "tcp", |t| {
            t == "tcp"
        })
        .unwrap();
        assert_eq!(d.type_tag, "tcp");
        assert_eq!(d.positional, vec!["4321"]);
        assert_eq!(d.keyword, kw(&[("interface", "127.0.0.1")]));
    }

    #[test]
    fn test_parse_with_default_qualified_wins() {
        let d =
            EndpointDescriptor::parse_with_default("unix:/tmp/sock", "tcp", |t| t == "unix")
                .unwrap();
        assert_eq!(d.type_tag, "unix");
        assert_eq!(d.positional, vec!["/tmp/sock"]);
    }

    #[test]
    fn test_quote_string_argument() {
        assert_eq!(
            quote_string_argument(r"hello:colon:world"),
            r"hello\:colon\:world"
        );
        assert_eq!(quote_string_argument(r"back\slash"), r"back\\slash");
        assert_eq!(quote_string_argument("name=value"), "name=value");
    }

    #[test]
    fn test_quoted_value_parses_back() {
        let quoted = quote_string_argument(r"C:\WINDOWS\temp");
        let d = EndpointDescriptor::parse(&format!("unix:{quoted}")).unwrap();
        assert_eq!(d.positional, vec![r"C:\WINDOWS\temp"]);
    }

    #[test]
    fn test_mode_is_octal() {
        assert_eq!(parse_mode("mode", "660").unwrap(), 0o660);
        assert_eq!(parse_mode("mode", "0666").unwrap(), 0o666);
        assert!(parse_mode("mode", "999").is_err());
    }

    #[test]
    fn test_flag_is_integer() {
        assert!(parse_flag("lockfile", "1").unwrap());
        assert!(!parse_flag("lockfile", "0").unwrap());
        assert!(parse_flag("lockfile", "yes").is_err());
    }
}
