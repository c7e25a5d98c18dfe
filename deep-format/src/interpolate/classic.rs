//! Classic `{field}` format strings
//!
//! A field is `{name[!conversion][:spec]}`. The name is an identifier, a
//! digit string or empty (numbered automatically), optionally followed by
//! `.attr` and `[index]` accessors. `{{` and `}}` are literal braces.

use std::borrow::Cow;

use serde_json::Value;

use crate::error::{FormatError, Result};
use crate::format::add_thousands_sep;
use crate::value::{Num, Params, as_num, to_display, type_name};

/// Substitute every field of `template` from `params`
pub(crate) fn substitute(template: &str, params: &Params, lenient: bool) -> Result<String> {
    let invalid = |message: String| FormatError::ClassicFormat {
        template: template.to_string(),
        message,
    };

    let mut out = String::with_capacity(template.len());
    let mut numbering = Numbering::default();
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("{{").or_else(|| tail.strip_prefix("}}")) {
            out.push_str(&tail[..1]);
            rest = after;
            continue;
        }
        if tail.starts_with('}') {
            return Err(invalid("single '}' encountered in format string".to_string()));
        }

        let close = tail
            .find('}')
            .ok_or_else(|| invalid("expected '}' before end of string".to_string()))?;
        let body = &tail[1..close];
        if body.contains('{') {
            return Err(invalid("unexpected '{' in field name".to_string()));
        }

        let field = Field::parse(body, &mut numbering).map_err(invalid)?;
        match field.resolve(params) {
            Ok(value) => out.push_str(&field.render(value).map_err(invalid)?),
            Err(missing) if lenient => {
                log::debug!("Found uninitialized key {}, replaced with empty string", missing);
            }
            Err(missing) => return Err(FormatError::missing_parameter(missing, template, params)),
        }

        rest = &tail[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Tracks whether fields are numbered automatically (`{}`) or by hand (`{0}`)
#[derive(Default)]
struct Numbering {
    next: usize,
    automatic: bool,
    manual: bool,
}

#[derive(Debug, PartialEq)]
enum Accessor<'t> {
    Attr(&'t str),
    Index(&'t str),
}

#[derive(Debug)]
struct Field<'t> {
    /// Parameter key of the first name segment
    key: String,
    accessors: Vec<Accessor<'t>>,
    conversion: Option<&'t str>,
    spec: &'t str,
}

impl<'t> Field<'t> {
    fn parse(body: &'t str, numbering: &mut Numbering) -> std::result::Result<Self, String> {
        // The name ends at the first '!' or ':' outside brackets
        let mut depth = 0;
        let mut name_end = body.len();
        for (i, c) in body.char_indices() {
            match c {
                '[' => depth += 1,
                ']' if depth > 0 => depth -= 1,
                '!' | ':' if depth == 0 => {
                    name_end = i;
                    break;
                }
                _ => {}
            }
        }

        let name = &body[..name_end];
        let (conversion, spec) = match body[name_end..].strip_prefix('!') {
            Some(after) => {
                let (conversion, spec) = after.split_once(':').unwrap_or((after, ""));
                if conversion.chars().count() != 1 {
                    return Err("expected ':' after conversion specifier".to_string());
                }
                (Some(conversion), spec)
            }
            None => (None, body[name_end..].strip_prefix(':').unwrap_or("")),
        };

        let root_end = name.find(['.', '[']).unwrap_or(name.len());
        let root = &name[..root_end];
        let key = if root.is_empty() {
            if numbering.manual {
                return Err(
                    "cannot switch from manual field specification to automatic field numbering"
                        .to_string(),
                );
            }
            numbering.automatic = true;
            numbering.next += 1;
            (numbering.next - 1).to_string()
        } else {
            if root.bytes().all(|b| b.is_ascii_digit()) {
                if numbering.automatic {
                    return Err(
                        "cannot switch from automatic field numbering to manual field specification"
                            .to_string(),
                    );
                }
                numbering.manual = true;
            }
            root.to_string()
        };

        Ok(Field {
            key,
            accessors: parse_accessors(&name[root_end..])?,
            conversion,
            spec,
        })
    }

    /// Look up the field's value, or the path up to the first segment that
    /// does not resolve, e.g. `scm.url`
    fn resolve<'p>(&self, params: &'p Params) -> std::result::Result<&'p Value, String> {
        let mut path = self.key.clone();
        let Some(mut current) = params.get(&self.key) else {
            return Err(path);
        };

        for accessor in &self.accessors {
            let name = match accessor {
                Accessor::Attr(name) => {
                    path.push('.');
                    path.push_str(name);
                    name
                }
                Accessor::Index(name) => {
                    path.push('[');
                    path.push_str(name);
                    path.push(']');
                    name
                }
            };
            let next = match current {
                Value::Object(map) => map.get(*name),
                Value::Array(items) => name.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            let Some(next) = next else {
                return Err(path);
            };
            current = next;
        }
        Ok(current)
    }

    fn render(&self, value: &Value) -> std::result::Result<String, String> {
        let value: Cow<'_, Value> = match self.conversion {
            None => Cow::Borrowed(value),
            Some("s") => Cow::Owned(Value::String(to_display(value))),
            Some("r") => Cow::Owned(Value::String(
                serde_json::to_string(value).map_err(|e| e.to_string())?,
            )),
            Some(other) => return Err(format!("unknown conversion specifier {}", other)),
        };

        if self.spec.is_empty() {
            return Ok(to_display(&value));
        }
        Spec::parse(self.spec)?.apply(&value)
    }
}

fn parse_accessors(mut rest: &str) -> std::result::Result<Vec<Accessor<'_>>, String> {
    let mut accessors = Vec::new();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            if end == 0 {
                return Err("empty attribute in format string".to_string());
            }
            accessors.push(Accessor::Attr(&after[..end]));
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let close = after
                .find(']')
                .ok_or_else(|| "missing ']' in format string".to_string())?;
            if close == 0 {
                return Err("empty index in format string".to_string());
            }
            accessors.push(Accessor::Index(&after[..close]));
            rest = &after[close + 1..];
            if !rest.is_empty() && !rest.starts_with(['.', '[']) {
                return Err("only '.' or '[' may follow ']' in format field specifier".to_string());
            }
        } else {
            return Err(format!("invalid field name segment {:?}", rest));
        }
    }
    Ok(accessors)
}

/// `[[fill]align][0][width][,][.precision][type]`
#[derive(Debug, Default, PartialEq)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    zero: bool,
    width: usize,
    grouping: bool,
    precision: Option<usize>,
    kind: Option<char>,
}

fn is_align(c: char) -> bool {
    matches!(c, '<' | '>' | '^' | '=')
}

impl Spec {
    fn parse(spec: &str) -> std::result::Result<Self, String> {
        let chars: Vec<char> = spec.chars().collect();
        let mut parsed = Spec::default();
        let mut i = 0;

        if chars.len() >= 2 && is_align(chars[1]) {
            parsed.fill = Some(chars[0]);
            parsed.align = Some(chars[1]);
            i = 2;
        } else if chars.first().copied().is_some_and(is_align) {
            parsed.align = Some(chars[0]);
            i = 1;
        }

        if chars.get(i) == Some(&',') {
            parsed.grouping = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            parsed.zero = true;
            i += 1;
        }

        let digits = |i: &mut usize| {
            let start = *i;
            while chars.get(*i).is_some_and(|c| c.is_ascii_digit()) {
                *i += 1;
            }
            chars[start..*i].iter().collect::<String>()
        };

        let width = digits(&mut i);
        if !width.is_empty() {
            parsed.width = width.parse().map_err(|_| "too many decimal digits in format string")?;
        }

        if chars.get(i) == Some(&',') {
            parsed.grouping = true;
            i += 1;
        }

        if chars.get(i) == Some(&'.') {
            i += 1;
            let precision = digits(&mut i);
            if precision.is_empty() {
                return Err("format specifier missing precision".to_string());
            }
            parsed.precision =
                Some(precision.parse().map_err(|_| "too many decimal digits in format string")?);
        }

        if let Some(&kind) = chars.get(i) {
            if !matches!(kind, 's' | 'd' | 'f' | '%') {
                return Err(format!("unknown format code '{}'", kind));
            }
            parsed.kind = Some(kind);
            i += 1;
        }

        if i < chars.len() {
            return Err("invalid format specifier".to_string());
        }
        Ok(parsed)
    }

    fn apply(&self, value: &Value) -> std::result::Result<String, String> {
        let num = as_num(value);
        let unsupported = |kind: char| {
            format!("unknown format code '{}' for value of type {}", kind, type_name(value))
        };

        let body = match (self.kind, num) {
            (None | Some('s'), None) => {
                if self.kind == Some('s') && !value.is_string() {
                    return Err(unsupported('s'));
                }
                let text = to_display(value);
                match self.precision {
                    Some(p) => text.chars().take(p).collect(),
                    None => text,
                }
            }
            (Some('s'), Some(_)) => return Err(unsupported('s')),
            (Some('d'), Some(Num::Int(n))) => self.group(n.to_string()),
            (Some('d'), _) => return Err(unsupported('d')),
            (Some('f'), Some(n)) => {
                let precision = self.precision.unwrap_or(6);
                self.group(format!("{:.prec$}", n.as_f64(), prec = precision))
            }
            (Some('%'), Some(n)) => {
                let precision = self.precision.unwrap_or(6);
                self.group(format!("{:.prec$}", n.as_f64() * 100.0, prec = precision)) + "%"
            }
            (None, Some(Num::Int(n))) => self.group(n.to_string()),
            (None, Some(Num::Float(f))) => match self.precision {
                Some(p) => self.group(format!("{:.prec$}", f, prec = p)),
                None => self.group(to_display(value)),
            },
            (Some(kind), _) => return Err(unsupported(kind)),
        };

        Ok(self.pad(body, num.is_some()))
    }

    fn group(&self, digits: String) -> String {
        if self.grouping {
            add_thousands_sep(&digits)
        } else {
            digits
        }
    }

    fn pad(&self, body: String, numeric: bool) -> String {
        let len = body.chars().count();
        if len >= self.width {
            return body;
        }
        let pad = self.width - len;

        let (fill, align) = match (self.align, self.zero) {
            (None, true) => ('0', '='),
            (align, _) => (
                self.fill.unwrap_or(' '),
                align.unwrap_or(if numeric { '>' } else { '<' }),
            ),
        };
        let fill_str = |n: usize| std::iter::repeat_n(fill, n).collect::<String>();

        match align {
            '<' => body + &fill_str(pad),
            '^' => fill_str(pad / 2) + &body + &fill_str(pad - pad / 2),
            '=' => match body.strip_prefix(['-', '+']) {
                Some(digits) => body[..1].to_string() + &fill_str(pad) + digits,
                None => fill_str(pad) + &body,
            },
            _ => fill_str(pad) + &body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    fn sub(template: &str, value: Value) -> Result<String> {
        substitute(template, &params(value), false)
    }

    #[test]
    fn test_simple_substitution() {
        assert_eq!(sub("hello {name}", json!({"name": "world"})).unwrap(), "hello world");
        assert_eq!(
            sub("{a}-{b}-{a}", json!({"a": 1, "b": true})).unwrap(),
            "1-true-1"
        );
    }

    #[test]
    fn test_escaped_braces() {
        assert_eq!(sub("{{literal}} {x}", json!({"x": "v"})).unwrap(), "{literal} v");
        assert_eq!(sub("}}{{", json!({})).unwrap(), "}{");
    }

    #[test]
    fn test_attribute_and_index_access() {
        let record = json!({"scm": {"url": "git://x", "branches": ["main", "dev"]}});
        assert_eq!(sub("{scm.url}", record.clone()).unwrap(), "git://x");
        assert_eq!(sub("{scm[branches][1]}", record.clone()).unwrap(), "dev");
        assert_eq!(sub("{scm.branches.0}", record).unwrap(), "main");
    }

    #[test]
    fn test_numbered_fields() {
        assert_eq!(sub("{}/{}", json!({"0": "a", "1": "b"})).unwrap(), "a/b");
        assert_eq!(sub("{1}/{0}", json!({"0": "a", "1": "b"})).unwrap(), "b/a");
        let err = sub("{}/{0}", json!({"0": "a"})).unwrap_err();
        assert!(matches!(err, FormatError::ClassicFormat { .. }));
    }

    #[test]
    fn test_containers_render_as_json() {
        assert_eq!(sub("{xs}", json!({"xs": [1, "a"]})).unwrap(), "[1,\"a\"]");
        assert_eq!(sub("{n}", json!({"n": null})).unwrap(), "");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(sub("{s!r}", json!({"s": "x"})).unwrap(), "\"x\"");
        assert_eq!(sub("{n!s:4}", json!({"n": 7})).unwrap(), "7   ");
        assert!(sub("{n!x}", json!({"n": 7})).is_err());
    }

    #[test]
    fn test_format_specs() {
        let record = json!({"n": 5, "big": 1234567, "f": 3.14159, "r": 0.25, "s": "ab", "neg": -5});
        assert_eq!(sub("{n:03d}", record.clone()).unwrap(), "005");
        assert_eq!(sub("{neg:04}", record.clone()).unwrap(), "-005");
        assert_eq!(sub("{big:,}", record.clone()).unwrap(), "1,234,567");
        assert_eq!(sub("{f:.2f}", record.clone()).unwrap(), "3.14");
        assert_eq!(sub("{r:.0%}", record.clone()).unwrap(), "25%");
        assert_eq!(sub("{s:>4}", record.clone()).unwrap(), "  ab");
        assert_eq!(sub("{s:*^6}", record.clone()).unwrap(), "**ab**");
        assert_eq!(sub("{s:.1}", record.clone()).unwrap(), "a");
        assert_eq!(sub("{n:<3}|", record).unwrap(), "5  |");
    }

    #[test]
    fn test_format_spec_type_mismatch() {
        let err = sub("{s:d}", json!({"s": "x"})).unwrap_err();
        assert!(err.to_string().contains("unknown format code 'd'"));
        assert!(sub("{n:q}", json!({"n": 1})).is_err());
    }

    #[test]
    fn test_missing_key_strict() {
        let err = sub("hello {name}", json!({"other": 1})).unwrap_err();
        assert_eq!(err.missing_key(), Some("name"));
        assert!(err.to_string().starts_with("name parameter missing to format hello {name}"));
    }

    #[test]
    fn test_missing_nested_key_names_full_path() {
        let err = sub("{scm.url}", json!({"scm": {}})).unwrap_err();
        assert_eq!(err.missing_key(), Some("scm.url"));
        assert!(err.to_string().starts_with("scm.url parameter missing to format {scm.url}"));

        let err = sub("{scm.url}", json!({})).unwrap_err();
        assert_eq!(err.missing_key(), Some("scm"));

        let record = json!({"scm": {"branches": ["main"]}});
        let err = sub("{scm[branches][3]}", record.clone()).unwrap_err();
        assert_eq!(err.missing_key(), Some("scm[branches][3]"));
        let err = sub("{scm.branches.0.name}", record).unwrap_err();
        assert_eq!(err.missing_key(), Some("scm.branches.0.name"));
    }

    #[test]
    fn test_missing_nested_key_lenient() {
        let params = params(json!({"scm": {}}));
        assert_eq!(substitute("<{scm.url}>", &params, true).unwrap(), "<>");
    }

    #[test]
    fn test_missing_key_lenient() {
        let result = substitute("[{missing}]", &Params::new(), true).unwrap();
        assert_eq!(result, "[]");
    }

    #[test]
    fn test_malformed_templates() {
        for template in ["{unclosed", "stray }", "{a{b}}", "{a[0}"] {
            let err = sub(template, json!({"a": [1]})).unwrap_err();
            assert!(
                matches!(err, FormatError::ClassicFormat { .. }),
                "{template}: {err}"
            );
        }
    }
}
