use std::str::FromStr;
use nom::{IResult, Parser};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, multispace0};
use nom::combinator::{all_consuming, map, map_res};
use nom::multi::many1;
use nom::sequence::{delimited, preceded, terminated};
use crate::core::error::{Error, ErrorKind, Result};
use crate::query::ast::{AttributeValue, Filter, SubstringFilter};

/// Parses an RFC 4515 filter string such as `(&(objectclass=person)(uid=j*))`.
/// A bare item without surrounding parentheses (`cn=foo`) is accepted too.
pub fn parse_filter(input: &str) -> Result<Filter> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid(input, "empty filter"));
    }

    let wrapped;
    let source = if trimmed.starts_with('(') {
        trimmed
    } else {
        wrapped = format!("({})", trimmed);
        wrapped.as_str()
    };

    match all_consuming(terminated(filter, multispace0)).parse(source) {
        Ok((_, parsed)) => Ok(parsed),
        Err(e) => Err(invalid(input, &e.to_string())),
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_filter(s)
    }
}

fn invalid(input: &str, why: &str) -> Error {
    Error::new(ErrorKind::InvalidFilter, format!("{}: {}", input, why))
}

fn filter(input: &str) -> IResult<&str, Filter> {
    delimited(
        preceded(multispace0, char('(')),
        alt((and, or, not, item)),
        char(')'),
    )
    .parse(input)
}

fn and(input: &str) -> IResult<&str, Filter> {
    map(preceded(char('&'), many1(filter)), Filter::And).parse(input)
}

fn or(input: &str) -> IResult<&str, Filter> {
    map(preceded(char('|'), many1(filter)), Filter::Or).parse(input)
}

fn not(input: &str) -> IResult<&str, Filter> {
    map(preceded(char('!'), filter), |inner| Filter::Not(Box::new(inner))).parse(input)
}

fn item(input: &str) -> IResult<&str, Filter> {
    map_res(
        (attribute, operator, take_while(|c: char| c != '(' && c != ')')),
        |(attribute, op, raw): (&str, &str, &str)| build_item(attribute, op, raw),
    )
    .parse(input)
}

fn attribute(input: &str) -> IResult<&str, &str> {
    preceded(
        multispace0,
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' || c == ';'),
    )
    .parse(input)
}

fn operator(input: &str) -> IResult<&str, &str> {
    alt((tag("~="), tag(">="), tag("<="), tag("="))).parse(input)
}

fn build_item(attribute: &str, op: &str, raw: &str) -> Result<Filter> {
    let attribute = attribute.to_lowercase();
    let assertion = |raw: &str| -> Result<AttributeValue> {
        if raw.contains('*') {
            return Err(invalid(raw, "wildcard not allowed here"));
        }
        Ok(AttributeValue { attribute: attribute.clone(), value: unescape(raw)? })
    };

    match op {
        "~=" => Ok(Filter::Approx(assertion(raw)?)),
        ">=" => Ok(Filter::GreaterOrEqual(assertion(raw)?)),
        "<=" => Ok(Filter::LessOrEqual(assertion(raw)?)),
        _ if raw == "*" => Ok(Filter::Present(attribute)),
        _ if raw.contains('*') => {
            let parts: Vec<&str> = raw.split('*').collect();
            let last = parts.len() - 1;
            let mut sub = SubstringFilter { attribute, ..Default::default() };
            for (i, part) in parts.iter().enumerate() {
                if part.is_empty() {
                    continue;
                }
                let value = unescape(part)?;
                if i == 0 {
                    sub.initial = Some(value);
                } else if i == last {
                    sub.final_ = Some(value);
                } else {
                    sub.any.push(value);
                }
            }
            Ok(Filter::Substring(sub))
        }
        _ => Ok(Filter::Equality(assertion(raw)?)),
    }
}

/// Decodes `\XX` hex escapes; a backslash before any other character keeps
/// that character literally.
fn unescape(raw: &str) -> Result<String> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let hex = bytes.get(i + 1..i + 3);
        match hex {
            Some(pair) if pair.iter().all(|b| b.is_ascii_hexdigit()) => {
                let digits = std::str::from_utf8(pair).map_err(|_| invalid(raw, "bad escape"))?;
                let byte = u8::from_str_radix(digits, 16).map_err(|_| invalid(raw, "bad escape"))?;
                out.push(byte);
                i += 3;
            }
            _ => match bytes.get(i + 1) {
                Some(&next) => {
                    out.push(next);
                    i += 2;
                }
                None => return Err(invalid(raw, "dangling escape")),
            },
        }
    }
    String::from_utf8(out).map_err(|_| invalid(raw, "escaped bytes are not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_leaf_items() {
        assert_eq!(parse_filter("(CN=foo)").unwrap(), Filter::equality("cn", "foo"));
        assert_eq!(parse_filter("uid=*").unwrap(), Filter::present("uid"));
        assert_eq!(
            parse_filter("(cn>=child9)").unwrap(),
            Filter::GreaterOrEqual(AttributeValue::new("cn", "child9"))
        );
        assert_eq!(
            parse_filter("(sn~=smith)").unwrap(),
            Filter::Approx(AttributeValue::new("sn", "smith"))
        );
    }

    #[test]
    fn parses_substrings() {
        let parsed = parse_filter("(cn=jo*n*th*)").unwrap();
        assert_eq!(
            parsed,
            Filter::Substring(SubstringFilter {
                attribute: "cn".to_string(),
                initial: Some("jo".to_string()),
                any: vec!["n".to_string(), "th".to_string()],
                final_: None,
            })
        );
        let tail = parse_filter("(mail=*@example.com)").unwrap();
        match tail {
            Filter::Substring(sub) => {
                assert_eq!(sub.initial, None);
                assert_eq!(sub.final_.as_deref(), Some("@example.com"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_nested_sets_and_escapes() {
        let parsed = parse_filter("(&(objectclass=person)(|(uid=a\\2ab)(!(l=x))))").unwrap();
        let expected = Filter::And(vec![
            Filter::equality("objectclass", "person"),
            Filter::Or(vec![
                Filter::equality("uid", "a*b"),
                Filter::Not(Box::new(Filter::equality("l", "x"))),
            ]),
        ]);
        assert_eq!(parsed, expected);
        assert_eq!(parse_filter(&expected.to_string()).unwrap(), expected);
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "(cn=foo", "(&)", "(cn>=a*)", "((cn=a))", "(cn=a)(sn=b)", "(cn=a\\)"] {
            let err = parse_filter(bad).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidFilter, "{}", bad);
        }
    }
}
