use std::fmt;
use serde::{Serialize, Deserialize};
use crate::core::types::normalize_name;

/// Search filter tree (RFC 4515 semantics)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality(AttributeValue),
    Approx(AttributeValue),
    GreaterOrEqual(AttributeValue),
    LessOrEqual(AttributeValue),
    Present(String),
    Substring(SubstringFilter),
}

/// `attribute <op> value` assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub attribute: String,
    pub value: String,
}

/// `attribute=initial*any*...*final`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubstringFilter {
    pub attribute: String,
    pub initial: Option<String>,
    pub any: Vec<String>,
    pub final_: Option<String>,
}

impl AttributeValue {
    pub fn new(attribute: &str, value: &str) -> Self {
        AttributeValue {
            attribute: normalize_name(attribute),
            value: value.to_string(),
        }
    }
}

impl Filter {
    pub fn equality(attribute: &str, value: &str) -> Self {
        Filter::Equality(AttributeValue::new(attribute, value))
    }

    pub fn present(attribute: &str) -> Self {
        Filter::Present(normalize_name(attribute))
    }

    /// `(objectclass=*)`, the match-everything filter.
    pub fn any() -> Self {
        Filter::present("objectclass")
    }

    /// Attribute named by a leaf filter; `None` for `&`, `|` and `!`.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Filter::Equality(av)
            | Filter::Approx(av)
            | Filter::GreaterOrEqual(av)
            | Filter::LessOrEqual(av) => Some(&av.attribute),
            Filter::Present(attribute) => Some(attribute),
            Filter::Substring(sub) => Some(&sub.attribute),
            Filter::And(_) | Filter::Or(_) | Filter::Not(_) => None,
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Filter::And(children) | Filter::Or(children) => {
                let op = if matches!(self, Filter::And(_)) { '&' } else { '|' };
                write!(f, "({}", op)?;
                for child in children {
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
            Filter::Not(inner) => write!(f, "(!{})", inner),
            Filter::Equality(av) => write!(f, "({}={})", av.attribute, escape(&av.value)),
            Filter::Approx(av) => write!(f, "({}~={})", av.attribute, escape(&av.value)),
            Filter::GreaterOrEqual(av) => write!(f, "({}>={})", av.attribute, escape(&av.value)),
            Filter::LessOrEqual(av) => write!(f, "({}<={})", av.attribute, escape(&av.value)),
            Filter::Present(attribute) => write!(f, "({}=*)", attribute),
            Filter::Substring(sub) => {
                write!(f, "({}=", sub.attribute)?;
                if let Some(initial) = &sub.initial {
                    write!(f, "{}", escape(initial))?;
                }
                write!(f, "*")?;
                for part in &sub.any {
                    write!(f, "{}*", escape(part))?;
                }
                if let Some(last) = &sub.final_ {
                    write!(f, "{}", escape(last))?;
                }
                write!(f, ")")
            }
        }
    }
}
