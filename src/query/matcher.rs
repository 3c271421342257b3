use std::cmp::Ordering;
use regex::Regex;
use crate::core::types::{Attributes, OBJECT_CLASS};
use crate::query::ast::{AttributeValue, Filter, SubstringFilter};

/// Evaluates filters against an entry's attribute map.
///
/// Attribute names are case-insensitive. Values compare exactly, except
/// `objectclass` (persisted lower-cased) and approximate matches, which
/// ignore case. Ordering filters compare byte-wise.
pub struct FilterMatcher;

impl FilterMatcher {
    pub fn matches(filter: &Filter, attributes: &Attributes) -> bool {
        match filter {
            Filter::And(children) => children.iter().all(|f| Self::matches(f, attributes)),
            Filter::Or(children) => children.iter().any(|f| Self::matches(f, attributes)),
            Filter::Not(inner) => !Self::matches(inner, attributes),
            Filter::Present(attribute) => attributes.contains(attribute),
            Filter::Equality(av) => Self::any_value(attributes, av, |stored, wanted| {
                if av.attribute == OBJECT_CLASS {
                    stored.eq_ignore_ascii_case(wanted)
                } else {
                    stored == wanted
                }
            }),
            Filter::Approx(av) => {
                Self::any_value(attributes, av, |stored, wanted| stored.to_lowercase() == wanted.to_lowercase())
            }
            Filter::GreaterOrEqual(av) => {
                Self::any_value(attributes, av, |stored, wanted| stored.cmp(wanted) != Ordering::Less)
            }
            Filter::LessOrEqual(av) => {
                Self::any_value(attributes, av, |stored, wanted| stored.cmp(wanted) != Ordering::Greater)
            }
            Filter::Substring(sub) => Self::matches_substring(attributes, sub),
        }
    }

    fn any_value<F>(attributes: &Attributes, av: &AttributeValue, test: F) -> bool
    where
        F: Fn(&str, &str) -> bool,
    {
        attributes
            .get(&av.attribute)
            .map_or(false, |values| values.iter().any(|v| test(v, &av.value)))
    }

    fn matches_substring(attributes: &Attributes, sub: &SubstringFilter) -> bool {
        let Some(values) = attributes.get(&sub.attribute) else {
            return false;
        };

        // Convert the pattern to an anchored regex with literal parts
        let mut pattern = String::from("^");
        if let Some(initial) = &sub.initial {
            pattern.push_str(&regex::escape(initial));
        }
        pattern.push_str(".*");
        for part in &sub.any {
            pattern.push_str(&regex::escape(part));
            pattern.push_str(".*");
        }
        if let Some(last) = &sub.final_ {
            pattern.push_str(&regex::escape(last));
        }
        pattern.push('$');

        let Ok(regex) = Regex::new(&format!("(?s){}", pattern)) else {
            return false;
        };
        values.iter().any(|v| regex.is_match(v))
    }
}

impl Filter {
    pub fn matches(&self, attributes: &Attributes) -> bool {
        FilterMatcher::matches(self, attributes)
    }
}
