use crate::kv::client::IndexQuery;
use crate::core::types::OBJECT_CLASS;
use crate::query::ast::Filter;

const LOWEST: &str = "\u{0}";
const HIGHEST: &str = "\u{10ffff}";

/// Candidate-narrowing plan: one index lookup on one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPlan {
    pub attribute: String,
    pub query: IndexQuery,
}

/// Picks at most one indexed attribute to narrow a subtree search.
pub struct QueryPlanner<'a> {
    pub indexed: &'a [String],
}

impl<'a> QueryPlanner<'a> {
    pub fn new(indexed: &'a [String]) -> Self {
        QueryPlanner { indexed }
    }

    /// First indexable clause, searching inside `&`. `|` and `!` never narrow.
    /// Returns `None` when the search must fall back to a full scan.
    pub fn plan(&self, filter: &Filter) -> Option<IndexPlan> {
        if let Filter::And(children) = filter {
            return children.iter().find_map(|child| self.plan(child));
        }

        let attribute = filter.attribute()?;
        if !self.indexed.iter().any(|name| name == attribute) {
            return None;
        }

        let query = match filter {
            // objectclass values are indexed lower-cased, like the matcher sees them
            Filter::Equality(av) if av.attribute == OBJECT_CLASS => IndexQuery::Exact(av.value.to_lowercase()),
            Filter::Equality(av) => IndexQuery::Exact(av.value.clone()),
            // index records are exact-case; approx ignores case
            Filter::Approx(_) => return None,
            Filter::Present(_) => IndexQuery::Range(LOWEST.to_string(), HIGHEST.to_string()),
            Filter::GreaterOrEqual(av) => IndexQuery::Range(av.value.clone(), HIGHEST.to_string()),
            Filter::LessOrEqual(av) => IndexQuery::Range(LOWEST.to_string(), av.value.clone()),
            Filter::Substring(sub) => {
                // only a leading literal bounds the range
                let initial = sub.initial.as_ref()?;
                IndexQuery::Range(initial.clone(), format!("{}{}", initial, HIGHEST))
            }
            Filter::And(_) | Filter::Or(_) | Filter::Not(_) => return None,
        };

        Some(IndexPlan { attribute: attribute.to_string(), query })
    }
}
