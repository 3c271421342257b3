use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use chrono::{DateTime, SecondsFormat, Utc};
use crate::core::dn::Dn;
use crate::core::error::Result;

pub const OBJECT_CLASS: &str = "objectclass";

// Operational attributes, maintained by the backend on every write
pub const CTIME: &str = "_ctime";
pub const CREATED_FROM: &str = "_createdfrom";
pub const CREATED_BY: &str = "_createdby";
pub const MTIME: &str = "_mtime";
pub const MODIFIED_FROM: &str = "_modifiedfrom";
pub const MODIFIED_BY: &str = "_modifiedby";

pub fn is_operational(name: &str) -> bool {
    name.starts_with('_')
}

/// Attribute names are case-insensitive; every accessor lower-cases once here.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Ordered mapping from attribute name to an ordered set of distinct values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Vec<String>>", into = "BTreeMap<String, Vec<String>>")]
pub struct Attributes {
    map: BTreeMap<String, Vec<String>>,
}

impl Attributes {
    pub fn new() -> Self {
        Attributes { map: BTreeMap::new() }
    }

    pub fn with(mut self, name: &str, values: &[&str]) -> Self {
        self.add_values(name, values.iter().map(|v| v.to_string()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.map.get(&normalize_name(name)).map(|v| v.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(&normalize_name(name))
    }

    pub fn has_value(&self, name: &str, value: &str) -> bool {
        self.get(name).map_or(false, |values| values.iter().any(|v| v == value))
    }

    /// Appends values not already present. Returns true when anything changed.
    pub fn add_values<I: IntoIterator<Item = String>>(&mut self, name: &str, values: I) -> bool {
        let slot = self.map.entry(normalize_name(name)).or_default();
        let before = slot.len();
        for value in values {
            if !slot.contains(&value) {
                slot.push(value);
            }
        }
        let changed = slot.len() != before;
        if slot.is_empty() {
            self.map.remove(&normalize_name(name));
        }
        changed
    }

    /// Removes the named values; drops the attribute once it is empty.
    pub fn remove_values(&mut self, name: &str, values: &[String]) -> bool {
        let key = normalize_name(name);
        let Some(slot) = self.map.get_mut(&key) else {
            return false;
        };
        let before = slot.len();
        slot.retain(|v| !values.contains(v));
        let changed = slot.len() != before;
        if slot.is_empty() {
            self.map.remove(&key);
        }
        changed
    }

    /// Overwrites the attribute; an empty value list drops it.
    pub fn replace(&mut self, name: &str, values: Vec<String>) {
        let key = normalize_name(name);
        let mut distinct: Vec<String> = Vec::with_capacity(values.len());
        for value in values {
            if !distinct.contains(&value) {
                distinct.push(value);
            }
        }
        if distinct.is_empty() {
            self.map.remove(&key);
        } else {
            self.map.insert(key, distinct);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.map.remove(&normalize_name(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Set equality of one attribute's values between two attribute maps.
    pub fn same_values(&self, other: &Attributes, name: &str) -> bool {
        match (self.get(name), other.get(name)) {
            (None, None) => true,
            (Some(a), Some(b)) => a.len() == b.len() && a.iter().all(|v| b.contains(v)),
            _ => false,
        }
    }

    /// Copy without operational attributes.
    pub fn without_operational(&self) -> Attributes {
        Attributes {
            map: self
                .map
                .iter()
                .filter(|(k, _)| !is_operational(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl From<BTreeMap<String, Vec<String>>> for Attributes {
    fn from(raw: BTreeMap<String, Vec<String>>) -> Self {
        let mut attributes = Attributes::new();
        for (name, values) in raw {
            attributes.add_values(&name, values);
        }
        attributes
    }
}

impl From<Attributes> for BTreeMap<String, Vec<String>> {
    fn from(attributes: Attributes) -> Self {
        attributes.map
    }
}

/// Canonical entry record as persisted in the entries bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub dn: String,
    pub attributes: Attributes,
}

impl Entry {
    pub fn new(dn: &Dn, attributes: Attributes) -> Self {
        Entry {
            dn: dn.to_string(),
            attributes,
        }
    }

    pub fn parsed_dn(&self) -> Result<Dn> {
        Dn::parse(&self.dn)
    }

    /// Lower-cases `objectclass` values prior to persistence.
    pub fn normalize(&mut self) {
        if let Some(values) = self.attributes.remove(OBJECT_CLASS) {
            let lowered = values.into_iter().map(|v| v.to_lowercase()).collect();
            self.attributes.replace(OBJECT_CLASS, lowered);
        }
    }

    /// Sets creation metadata once and refreshes modification metadata.
    pub fn stamp(&mut self, actor: &str, origin: &str, now: DateTime<Utc>) {
        let time = iso_time(now);
        let attrs = &mut self.attributes;
        if !attrs.contains(CTIME) {
            attrs.replace(CTIME, vec![time.clone()]);
        }
        if !attrs.contains(CREATED_FROM) {
            attrs.replace(CREATED_FROM, vec![origin.to_string()]);
        }
        if !attrs.contains(CREATED_BY) {
            attrs.replace(CREATED_BY, vec![actor.to_string()]);
        }
        attrs.replace(MTIME, vec![time]);
        attrs.replace(MODIFIED_FROM, vec![origin.to_string()]);
        attrs.replace(MODIFIED_BY, vec![actor.to_string()]);
    }
}

/// `YYYY-MM-DDTHH:MM:SSZ`
pub fn iso_time(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        let mut attrs = Attributes::new().with("CN", &["foo"]);
        assert!(attrs.contains("cn"));
        attrs.add_values("Cn", vec!["bar".to_string(), "foo".to_string()]);
        assert_eq!(attrs.get("cN").unwrap(), &["foo".to_string(), "bar".to_string()]);
        assert_eq!(attrs.names().collect::<Vec<_>>(), vec!["cn"]);
    }

    #[test]
    fn add_then_delete_restores_state() {
        let mut attrs = Attributes::new().with("mail", &["a@x", "b@x"]);
        let before = attrs.clone();
        attrs.add_values("mail", vec!["c@x".to_string()]);
        attrs.remove_values("mail", &["c@x".to_string()]);
        assert_eq!(attrs, before);
    }

    #[test]
    fn empty_sets_drop_the_attribute() {
        let mut attrs = Attributes::new().with("l", &["seattle"]);
        attrs.remove_values("l", &["seattle".to_string()]);
        assert!(!attrs.contains("l"));
        attrs.replace("sn", Vec::new());
        assert!(attrs.is_empty());
    }

    #[test]
    fn deserialization_normalizes_names() {
        let json = r#"{"dn":"o=test","attributes":{"ObjectClass":["Top","top"],"o":["test"]}}"#;
        let mut entry: Entry = serde_json::from_str(json).unwrap();
        entry.normalize();
        assert_eq!(entry.attributes.get("objectclass").unwrap(), &["top".to_string()]);
    }

    #[test]
    fn stamp_keeps_creation_metadata() {
        let mut entry = Entry::new(&Dn::parse("o=test").unwrap(), Attributes::new());
        let first = Utc::now();
        entry.stamp("cn=root", "req-1", first);
        let ctime = entry.attributes.get(CTIME).unwrap().to_vec();
        entry.stamp("cn=admin", "req-2", first + chrono::Duration::seconds(5));
        assert_eq!(entry.attributes.get(CTIME).unwrap(), ctime.as_slice());
        assert_eq!(entry.attributes.get(CREATED_BY).unwrap(), &["cn=root".to_string()]);
        assert_eq!(entry.attributes.get(MODIFIED_BY).unwrap(), &["cn=admin".to_string()]);
        assert_ne!(entry.attributes.get(MTIME).unwrap(), ctime.as_slice());
    }
}
