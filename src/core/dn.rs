use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use crate::core::error::{Error, ErrorKind, Result};

/// One relative name component: `type=value` pairs joined by `+`.
/// Types are lower-cased, pairs are kept sorted so that equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rdn {
    pub pairs: Vec<(String, String)>,
}

/// Distinguished name. `rdns[0]` is the leaf-most component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Dn {
    pub rdns: Vec<Rdn>,
}

impl Rdn {
    pub fn new(attribute: &str, value: &str) -> Self {
        Rdn {
            pairs: vec![(attribute.trim().to_lowercase(), value.to_string())],
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let dn = Dn::parse(input)?;
        match dn.rdns.len() {
            1 => Ok(dn.rdns.into_iter().next().unwrap_or_default()),
            _ => Err(Error::new(
                ErrorKind::InvalidDnSyntax,
                format!("expected a single RDN: {}", input),
            )),
        }
    }

    fn from_pairs(mut pairs: Vec<(String, String)>) -> Self {
        pairs.sort();
        pairs.dedup();
        Rdn { pairs }
    }

    /// Values carried by this RDN for `attribute`.
    pub fn values_of<'a>(&'a self, attribute: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(a, _)| a.eq_ignore_ascii_case(attribute))
            .map(|(_, v)| v.as_str())
    }
}

impl Default for Rdn {
    fn default() -> Self {
        Rdn { pairs: Vec::new() }
    }
}

impl Dn {
    pub fn root() -> Self {
        Dn { rdns: Vec::new() }
    }

    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Parse a string DN such as `cn=foo, o=example`.
    /// Escapes: `\,` `\+` `\=` `\\` and `\XX` hex pairs.
    pub fn parse(input: &str) -> Result<Self> {
        let bad = |why: &str| Error::new(ErrorKind::InvalidDnSyntax, format!("{}: {}", why, input));

        if input.trim().is_empty() {
            return Ok(Dn::root());
        }

        let mut rdns = Vec::new();
        let mut pairs = Vec::new();
        let mut attribute: Option<String> = None;
        let mut current: Vec<u8> = Vec::new();
        // parallel to `current`: byte came from an escape
        let mut escaped: Vec<bool> = Vec::new();
        let bytes = input.as_bytes();
        let mut i = 0;

        // Closes the current type=value pair
        let finish_pair = |attribute: &mut Option<String>,
                           current: &mut Vec<u8>,
                           escaped: &mut Vec<bool>,
                           pairs: &mut Vec<(String, String)>|
         -> Result<()> {
            let attr = attribute.take().ok_or_else(|| bad("missing '='"))?;
            let attr = attr.trim().to_lowercase();
            if attr.is_empty() || !attr.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_') {
                return Err(bad("invalid attribute type"));
            }
            let value = trim_unescaped(&std::mem::take(current), &std::mem::take(escaped))
                .ok_or_else(|| bad("invalid UTF-8"))?;
            pairs.push((attr, value));
            Ok(())
        };

        while i < bytes.len() {
            let b = bytes[i];
            match b {
                b'\\' => {
                    let next = *bytes.get(i + 1).ok_or_else(|| bad("dangling escape"))?;
                    if next.is_ascii_hexdigit() && bytes.get(i + 2).map_or(false, |c| c.is_ascii_hexdigit()) {
                        let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).map_err(|_| bad("bad hex escape"))?;
                        let byte = u8::from_str_radix(hex, 16).map_err(|_| bad("bad hex escape"))?;
                        current.push(byte);
                        escaped.push(true);
                        i += 3;
                    } else {
                        current.push(next);
                        escaped.push(true);
                        i += 2;
                    }
                    continue;
                }
                b'=' if attribute.is_none() => {
                    let attr = String::from_utf8(std::mem::take(&mut current)).map_err(|_| bad("invalid UTF-8"))?;
                    escaped.clear();
                    attribute = Some(attr);
                }
                b'+' => {
                    finish_pair(&mut attribute, &mut current, &mut escaped, &mut pairs)?;
                }
                b',' | b';' => {
                    finish_pair(&mut attribute, &mut current, &mut escaped, &mut pairs)?;
                    rdns.push(Rdn::from_pairs(std::mem::take(&mut pairs)));
                }
                _ => {
                    current.push(b);
                    escaped.push(false);
                }
            }
            i += 1;
        }
        finish_pair(&mut attribute, &mut current, &mut escaped, &mut pairs)?;
        rdns.push(Rdn::from_pairs(pairs));

        Ok(Dn { rdns })
    }

    /// Leaf-most component.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    pub fn depth(&self) -> usize {
        self.rdns.len()
    }

    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            return None;
        }
        Some(Dn { rdns: self.rdns[1..].to_vec() })
    }

    /// New DN with `rdn` prepended below `self`.
    pub fn child(&self, rdn: Rdn) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        Dn { rdns }
    }

    /// True when `self` is a proper ancestor of `other`, at any depth.
    pub fn is_ancestor_of(&self, other: &Dn) -> bool {
        if other.rdns.len() <= self.rdns.len() {
            return false;
        }
        let offset = other.rdns.len() - self.rdns.len();
        other.rdns[offset..] == self.rdns[..]
    }

    /// True when `self` is the immediate parent of `other`.
    pub fn is_parent_of(&self, other: &Dn) -> bool {
        other.rdns.len() == self.rdns.len() + 1 && self.is_ancestor_of(other)
    }

    /// Equal to `other` or an ancestor of it.
    pub fn contains(&self, other: &Dn) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// Store key of the entry named by this DN.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

// Trims surrounding whitespace that did not come from an escape.
fn trim_unescaped(bytes: &[u8], escaped: &[bool]) -> Option<String> {
    let loose = |i: &usize| bytes[*i].is_ascii_whitespace() && !escaped[*i];
    let start = (0..bytes.len()).find(|i| !loose(i)).unwrap_or(bytes.len());
    let end = (start..bytes.len()).rfind(|i| !loose(i)).map_or(start, |i| i + 1);
    String::from_utf8(bytes[start..end].to_vec()).ok()
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            }
            '#' if i == 0 => out.push_str("\\#"),
            ' ' if i == 0 || i == last => out.push_str("\\ "),
            c if c.is_ascii_control() => out.push_str(&format!("\\{:02x}", c as u8)),
            _ => out.push(c),
        }
    }
    out
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, (attr, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                write!(f, "+")?;
            }
            write!(f, "{}={}", attr, escape_value(value))?;
        }
        Ok(())
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", rdn)?;
        }
        Ok(())
    }
}

impl FromStr for Dn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Dn::parse(s)
    }
}

impl Serialize for Dn {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Dn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Dn::parse(&s).map_err(serde::de::Error::custom)
    }
}
