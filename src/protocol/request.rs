use serde::{Serialize, Deserialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Attributes;
use crate::psearch::control::PersistentSearchControl;
use crate::query::ast::Filter;

pub const PERSISTENT_SEARCH_OID: &str = "2.16.840.1.113730.3.4.3";
pub const HIDDEN_ATTRIBUTES_OID: &str = "1.3.6.1.4.1.38678.1";
pub const ENTRY_CHANGE_NOTIFICATION_OID: &str = "2.16.840.1.113730.3.4.7";

/// Request control, already decoded by the protocol layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    PersistentSearch(PersistentSearchControl),
    /// Return operational attributes with search results
    HiddenAttributes,
    Other { oid: String, critical: bool },
}

impl Control {
    pub fn oid(&self) -> &str {
        match self {
            Control::PersistentSearch(_) => PERSISTENT_SEARCH_OID,
            Control::HiddenAttributes => HIDDEN_ATTRIBUTES_OID,
            Control::Other { oid, .. } => oid,
        }
    }
}

/// Per-request context shared by every operation.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub log_id: String,
    pub connection_id: String,
    /// DN bound on the connection, empty when anonymous
    pub bind_dn: String,
    pub controls: Vec<Control>,
}

impl RequestMeta {
    pub fn new(connection_id: &str) -> Self {
        RequestMeta {
            log_id: uuid::Uuid::new_v4().to_string(),
            connection_id: connection_id.to_string(),
            bind_dn: String::new(),
            controls: Vec::new(),
        }
    }

    pub fn bound_as(mut self, bind_dn: &str) -> Self {
        self.bind_dn = bind_dn.to_string();
        self
    }

    pub fn with_control(mut self, control: Control) -> Self {
        self.controls.push(control);
        self
    }

    pub fn shows_operational(&self) -> bool {
        self.controls.iter().any(|c| matches!(c, Control::HiddenAttributes))
    }

    pub fn persistent_search(&self) -> Option<&PersistentSearchControl> {
        self.controls.iter().find_map(|c| match c {
            Control::PersistentSearch(control) => Some(control),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AddRequest {
    pub meta: RequestMeta,
    pub dn: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub meta: RequestMeta,
    pub dn: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Add,
    Delete,
    Replace,
}

/// One attribute modification; applied in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub operation: ChangeOperation,
    pub attribute: String,
    pub values: Vec<String>,
}

impl Change {
    pub fn new(operation: ChangeOperation, attribute: &str, values: &[&str]) -> Self {
        Change {
            operation,
            attribute: attribute.trim().to_lowercase(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModifyRequest {
    pub meta: RequestMeta,
    pub dn: String,
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone)]
pub struct ModifyDnRequest {
    pub meta: RequestMeta,
    pub dn: String,
    pub new_rdn: String,
    pub delete_old_rdn: bool,
    pub new_superior: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompareRequest {
    pub meta: RequestMeta,
    pub dn: String,
    pub attribute: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct BindRequest {
    pub meta: RequestMeta,
    pub dn: String,
    pub version: u32,
    /// Authentication mechanism; only `simple` is served
    pub authentication: String,
    pub credentials: String,
}

impl BindRequest {
    pub fn simple(meta: RequestMeta, dn: &str, credentials: &str) -> Self {
        BindRequest {
            meta,
            dn: dn.to_string(),
            version: 3,
            authentication: "simple".to_string(),
            credentials: credentials.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Base,
    One,
    Sub,
}

impl Scope {
    pub fn parse(input: &str) -> Result<Self> {
        match input.to_lowercase().as_str() {
            "base" | "baseobject" => Ok(Scope::Base),
            "one" | "onelevel" => Ok(Scope::One),
            "sub" | "subtree" => Ok(Scope::Sub),
            other => Err(Error::new(ErrorKind::ProtocolError, format!("invalid scope {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub meta: RequestMeta,
    pub base: String,
    pub scope: Scope,
    pub filter: Filter,
    /// Seconds; 0 falls back to the configured default
    pub time_limit: u64,
    /// Entries; 0 is unlimited
    pub size_limit: usize,
}

impl SearchRequest {
    pub fn new(meta: RequestMeta, base: &str, scope: Scope, filter: Filter) -> Self {
        SearchRequest {
            meta,
            base: base.to_string(),
            scope,
            filter,
            time_limit: 0,
            size_limit: 0,
        }
    }
}
