use std::sync::Arc;
use chrono::Utc;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use crate::core::config::Config;
use crate::core::dn::{Dn, Rdn};
use crate::core::error::Result;
use crate::core::types::{iso_time, Attributes, Entry, OBJECT_CLASS};
use crate::kv::client::{KvStore, PutOptions};
use crate::protocol::request::Change;
use crate::storage::entry_store::EntryStore;
use crate::storage::sequence::SequenceSource;

pub const CHANGELOG_OBJECT_CLASS: &str = "changelogentry";
pub const REDACTED: &str = "[REDACTED]";

/// Attributes the changelog bucket carries store-level indexes for.
pub const CHANGELOG_INDEXES: [&str; 4] = ["targetdn", "changetime", "changenumber", "changetype"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Delete,
    Modify,
    #[serde(rename = "modrdn")]
    ModDn,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Add => "add",
            ChangeType::Delete => "delete",
            ChangeType::Modify => "modify",
            ChangeType::ModDn => "modrdn",
        }
    }

    /// Persistent search mask bit.
    pub fn mask(&self) -> u8 {
        match self {
            ChangeType::Add => 1,
            ChangeType::Delete => 2,
            ChangeType::Modify => 4,
            ChangeType::ModDn => 8,
        }
    }
}

/// What a change record describes.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangePayload {
    /// Full attribute map (add, and the pre-delete snapshot)
    Entry(Attributes),
    /// Applied modifications, in request order
    Modifications(Vec<Change>),
    Rename {
        new_rdn: String,
        delete_old_rdn: bool,
        new_superior: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub change_number: u64,
    pub target_dn: String,
    pub change_type: ChangeType,
    pub change_time: String,
    pub payload: ChangePayload,
}

/// `cn=changelog`
pub fn changelog_root() -> Dn {
    Dn { rdns: vec![Rdn::new("cn", "changelog")] }
}

pub fn is_changelog_dn(dn: &Dn) -> bool {
    changelog_root().contains(dn)
}

impl ChangeRecord {
    /// `changenumber=<n>, cn=changelog`
    pub fn dn(&self) -> Dn {
        changelog_root().child(Rdn::new("changenumber", &self.change_number.to_string()))
    }

    /// Directory form of the record, as stored and as matched by
    /// changelog-scoped searches.
    pub fn to_entry(&self) -> Result<Entry> {
        let mut attributes = Attributes::new()
            .with("targetdn", &[self.target_dn.as_str()])
            .with("changetime", &[self.change_time.as_str()])
            .with("changenumber", &[self.change_number.to_string().as_str()])
            .with("changetype", &[self.change_type.as_str()])
            .with(OBJECT_CLASS, &[CHANGELOG_OBJECT_CLASS]);

        match &self.payload {
            ChangePayload::Entry(snapshot) => {
                attributes.replace("changes", vec![serde_json::to_string(snapshot)?]);
            }
            ChangePayload::Modifications(changes) => {
                attributes.replace("changes", vec![serde_json::to_string(changes)?]);
            }
            ChangePayload::Rename { new_rdn, delete_old_rdn, new_superior } => {
                attributes.replace("newrdn", vec![new_rdn.clone()]);
                let flag = if *delete_old_rdn { "TRUE" } else { "FALSE" };
                attributes.replace("deleteoldrdn", vec![flag.to_string()]);
                if let Some(superior) = new_superior {
                    attributes.replace("newsuperior", vec![superior.clone()]);
                }
            }
        }

        Ok(Entry::new(&self.dn(), attributes))
    }
}

/// Appends sequence-numbered change records to the changelog bucket.
pub struct ChangelogWriter {
    entries: EntryStore,
    sequence: Arc<dyn SequenceSource>,
    password_attributes: Vec<String>,
}

impl ChangelogWriter {
    pub fn new(store: Arc<dyn KvStore>, config: &Config, sequence: Arc<dyn SequenceSource>) -> Self {
        ChangelogWriter {
            entries: EntryStore::new(store, &config.changelog_bucket()),
            sequence,
            password_attributes: config.password_attributes.clone(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.entries.bucket
    }

    fn is_password(&self, attribute: &str) -> bool {
        self.password_attributes.iter().any(|p| p.eq_ignore_ascii_case(attribute))
    }

    /// Replaces every password value with a marker.
    pub fn redact(&self, payload: ChangePayload) -> ChangePayload {
        match payload {
            ChangePayload::Entry(mut attributes) => {
                let secret: Vec<String> = attributes
                    .names()
                    .filter(|name| self.is_password(name))
                    .map(String::from)
                    .collect();
                for name in secret {
                    attributes.replace(&name, vec![REDACTED.to_string()]);
                }
                ChangePayload::Entry(attributes)
            }
            ChangePayload::Modifications(changes) => ChangePayload::Modifications(
                changes
                    .into_iter()
                    .map(|mut change| {
                        if self.is_password(&change.attribute) {
                            change.values = change.values.iter().map(|_| REDACTED.to_string()).collect();
                        }
                        change
                    })
                    .collect(),
            ),
            rename => rename,
        }
    }

    /// Writes one record. Failure fails the calling request.
    pub async fn append(
        &self,
        log_id: &str,
        target_dn: &Dn,
        change_type: ChangeType,
        payload: ChangePayload,
    ) -> Result<ChangeRecord> {
        let record = ChangeRecord {
            change_number: self.sequence.next(),
            target_dn: target_dn.to_string(),
            change_type,
            change_time: iso_time(Utc::now()),
            payload: self.redact(payload),
        };
        let entry = record.to_entry()?;

        let mut options = PutOptions::new();
        for attribute in CHANGELOG_INDEXES {
            if let Some(values) = entry.attributes.get(attribute) {
                for value in values {
                    options = options.index(attribute, value);
                }
            }
        }

        log::debug!("{} changelog #{} {} {}", log_id, record.change_number, change_type.as_str(), record.target_dn);
        self.entries.put(&entry, options).await?;
        Ok(record)
    }

    /// Raw changelog payload of a stored record.
    pub fn changes_of(entry: &Entry) -> Option<Value> {
        let raw = entry.attributes.get("changes")?.first()?;
        serde_json::from_str(raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryStore;
    use crate::protocol::request::ChangeOperation;
    use crate::storage::sequence::CounterSequence;

    fn writer(store: Arc<MemoryStore>) -> ChangelogWriter {
        let config = Config { bucket: "people".to_string(), ..Config::default() };
        ChangelogWriter::new(store, &config, Arc::new(CounterSequence::default()))
    }

    #[tokio::test]
    async fn records_are_numbered_and_redacted() {
        let store = Arc::new(MemoryStore::new());
        let changelog = writer(store.clone());
        let target = Dn::parse("cn=a, o=test").unwrap();

        let snapshot = Attributes::new().with("cn", &["a"]).with("userPassword", &["secret"]);
        let first = changelog
            .append("t", &target, ChangeType::Add, ChangePayload::Entry(snapshot))
            .await
            .unwrap();
        let changes = vec![Change::new(ChangeOperation::Replace, "userpassword", &["s1", "s2"])];
        let second = changelog
            .append("t", &target, ChangeType::Modify, ChangePayload::Modifications(changes))
            .await
            .unwrap();

        assert_eq!((first.change_number, second.change_number), (1, 2));
        assert_eq!(first.dn().to_string(), "changenumber=1, cn=changelog");

        let stored = store.peek("people_changelog", "changenumber=2, cn=changelog").unwrap();
        let text = stored.to_string();
        assert!(!text.contains("s1") && !text.contains("secret"));
        assert!(text.contains(REDACTED));

        let entry: Entry = serde_json::from_value(stored).unwrap();
        assert_eq!(entry.attributes.get("changetype").unwrap(), &["modify".to_string()]);
        let payload = ChangelogWriter::changes_of(&entry).unwrap();
        assert_eq!(payload[0]["operation"], "replace");
    }

    #[test]
    fn rename_records_carry_rdn_fields() {
        let record = ChangeRecord {
            change_number: 9,
            target_dn: "cn=a, o=test".to_string(),
            change_type: ChangeType::ModDn,
            change_time: "2024-01-01T00:00:00Z".to_string(),
            payload: ChangePayload::Rename {
                new_rdn: "cn=b".to_string(),
                delete_old_rdn: true,
                new_superior: None,
            },
        };
        let entry = record.to_entry().unwrap();
        assert_eq!(entry.attributes.get("deleteoldrdn").unwrap(), &["TRUE".to_string()]);
        assert!(!entry.attributes.contains("newsuperior"));
        assert!(is_changelog_dn(&entry.parsed_dn().unwrap()));
    }
}
