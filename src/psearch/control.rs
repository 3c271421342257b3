use crate::storage::changelog::ChangeType;

/// Persistent search request control (draft-ietf-ldapext-psearch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistentSearchControl {
    /// Bit mask of change types: add=1, delete=2, modify=4, moddn=8
    pub change_types: u8,
    /// Skip the initial result set
    pub changes_only: bool,
    /// Attach entry change notifications to delivered entries
    pub return_ecs: bool,
}

impl PersistentSearchControl {
    pub const ALL_CHANGES: u8 = 1 | 2 | 4 | 8;

    pub fn new(change_types: u8, changes_only: bool, return_ecs: bool) -> Self {
        PersistentSearchControl { change_types, changes_only, return_ecs }
    }

    pub fn wants(&self, change_type: ChangeType) -> bool {
        self.change_types & change_type.mask() != 0
    }
}

/// Annotation carried by entries delivered to a persistent search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryChangeNotification {
    pub change_type: ChangeType,
    /// Former DN, set for renames only
    pub previous_dn: Option<String>,
    pub change_number: u64,
}
