//! Contacts and trust lists for LanLink.
//!
//! ## Trust Lists
//!
//! | List | Effect on incoming transfer requests |
//! |------|--------------------------------------|
//! | Blacklist | Rejected automatically; outgoing transfers are refused |
//! | Whitelist | Accepted automatically into the download directory |
//! | Neither | The user decides |
//!
//! An id is on at most one list: adding it to one removes it from the other.
//! The contact book is stored locally as JSON and never shared.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identity::UserState;

/// Read-only trust decisions consumed by the transfer manager.
pub trait ContactPolicy: Send + Sync {
    /// Whether `id` is blacklisted.
    fn is_in_blacklist(&self, id: &Uuid) -> bool;

    /// Whether `id` is whitelisted.
    fn is_in_whitelist(&self, id: &Uuid) -> bool;

    /// Stored details for `id`.
    fn get_contact(&self, id: &Uuid) -> Option<ContactInfo>;
}

/// A known contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    /// Contact's user id
    pub id: Uuid,
    /// Nickname the contact announced
    pub nickname: String,
    /// Local note about the contact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    /// Last presence state seen
    #[serde(default)]
    pub last_known_state: UserState,
    /// When the contact was last seen online
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl ContactInfo {
    /// Create a contact record.
    #[must_use]
    pub fn new(id: Uuid, nickname: impl Into<String>) -> Self {
        Self {
            id,
            nickname: nickname.into(),
            remark: None,
            last_known_state: UserState::Online,
            last_seen: None,
        }
    }

    /// Set a local remark.
    #[must_use]
    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    /// Record that the contact was just seen in `state`.
    pub fn mark_seen(&mut self, state: UserState) {
        self.last_known_state = state;
        self.last_seen = Some(Utc::now());
    }
}

/// Serializable wrapper for the contact database.
#[derive(Debug, Serialize, Deserialize)]
struct ContactDatabase {
    /// Version of the contact database format
    version: u32,
    /// Known contacts
    contacts: Vec<ContactInfo>,
    /// Blocked ids
    #[serde(default)]
    blacklist: BTreeSet<Uuid>,
    /// Trusted ids
    #[serde(default)]
    whitelist: BTreeSet<Uuid>,
}

/// Contact book with blacklist and whitelist.
#[derive(Debug)]
pub struct ContactBook {
    /// Path to the contact database file
    path: PathBuf,
    contacts: HashMap<Uuid, ContactInfo>,
    blacklist: BTreeSet<Uuid>,
    whitelist: BTreeSet<Uuid>,
}

impl ContactBook {
    /// Load the contact book from the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the book cannot be loaded.
    pub fn load() -> Result<Self> {
        let path = Self::default_path().unwrap_or_else(|| PathBuf::from("contacts.json"));
        Self::load_from(path)
    }

    /// Load from a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path,
                contacts: HashMap::new(),
                blacklist: BTreeSet::new(),
                whitelist: BTreeSet::new(),
            });
        }

        let file = fs::File::open(&path).map_err(|e| {
            Error::ContactStoreError(format!(
                "Failed to open contact book at {}: {}",
                path.display(),
                e
            ))
        })?;

        let reader = BufReader::new(file);
        let db: ContactDatabase = serde_json::from_reader(reader).map_err(|e| {
            Error::ContactStoreError(format!(
                "Failed to parse contact book at {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(Self {
            path,
            contacts: db.contacts.into_iter().map(|c| (c.id, c)).collect(),
            blacklist: db.blacklist,
            whitelist: db.whitelist,
        })
    }

    /// Get the default contact book path.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        crate::config::Config::data_dir().map(|dir| dir.join("contacts.json"))
    }

    /// Save the contact book.
    ///
    /// # Errors
    ///
    /// Returns an error if the book cannot be written.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::ContactStoreError(format!(
                    "Failed to create contact book directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut contacts: Vec<ContactInfo> = self.contacts.values().cloned().collect();
        contacts.sort_by(|a, b| a.nickname.cmp(&b.nickname));

        let db = ContactDatabase {
            version: 1,
            contacts,
            blacklist: self.blacklist.clone(),
            whitelist: self.whitelist.clone(),
        };

        let file = fs::File::create(&self.path).map_err(|e| {
            Error::ContactStoreError(format!(
                "Failed to create contact book at {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &db).map_err(|e| {
            Error::ContactStoreError(format!(
                "Failed to write contact book at {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Add or replace a contact.
    pub fn add_contact(&mut self, contact: ContactInfo) {
        self.contacts.insert(contact.id, contact);
    }

    /// Remove a contact and its list memberships.
    ///
    /// Returns true if the contact was known.
    pub fn remove_contact(&mut self, id: &Uuid) -> bool {
        self.blacklist.remove(id);
        self.whitelist.remove(id);
        self.contacts.remove(id).is_some()
    }

    /// Mutable access to a contact.
    pub fn contact_mut(&mut self, id: &Uuid) -> Option<&mut ContactInfo> {
        self.contacts.get_mut(id)
    }

    /// All contacts, sorted by nickname.
    #[must_use]
    pub fn list(&self) -> Vec<&ContactInfo> {
        let mut contacts: Vec<&ContactInfo> = self.contacts.values().collect();
        contacts.sort_by(|a, b| a.nickname.cmp(&b.nickname));
        contacts
    }

    /// Blacklist `id`, removing it from the whitelist.
    pub fn add_to_blacklist(&mut self, id: Uuid) {
        self.whitelist.remove(&id);
        self.blacklist.insert(id);
    }

    /// Remove `id` from the blacklist.
    pub fn remove_from_blacklist(&mut self, id: &Uuid) {
        self.blacklist.remove(id);
    }

    /// Whitelist `id`, removing it from the blacklist.
    pub fn add_to_whitelist(&mut self, id: Uuid) {
        self.blacklist.remove(&id);
        self.whitelist.insert(id);
    }

    /// Remove `id` from the whitelist.
    pub fn remove_from_whitelist(&mut self, id: &Uuid) {
        self.whitelist.remove(id);
    }

    /// Blacklisted ids.
    #[must_use]
    pub const fn blacklist(&self) -> &BTreeSet<Uuid> {
        &self.blacklist
    }

    /// Whitelisted ids.
    #[must_use]
    pub const fn whitelist(&self) -> &BTreeSet<Uuid> {
        &self.whitelist
    }

    /// Number of contacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Whether there are no contacts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Get the path to the contact book file.
    #[must_use]
    pub const fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl ContactPolicy for ContactBook {
    fn is_in_blacklist(&self, id: &Uuid) -> bool {
        self.blacklist.contains(id)
    }

    fn is_in_whitelist(&self, id: &Uuid) -> bool {
        self.whitelist.contains(id)
    }

    fn get_contact(&self, id: &Uuid) -> Option<ContactInfo> {
        self.contacts.get(id).cloned()
    }
}

impl ContactPolicy for std::sync::RwLock<ContactBook> {
    fn is_in_blacklist(&self, id: &Uuid) -> bool {
        self.read().is_ok_and(|book| book.is_in_blacklist(id))
    }

    fn is_in_whitelist(&self, id: &Uuid) -> bool {
        self.read().is_ok_and(|book| book.is_in_whitelist(id))
    }

    fn get_contact(&self, id: &Uuid) -> Option<ContactInfo> {
        self.read().ok().and_then(|book| book.get_contact(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lists_are_exclusive() {
        let tmp = TempDir::new().unwrap();
        let mut book = ContactBook::load_from(tmp.path().join("contacts.json")).unwrap();
        let id = Uuid::new_v4();

        book.add_to_whitelist(id);
        assert!(book.is_in_whitelist(&id));
        assert!(!book.is_in_blacklist(&id));

        book.add_to_blacklist(id);
        assert!(book.is_in_blacklist(&id));
        assert!(!book.is_in_whitelist(&id));

        book.remove_from_blacklist(&id);
        assert!(!book.is_in_blacklist(&id));
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data").join("contacts.json");

        let alice = Uuid::new_v4();
        let mallory = Uuid::new_v4();

        let mut book = ContactBook::load_from(path.clone()).unwrap();
        book.add_contact(ContactInfo::new(alice, "Alice").with_remark("desk neighbour"));
        book.add_to_whitelist(alice);
        book.add_to_blacklist(mallory);
        book.save().unwrap();

        let loaded = ContactBook::load_from(path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.is_in_whitelist(&alice));
        assert!(loaded.is_in_blacklist(&mallory));

        let contact = loaded.get_contact(&alice).unwrap();
        assert_eq!(contact.nickname, "Alice");
        assert_eq!(contact.remark.as_deref(), Some("desk neighbour"));
        assert!(loaded.get_contact(&mallory).is_none());
    }

    #[test]
    fn test_remove_contact_clears_lists() {
        let tmp = TempDir::new().unwrap();
        let mut book = ContactBook::load_from(tmp.path().join("contacts.json")).unwrap();
        let id = Uuid::new_v4();

        book.add_contact(ContactInfo::new(id, "Bob"));
        book.add_to_whitelist(id);

        assert!(book.remove_contact(&id));
        assert!(!book.is_in_whitelist(&id));
        assert!(book.is_empty());
        assert!(!book.remove_contact(&id));
    }

    #[test]
    fn test_mark_seen() {
        let mut contact = ContactInfo::new(Uuid::new_v4(), "Eve");
        assert!(contact.last_seen.is_none());

        contact.mark_seen(UserState::DoNotDisturb);
        assert_eq!(contact.last_known_state, UserState::DoNotDisturb);
        assert!(contact.last_seen.is_some());
    }

    #[test]
    fn test_shared_book_policy() {
        let tmp = TempDir::new().unwrap();
        let book = ContactBook::load_from(tmp.path().join("contacts.json")).unwrap();
        let shared = std::sync::RwLock::new(book);
        let id = Uuid::new_v4();

        assert!(!shared.is_in_blacklist(&id));
        shared.write().unwrap().add_to_blacklist(id);
        assert!(shared.is_in_blacklist(&id));
    }

    #[test]
    fn test_load_corrupt_file_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("contacts.json");
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(
            ContactBook::load_from(path),
            Err(Error::ContactStoreError(_))
        ));
    }
}
