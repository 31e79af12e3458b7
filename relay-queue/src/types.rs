use std::fmt;

use sha2::{Digest, Sha256};

/// Identifier for a queued delivery job
///
/// A ULID, so identifiers sort by creation time and double as file names for
/// the file-backed record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId {
    id: ulid::Ulid,
}

impl JobId {
    /// Parse a job ID from a filename like `01ARZ3NDEKTSV4RRFFQ69G5FAV.bin`
    ///
    /// Rejects path separators, traversal patterns and anything that is not a ULID.
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(".bin")?;
        let id = ulid::Ulid::from_string(stem).ok()?;

        Some(Self { id })
    }

    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Generate a new unique job ID
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    #[must_use]
    pub fn filename(&self) -> String {
        format!("{}.bin", self.id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl serde::Serialize for JobId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { id })
    }
}

/// Content address of a raw message in the blob store: hex SHA-256 of its bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MessageKey(String);

impl MessageKey {
    #[must_use]
    pub fn for_content(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Accept an externally supplied key, provided it looks like one of ours
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        (key.len() == 64 && key.bytes().all(|b| b.is_ascii_hexdigit()))
            .then(|| Self(key.to_ascii_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a worker holding a lease on a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(ulid::Ulid);

impl WorkerId {
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for WorkerId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for WorkerId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ulid::Ulid::from_string(&s)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_filename_validation() {
        assert!(JobId::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.bin").is_some());

        assert!(JobId::from_filename("../etc/passwd.bin").is_none());
        assert!(JobId::from_filename("foo/bar.bin").is_none());
        assert!(JobId::from_filename("..\\windows\\system32.bin").is_none());
        assert!(JobId::from_filename("not_a_valid_ulid.bin").is_none());
        assert!(JobId::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.eml").is_none());
    }

    #[test]
    fn job_id_filename_matches_parse() {
        let id = JobId::generate();
        assert_eq!(JobId::from_filename(&id.filename()), Some(id));
    }

    #[test]
    fn message_key_is_content_addressed() {
        let a = MessageKey::for_content(b"hello");
        let b = MessageKey::for_content(b"hello");
        let c = MessageKey::for_content(b"hello!");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(
            a.as_str(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(MessageKey::parse(a.as_str()), Some(a));
        assert_eq!(MessageKey::parse("../../etc/passwd"), None);
    }
}
