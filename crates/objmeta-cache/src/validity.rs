//! Validity tokens: 20-byte fingerprints of external state that invalidate a
//! whole on-disk cache when they change.

use std::fmt;

use objmeta_types::{ObjectId, TypeError};

/// Length in bytes of a [`Fingerprint`].
pub const FINGERPRINT_LEN: usize = 20;

/// Summary of whatever external state a cache's contents depend on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// The all-zero fingerprint written by caches without a provider.
    pub const fn zero() -> Self {
        Self([0u8; FINGERPRINT_LEN])
    }

    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; FINGERPRINT_LEN]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 40-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        let arr: [u8; FINGERPRINT_LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| TypeError::InvalidLength {
                    expected: FINGERPRINT_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Computes the current fingerprint for a cache.
///
/// Called once when a cache validates its file and once per flush. Any
/// `Fn() -> Fingerprint` closure is a provider, and so is a fixed
/// [`Fingerprint`].
pub trait ValidityProvider: Send + Sync {
    fn fingerprint(&self) -> Fingerprint;
}

impl<F> ValidityProvider for F
where
    F: Fn() -> Fingerprint + Send + Sync,
{
    fn fingerprint(&self) -> Fingerprint {
        self()
    }
}

impl ValidityProvider for Fingerprint {
    fn fingerprint(&self) -> Fingerprint {
        *self
    }
}

/// Builds a [`Fingerprint`] from labelled sections of state.
///
/// Each section contributes its label, its length and its bytes, so moving
/// bytes from one section to the next changes the result.
pub struct ValidityHasher {
    hasher: blake3::Hasher,
}

impl ValidityHasher {
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
        }
    }

    /// Feed one labelled section.
    pub fn section(&mut self, label: &str, data: &[u8]) -> &mut Self {
        self.hasher.update(label.as_bytes());
        self.hasher.update(&(data.len() as u64).to_be_bytes());
        self.hasher.update(data);
        self
    }

    pub fn finish(&self) -> Fingerprint {
        let mut out = [0u8; FINGERPRINT_LEN];
        self.hasher.finalize_xof().fill(&mut out);
        Fingerprint(out)
    }
}

impl Default for ValidityHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Fingerprint of the tables that rewrite commit-graph traversal: parent
/// overrides (`grafts`: commit to replacement parent list) and object
/// replacements (original to replacement).
///
/// Results cached per commit (generation numbers, reachability bits) are only
/// valid while both tables stay the same. Entries are hashed in sorted order,
/// so the order callers list them in does not matter.
pub fn graph_validity(
    grafts: &[(ObjectId, Vec<ObjectId>)],
    replacements: &[(ObjectId, ObjectId)],
) -> Fingerprint {
    let mut sorted_grafts: Vec<&(ObjectId, Vec<ObjectId>)> = grafts.iter().collect();
    sorted_grafts.sort_by(|a, b| a.0.cmp(&b.0));
    let mut graft_bytes = Vec::new();
    for (commit, parents) in sorted_grafts {
        graft_bytes.extend_from_slice(commit.as_bytes());
        graft_bytes.extend_from_slice(&(parents.len() as u32).to_be_bytes());
        for parent in parents {
            graft_bytes.extend_from_slice(parent.as_bytes());
        }
    }

    let mut sorted_replacements = replacements.to_vec();
    sorted_replacements.sort();
    let mut replace_bytes = Vec::with_capacity(sorted_replacements.len() * 40);
    for (original, replacement) in &sorted_replacements {
        replace_bytes.extend_from_slice(original.as_bytes());
        replace_bytes.extend_from_slice(replacement.as_bytes());
    }

    ValidityHasher::new()
        .section("grafts", &graft_bytes)
        .section("replace", &replace_bytes)
        .finish()
}
