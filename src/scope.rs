//! Interned hierarchical scope labels.
//!
//! Labels like "title.function" or "string.escape" are split on `.` and each atom is
//! interned in a process-wide repository. A scope is packed into a single u128:
//! [atom0][atom1]...[atom7], 16 bits per atom storing repository_index + 1 (0 = unused slot).
//! Tokens carry a `Scope` by value so producing them never allocates a string.

use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

pub const MAX_ATOMS: usize = 8;
pub const MAX_REPOSITORY_SIZE: usize = 65534;

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Copy, Default, Hash)]
pub struct Scope {
    /// Packed atoms in MSB-first order for lexicographic comparison
    atoms: u128,
}

impl Scope {
    /// Create a new scope from a dot-separated label, truncating to 8 atoms if longer
    pub fn new(s: &str) -> Scope {
        let mut repo = lock_global_scope_repo();
        repo.build(s.trim())
    }

    /// Returns `None` for an empty label, which grammars use to mean "no scope"
    pub fn from_label(s: &str) -> Option<Scope> {
        let scope = Scope::new(s);
        if scope.is_empty() { None } else { Some(scope) }
    }

    #[inline]
    fn atom_at(self, index: usize) -> u16 {
        debug_assert!(index < MAX_ATOMS);
        let shift = (MAX_ATOMS - 1 - index) * 16;
        ((self.atoms >> shift) & 0xFFFF) as u16
    }

    /// Number of atoms in this scope
    #[inline]
    pub fn len(self) -> u32 {
        MAX_ATOMS as u32 - self.atoms.trailing_zeros() / 16
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.atoms == 0
    }

    /// The individual atoms, outermost first: "title.function" -> ["title", "function"]
    pub fn parts(self) -> Vec<String> {
        let repo = lock_global_scope_repo();
        (0..MAX_ATOMS)
            .map(|i| self.atom_at(i))
            .take_while(|&n| n != 0)
            .map(|n| repo.atom_str(n).to_owned())
            .collect()
    }

    /// Convert back to string form - takes the repository lock, avoid in hot loops
    pub fn build_string(self) -> String {
        self.parts().join(".")
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope(\"{}\")", self.build_string())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.build_string())
    }
}

// The packed form is only meaningful inside one process so dumps store the label.
impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.build_string())
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        Ok(Scope::new(&label))
    }
}

/// Global repository that maps atom strings to indices for deduplication
struct ScopeRepository {
    atoms: Vec<String>,
    atom_index_map: HashMap<String, usize>,
}

impl ScopeRepository {
    fn new() -> Self {
        Self {
            atoms: Vec::new(),
            atom_index_map: HashMap::new(),
        }
    }

    fn atom_to_index(&mut self, atom: &str) -> usize {
        if let Some(&index) = self.atom_index_map.get(atom) {
            return index;
        }

        if self.atoms.len() >= MAX_REPOSITORY_SIZE {
            panic!(
                "Too many atoms in repository: exceeded MAX_REPOSITORY_SIZE of {}",
                MAX_REPOSITORY_SIZE
            );
        }

        let index = self.atoms.len();
        self.atoms.push(atom.to_owned());
        self.atom_index_map.insert(atom.to_owned(), index);
        index
    }

    fn atom_str(&self, atom_number: u16) -> &str {
        debug_assert!(atom_number > 0);
        &self.atoms[(atom_number - 1) as usize]
    }

    fn build(&mut self, s: &str) -> Scope {
        let mut atoms = 0u128;

        // "a..b" has an empty part, skip it rather than leaving a hole in the packing
        let parts = s.split('.').filter(|p| !p.is_empty()).take(MAX_ATOMS);
        for (i, atom_str) in parts.enumerate() {
            let atom_value = (self.atom_to_index(atom_str) + 1) as u128;
            let shift = (MAX_ATOMS - 1 - i) * 16;
            atoms |= atom_value << shift;
        }

        Scope { atoms }
    }
}

static SCOPE_REPO: LazyLock<Mutex<ScopeRepository>> =
    LazyLock::new(|| Mutex::new(ScopeRepository::new()));

fn lock_global_scope_repo() -> MutexGuard<'static, ScopeRepository> {
    SCOPE_REPO.lock().expect("Failed to lock scope repository")
}
