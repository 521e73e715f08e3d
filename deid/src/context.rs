//! State shared by every record of a single run.
use rand::distributions::Uniform;
use rand::Rng;

const DEFAULT_SALT_LEN: usize = 12;

/// Per-run state: the default hashing salt and the naming counter.
///
/// A fresh context is created for every top-level command,
/// so neither value leaks from one run into the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    default_salt: String,
    name_counter: u64,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    /// Create a context with a randomly generated default salt
    /// of 12 uppercase ASCII letters.
    pub fn new() -> Self {
        let letters = Uniform::new_inclusive(b'A', b'Z');
        let default_salt: String = rand::thread_rng()
            .sample_iter(letters)
            .take(DEFAULT_SALT_LEN)
            .map(char::from)
            .collect();
        Self::with_default_salt(default_salt)
    }

    /// Create a context with a known default salt.
    pub fn with_default_salt(salt: impl Into<String>) -> Self {
        RunContext {
            default_salt: salt.into(),
            name_counter: 0,
        }
    }

    /// The salt used by hash actions which do not name their own.
    pub fn default_salt(&self) -> &str {
        &self.default_salt
    }

    /// Advance the naming counter, returning its new value.
    pub fn next_counter(&mut self) -> u64 {
        self.name_counter += 1;
        self.name_counter
    }
}
