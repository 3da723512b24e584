use std::fmt::{Display, Formatter};
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::common::error::DataJobError;

/// Characters that can appear in a job identity.
/// Workload names are restricted to lowercase DNS labels, so only lowercase alphanumerics are used.
const IDENTITY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of generated identities (~82 bits of entropy).
pub const IDENTITY_LENGTH: usize = 16;

/// Longest identity accepted from external input.
const MAX_IDENTITY_LENGTH: usize = 32;

/// Unique identity of a single job submission.
///
/// It is used both as the external job id and (prefixed) as the name of the workload in the
/// cluster backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generates a new random identity.
    ///
    /// Uses the thread-local RNG, so it can be called concurrently from any number of threads
    /// without coordination.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let id: String = (0..IDENTITY_LENGTH)
            .map(|_| IDENTITY_ALPHABET[rng.random_range(0..IDENTITY_ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = DataJobError;

    /// Parses an identity received from a client.
    /// Anything that could not have been generated by [`JobId::generate`] cannot name a job.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.to_ascii_lowercase();
        let valid = !value.is_empty()
            && value.len() <= MAX_IDENTITY_LENGTH
            && value.bytes().all(|b| IDENTITY_ALPHABET.contains(&b));
        if valid {
            Ok(Self(value))
        } else {
            Err(DataJobError::NotFound(value))
        }
    }
}
