//! Fixed-priority backend selection.

use crate::backend::{BackendKind, EnclaveBackend};
use crate::native::NativeBackend;
use crate::pal::PalBackend;
use crate::{BackendError, EnclaveError};
use rune_schema::EnclaveConfig;
use std::fmt;
use tracing::debug;

type Constructor<'a> =
    dyn Fn(&EnclaveConfig) -> Result<Box<dyn EnclaveBackend>, BackendError> + 'a;

/// One backend the selector may try.
pub struct Candidate<'a> {
    kind: BackendKind,
    construct: Box<Constructor<'a>>,
}

impl<'a> Candidate<'a> {
    pub fn new(
        kind: BackendKind,
        construct: impl Fn(&EnclaveConfig) -> Result<Box<dyn EnclaveBackend>, BackendError> + 'a,
    ) -> Self {
        Self {
            kind,
            construct: Box::new(construct),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }
}

impl Candidate<'static> {
    pub fn native() -> Self {
        Self::new(BackendKind::Native, |config| {
            Ok(Box::new(NativeBackend::new(config)?))
        })
    }

    pub fn pal() -> Self {
        Self::new(BackendKind::Pal, |config| Ok(Box::new(PalBackend::new(config)?)))
    }
}

impl fmt::Debug for Candidate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate").field("kind", &self.kind).finish()
    }
}

/// Production order: the native manager first, the PAL bridge second.
pub fn default_candidates() -> Vec<Candidate<'static>> {
    vec![Candidate::native(), Candidate::pal()]
}

/// A candidate that refused the configuration, and why.
#[derive(Debug)]
pub struct Declined {
    pub kind: BackendKind,
    pub error: BackendError,
}

impl fmt::Display for Declined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.error)
    }
}

pub(crate) fn format_declines(declines: &[Declined]) -> String {
    if declines.is_empty() {
        return "no candidates".to_owned();
    }
    declines
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The backend chosen by selection, not yet loaded.
pub struct BoundBackend {
    pub kind: BackendKind,
    pub backend: Box<dyn EnclaveBackend>,
}

impl fmt::Debug for BoundBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundBackend")
            .field("kind", &self.kind)
            .field("name", &self.backend.name())
            .finish()
    }
}

pub fn select_backend(config: &EnclaveConfig) -> Result<BoundBackend, EnclaveError> {
    select_backend_from(&default_candidates(), config)
}

/// Try `candidates` in order and bind the first one that constructs.
/// Later candidates are never attempted once one succeeds.
pub fn select_backend_from(
    candidates: &[Candidate<'_>],
    config: &EnclaveConfig,
) -> Result<BoundBackend, EnclaveError> {
    let mut declines = Vec::new();
    for candidate in candidates {
        match (candidate.construct)(config) {
            Ok(backend) => {
                debug!(
                    "selected {} backend ({}) for {}",
                    candidate.kind,
                    backend.name(),
                    config.path()
                );
                return Ok(BoundBackend {
                    kind: candidate.kind,
                    backend,
                });
            }
            Err(error) => {
                debug!("{} backend declined {}: {error}", candidate.kind, config.path());
                declines.push(Declined {
                    kind: candidate.kind,
                    error,
                });
            }
        }
    }
    Err(EnclaveError::NoBackend(declines))
}
