//! Shared error taxonomy for the Open Commander core crate.
//!
//! [`DriverError`] carries the typed failure kinds the Container Driver
//! (C1) contract distinguishes between; [`InvalidInputError`] covers the
//! Mount Planner's (C2) input validation. Consumers (`oc-server`) convert
//! these into their own transport errors (HTTP status, close code, log
//! line) rather than going through a shared umbrella type.

use thiserror::Error;

/// Typed failure kinds for [`crate::driver::ContainerDriver`] operations.
///
/// The Session Service (C3) matches on these variants to decide whether to
/// retry, recover, or propagate.
#[derive(Error, Debug)]
pub enum DriverError {
    /// A container with the requested name already exists.
    #[error("container name already in use: {0}")]
    NameConflict(String),

    /// The engine reported contention acquiring or extracting an image
    /// layer (a concurrent pull of the same image is in flight).
    #[error("image layer locked: {0}")]
    LayerLocked(String),

    /// The requested image does not exist and could not be pulled.
    #[error("image missing: {0}")]
    ImageMissing(String),

    /// Any other engine failure not covered by a more specific kind.
    #[error("container engine error: {0}")]
    Other(String),
}

/// Input validation failures raised by the Mount Planner (C2) and other
/// pure-logic boundaries.
#[derive(Error, Debug)]
pub enum InvalidInputError {
    #[error("invalid workspace suffix: {0}")]
    WorkspaceSuffix(String),

    #[error("invalid repository reference: {0}")]
    Repository(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_display() {
        let err = DriverError::NameConflict("oc-sess-abc".into());
        assert_eq!(err.to_string(), "container name already in use: oc-sess-abc");

        let err = DriverError::LayerLocked("ubuntu:22.04".into());
        assert_eq!(err.to_string(), "image layer locked: ubuntu:22.04");

        let err = DriverError::ImageMissing("ghost:latest".into());
        assert_eq!(err.to_string(), "image missing: ghost:latest");
    }

    #[test]
    fn invalid_input_display() {
        let err = InvalidInputError::WorkspaceSuffix("../escape".into());
        assert_eq!(err.to_string(), "invalid workspace suffix: ../escape");
    }
}
