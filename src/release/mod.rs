//! Release artifacts and publishing

pub mod artifacts;
pub mod publish;

pub use artifacts::{Artifact, ArtifactKind, ArtifactSet};
pub use publish::{
    classify_upload, Credential, PublishError, PublishOutcome, PublishSettings, Publisher,
};
