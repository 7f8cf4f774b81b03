//! ECR CI pipeline
//!
//! Typed model of a two-stage image pipeline: a GitHub push to the watched
//! branch starts a source stage, whose artifact feeds a docker build that
//! pushes `<app>/rails:<short sha>` to the container registry. The model
//! synthesizes to a CloudFormation template and can be replayed locally.

pub mod config;
pub mod intrinsic;
pub mod logging;
pub mod naming;
pub mod pipeline;
pub mod policy;
pub mod run;
pub mod source;
pub mod stack;
pub mod state;
pub mod summary;

pub use config::{ConfigError, EffectiveConfig, StackConfig};
pub use naming::{derive_image_tag, AppName, ImageTag, NameError, RepositoryName, StackEnv};
pub use pipeline::{PipelineDefinition, PipelineError};
pub use run::{LocalCheckout, LocalPipeline, RunError, RunReport};
pub use source::{PushEvent, SourceTrigger, TriggerDecision, TriggerError};
pub use stack::{EcrCiStack, SynthError, SynthManifest};
pub use summary::{ExitCode, FailureKind};
