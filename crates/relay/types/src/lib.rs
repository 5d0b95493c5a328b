//! Relay core types
//!
//! Resource definitions shared by every Relay crate: Promotions, Stages,
//! Freight and the metadata, annotations and identifiers that tie them
//! together. These types define the persisted wire shape (camelCase JSON).

pub mod annotations;
pub mod freight;
pub mod ids;
pub mod promotion;
pub mod stage;

pub use annotations::{AbortAction, AbortPromotionRequest, AnnotationError};
pub use freight::{
    Chart, Freight, FreightCollection, FreightOrigin, FreightOriginKind, FreightReference,
    FreightStatus, GitCommit, Image,
};
pub use ids::{ObjectKey, ObjectMeta, Uid};
pub use promotion::{
    ExpressionVariable, HealthCheckStep, Promotion, PromotionPhase, PromotionSpec,
    PromotionStatus, PromotionStep, RetryPolicy, State, StepExecutionMetadata, StepStatus,
};
pub use stage::{
    FreightRequest, FreightSources, PromotionReference, Stage, StageSpec, StageStatus,
    VerificationInfo, VerificationSpec,
};
