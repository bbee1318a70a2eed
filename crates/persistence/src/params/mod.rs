//! Search-parameter ingestion: value types, collection and batch resolution.
//!
//! The ingestion path runs record → [`collector`] → [`processor`] (using the
//! identity cache) → persisted parameter rows. The [`session`] module ties
//! the pieces to one unit of work and owns the retry/commit/rollback
//! choreography.

pub mod collector;
pub mod parameter;
pub mod processor;
pub mod session;
pub mod values;

pub use collector::ParamValueCollector;
pub use parameter::{
    DateParameter, LocationParameter, NumberParameter, ParameterRow, ProfileParameter,
    QuantityParameter, ReferenceParameter, RowCommon, SecurityParameter, StringParameter,
    TagParameter, TokenParameter,
};
pub use processor::{ParamValueProcessor, PlainParamValueProcessor};
pub use session::ParamIngestionSession;
pub use values::{
    CodeSystemValue, CommonCanonicalValue, CommonCanonicalValueKey, CommonTokenValue,
    CommonTokenValueKey, LogicalResourceIdentKey, LogicalResourceIdentValue, ParameterNameValue,
    Resolution,
};
