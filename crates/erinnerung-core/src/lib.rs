pub mod conditions;
pub mod error;
pub mod events;
pub mod meta;
pub mod phase;
pub mod resources;
pub mod selector;

pub use conditions::{Condition, ConditionStatus, Conditions};
pub use error::{CoreError, ErrorCategory, Result};
pub use meta::{
    DEFAULT_NAMESPACE, ObjectKey, ObjectMeta, OwnerReference, generate_uid, validate_name,
};
pub use phase::Phase;
pub use resources::{
    DeliveryJob, DeliveryJobSpec, DeliveryJobStatus, Endpoint, EndpointSpec, EndpointStatus,
    JobOutcome, Kind, Object, Payload, PayloadAggregate, PayloadSpec, PayloadStatus,
};
pub use selector::{LabelSelector, LabelSelectorRequirement, Selector, SelectorError};
