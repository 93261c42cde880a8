pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod field;
pub mod run;
pub mod service;
pub mod step;
pub mod traits;

pub use catalog::StepCatalog;
pub use config::AppConfig;
pub use context::StepContext;
pub use error::{FieldError, Result, TripwireError};
pub use field::{FieldSpec, FieldType, FieldValues, Fields};
pub use run::{GraphHandle, RunReport, RunState};
pub use service::{Lifecycle, ServiceCatalog, ServiceRegistry};
pub use step::{Flow, Outputs, Step, StepClass, StepDescriptor, StepNode};
pub use traits::{GraphSpawner, Service};
