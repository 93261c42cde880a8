pub mod definition;
pub mod environment;
pub mod graph;
pub mod template;
pub mod variables;

pub use definition::{build_chain, GraphDocument, StepDocument};
pub use environment::Environment;
pub use graph::{Graph, GraphOptions};
pub use variables::Variables;
