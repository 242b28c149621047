//! Pipeline stages. Each stage is a free async function generic over
//! [`PerformanceSchema`](crate::source::PerformanceSchema), returning its records or a typed
//! error for the pipeline to report.

pub mod blocking;
pub mod config;
pub mod metrics;
pub mod plans;
pub mod slow_queries;
pub mod stage;
pub mod statements;
pub mod util;
pub mod validator;
pub mod waits;

pub use stage::Stage;
