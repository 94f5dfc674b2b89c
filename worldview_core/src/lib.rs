pub mod error;
pub mod model;
pub mod timeseries;

pub use error::{CoreError, Result};
pub use model::{
    Application, ApplicationId, ApplicationKind, Connection, Container, Instance, MetricValues,
    Node, NodeId, Status, World,
};
pub use timeseries::{Aggregate, Context, Duration, Reducer, Time, TimeSeries};
