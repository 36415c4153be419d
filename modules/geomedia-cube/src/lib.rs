pub mod aggregate;
pub mod design;
pub mod filter;
pub mod hypercube;
pub mod interaction;
pub mod network;
pub mod null_model;
pub mod pipeline;
pub mod salience;

pub use aggregate::{compute_baseline, rank, DimensionAggregator, TopicMatch};
pub use hypercube::{Hypercube, HypercubeBuilder, HypercubeRow, HypercubeSummary};
pub use interaction::{build_interactions, threshold, InteractionCell, InteractionMatrix};
pub use network::{EdgeCandidate, Graph, GraphEdge, GraphNode};
pub use null_model::{NullModel, NullModelOutcome, ResidualCell};
pub use pipeline::{Pipeline, PipelineReport};
pub use salience::{analyze, proportion_test, SalienceInput, SalienceRecord};
