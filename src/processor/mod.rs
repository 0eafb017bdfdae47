pub mod dispatcher;
pub mod engine;
pub mod flow;
pub mod stats;
pub mod table;
pub mod tcp_state;

pub use dispatcher::Dispatcher;
pub use engine::{now_micros, DetectorEngine};
pub use flow::{
    AddStatus, Feature, FeatureValue, FlowDirection, FlowFeatures, FlowKey, FlowRecord, FlowTimeouts,
    FEATURE_NAMES, FEATURE_VECTOR_LEN, NUM_FEATURES,
};
pub use stats::{Snapshot, StatAccumulator};
pub use table::{FlowId, FlowTable, TableStats};
pub use tcp_state::TcpState;
