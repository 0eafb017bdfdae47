pub mod forest;
pub mod labels;
pub mod model;

pub use forest::{majority_vote, FlowClassifier, RandomForestClassifier};
pub use labels::{disposition, Disposition, FlowClass};
pub use model::{DecisionTree, Forest, TreeNode};
