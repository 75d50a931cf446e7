//! Model components: preprocessing, boosting, surrogate explanation

pub mod builder;
pub mod explainer;
pub mod gbdt;
pub mod inference;
pub mod ridge;
pub mod scaler;
pub mod smote;

pub use builder::{BuildReport, BuiltModel, ModelBuilder};
pub use explainer::{ExplainerInstabilityWarning, ExplainerParams, Explanation, LimeExplainer};
pub use gbdt::{BoostingParams, GradientBoostingClassifier};
pub use inference::{ProbabilityModel, ScaledModel};
pub use scaler::StandardScaler;
pub use smote::Smote;
