pub mod accuracy;
pub mod loss_type;
pub mod mean_loss;
pub mod metric;
pub mod registry;

pub use accuracy::Accuracy;
pub use loss_type::LossType;
pub use mean_loss::MeanLoss;
pub use metric::{Metric, MetricError, MetricValue, PairedOutput, Prediction};
pub use registry::MetricRegistry;
