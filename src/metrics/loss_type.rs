use serde::{Deserialize, Serialize};

/// Small epsilon added inside ln() to keep log(0) finite.
const EPS: f64 = 1e-12;

/// Huber transition point. Kept fixed so the enum stays `Copy + Eq`.
const HUBER_DELTA: f64 = 1.0;

/// Per-sample loss averaged by `MeanLoss`.
///
/// - `Mse`                — mean((p − y)²)
/// - `Mae`                — mean(|p − y|)
/// - `Huber`              — mean(h(p − y)) with δ = 1
/// - `BinaryCrossEntropy` — −mean(y·ln p + (1 − y)·ln(1 − p)); sigmoid outputs
/// - `CrossEntropy`       — −Σ y·ln p; softmax outputs, one-hot targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    Mse,
    Mae,
    Huber,
    BinaryCrossEntropy,
    CrossEntropy,
}

impl LossType {
    /// Loss of one sample. Callers guarantee equal, non-zero lengths.
    pub fn sample_loss(self, predicted: &[f64], expected: &[f64]) -> f64 {
        let n = predicted.len() as f64;
        let pairs = predicted.iter().zip(expected.iter());
        match self {
            LossType::Mse => pairs.map(|(p, y)| (p - y).powi(2)).sum::<f64>() / n,
            LossType::Mae => pairs.map(|(p, y)| (p - y).abs()).sum::<f64>() / n,
            LossType::Huber => pairs.map(|(p, y)| huber(p - y)).sum::<f64>() / n,
            LossType::BinaryCrossEntropy => {
                pairs
                    .map(|(p, y)| -(y * (p + EPS).ln() + (1.0 - y) * (1.0 - p + EPS).ln()))
                    .sum::<f64>()
                    / n
            }
            LossType::CrossEntropy => pairs.map(|(p, y)| -y * (p + EPS).ln()).sum(),
        }
    }
}

fn huber(x: f64) -> f64 {
    if x.abs() <= HUBER_DELTA {
        0.5 * x * x
    } else {
        HUBER_DELTA * (x.abs() - 0.5 * HUBER_DELTA)
    }
}
