use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::error::ConfigError;

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// Where the iteration body is expected to place its computation.
///
/// The engine never touches the device itself; it is carried in `RunState`
/// so iteration bodies and handlers agree on it. Serialized as `"cpu"`,
/// `"cuda"` or `"cuda:<index>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl FromStr for Device {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().to_ascii_lowercase();
        match trimmed.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|index| index.parse::<usize>().ok())
                .map(Device::Cuda)
                .ok_or_else(|| ConfigError::InvalidDevice(s.to_string())),
        }
    }
}

impl TryFrom<String> for Device {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> String {
        device.to_string()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{index}"),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowConfig
// ---------------------------------------------------------------------------

/// Construction parameters of a `Workflow` that are plain data.
///
/// # Fields
/// - `device`              — device the iteration body should run on
/// - `max_epochs`          — total epochs per run; evaluators use `1`
/// - `amp`                 — mixed-precision flag; carried but inert
/// - `seed`                — reproducibility seed exposed through `RunState`
/// - `epoch_length`        — iterations per epoch; `None` derives it from the
///                           data source length at the start of every run
/// - `initial_best_metric` — starting value of `RunState::best_metric`.  The
///                           default `-1.0` is beaten by any non-negative metric;
///                           use `f64::NEG_INFINITY` for metrics that can be
///                           negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub device: Device,
    pub max_epochs: usize,
    #[serde(default)]
    pub amp: bool,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub epoch_length: Option<usize>,
    #[serde(default = "default_best_metric")]
    pub initial_best_metric: f64,
}

fn default_best_metric() -> f64 {
    -1.0
}

impl WorkflowConfig {
    /// Creates a CPU config with `max_epochs` epochs and every other field at
    /// its default.
    pub fn new(max_epochs: usize) -> Self {
        WorkflowConfig {
            device: Device::Cpu,
            max_epochs,
            amp: false,
            seed: 0,
            epoch_length: None,
            initial_best_metric: default_best_metric(),
        }
    }

    /// Single-epoch config for validators and evaluators.
    pub fn evaluation() -> Self {
        WorkflowConfig::new(1)
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_epoch_length(mut self, epoch_length: usize) -> Self {
        self.epoch_length = Some(epoch_length);
        self
    }

    pub fn with_amp(mut self, amp: bool) -> Self {
        self.amp = amp;
        self
    }

    pub fn with_initial_best_metric(mut self, value: f64) -> Self {
        self.initial_best_metric = value;
        self
    }

    /// Checks the invariants that do not depend on the data source.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_epochs == 0 {
            return Err(ConfigError::ZeroEpochs);
        }
        Ok(())
    }

    /// Parses and validates a config from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: WorkflowConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a config from a JSON file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Serializes the config to a pretty-printed JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let file = std::fs::File::create(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}
