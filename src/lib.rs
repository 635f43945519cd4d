use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YamlError: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Asset {0} is not embedded in the operator binary")]
    AssetNotFound(String),

    #[error("Object is missing the {0} field")]
    MissingObjectKey(&'static str),

    #[error("The Kueue {namespace}/{name} does not exist")]
    KueueNotFound { namespace: String, name: String },

    #[error("Unable to {step}: {source}")]
    Sync {
        step: &'static str,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::SerializationError(_) => "SerializationError",
            Error::YamlError(_) => "YamlError",
            Error::KubeError(_) => "KubeError",
            Error::AssetNotFound(_) => "AssetNotFound",
            Error::MissingObjectKey(_) => "MissingObjectKey",
            Error::KueueNotFound { .. } => "KueueNotFound",
            Error::Sync { source, .. } => source.metric_label(),
        }
    }

    /// The sync step that failed, if the error came out of one
    pub fn step(&self) -> Option<&'static str> {
        match self {
            Error::Sync { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Whether the Kueue itself is gone, directly or underneath a failed step
    pub fn is_kueue_not_found(&self) -> bool {
        match self {
            Error::KueueNotFound { .. } => true,
            Error::Sync { source, .. } => source.is_kueue_not_found(),
            _ => false,
        }
    }

    /// Attach the sync step that failed
    pub fn during(self, step: &'static str) -> Self {
        Error::Sync {
            step,
            source: Box::new(self),
        }
    }
}

pub mod controllers;
pub use controllers::{run, State};

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use metrics::Metrics;

/// The Kueue CRD
pub mod resources;
