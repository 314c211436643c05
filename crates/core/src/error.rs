use std::path::PathBuf;

/// Failures reported by the device layer.
///
/// `Unreachable` is the only error that escapes the interpreter: it travels
/// unmodified up to the supervisor, which waits for the device to return.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("device unreachable: {0}")]
    Unreachable(String),

    /// Transient failure of a single capture or input command.
    #[error("device i/o failed: {0}")]
    Io(String),
}

impl DeviceError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DeviceError::Unreachable(_))
    }
}

/// True when an orchestration-level error is (or wraps) a lost device.
pub fn is_unreachable(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<DeviceError>())
        .any(DeviceError::is_unreachable)
}

/// Malformed or missing configuration. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{task}: {reason}")]
    Invalid { task: String, reason: String },

    #[error("unknown task: {0}")]
    MissingTask(String),

    #[error("anchor {path}: {reason}")]
    Anchor { path: PathBuf, reason: String },
}

impl ConfigError {
    pub fn invalid(task: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { task: task.into(), reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn unreachable_is_found_through_context() {
        let err: anyhow::Result<()> = Err(DeviceError::Unreachable("device offline".into()))
            .context("tapping (10, 20)");
        assert!(is_unreachable(&err.unwrap_err()));

        let io = anyhow::Error::new(DeviceError::Io("screencap exited 1".into()));
        assert!(!is_unreachable(&io));
        assert!(!is_unreachable(&anyhow::anyhow!("device offline")));
    }
}
