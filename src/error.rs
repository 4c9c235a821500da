use thiserror::Error;

/// The error taxonomy of the convergence engine core.
///
/// Every fallible core operation returns `Result<T, EngineCoreError>`. The
/// CLI binary wraps these in `anyhow::Context` at the dispatch boundary, the
/// same way the teacher's `main.rs` layers `anyhow` on top of typed
/// lower-level failures.
#[derive(Debug, Error)]
pub enum EngineCoreError {
    /// An invalid declaration: bad name, both/neither image+build, or a
    /// malformed port/volume/restart/extra_hosts spec.
    #[error("{0}")]
    Config(String),

    /// A cross-service reference (link, volumes_from, net) failed to
    /// resolve to a known service or existing container.
    #[error("{0}")]
    Configuration(String),

    /// A cycle was detected while topologically sorting services.
    #[error("{0}")]
    Dependency(String),

    /// The requested service name is not present in the project or any of
    /// its external projects.
    #[error("no such service: {0}")]
    NoSuchService(String),

    /// A non-recovered engine-side failure.
    #[error("engine error ({status}): {explanation}")]
    Engine { status: u16, explanation: String },

    /// A build stream completed without a "Successfully built <id>" line.
    #[error("build failed for service {service}: {reason}")]
    Build { service: String, reason: String },

    /// `scale` was invoked on a service that publishes a host-side port.
    #[error("service {0} cannot be scaled: it publishes a fixed host port")]
    CannotBeScaled(String),
}

pub type Result<T> = std::result::Result<T, EngineCoreError>;

impl EngineCoreError {
    /// True if this is the specific "404 + No such image" shape that
    /// `Service::create_container` recovers from by pulling once.
    pub fn is_no_such_image(&self) -> bool {
        matches!(
            self,
            EngineCoreError::Engine { status: 404, explanation }
                if explanation.contains("No such image")
        )
    }

    /// True if this is the specific "500 + no such process" shape that
    /// `Service::recreate_container` swallows when stopping an already
    /// stopped container.
    pub fn is_no_such_process(&self) -> bool {
        matches!(
            self,
            EngineCoreError::Engine { status: 500, explanation }
                if explanation.to_lowercase().contains("no such process")
        )
    }
}
