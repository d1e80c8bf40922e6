use std::error::Error;
use std::path::PathBuf;

use casevault_daemon::service::{Service, ServiceError};
use casevault_daemon::state::{AppState, StateError};
use common::prelude::{ProductLine, VaultError};

#[derive(Clone, Debug)]
pub struct OpContext {
    /// Optional custom vault directory (defaults to ~/.casevault)
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl OpContext {
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self { config_path }
    }

    pub fn load_state(&self) -> Result<AppState, StateError> {
        AppState::load(self.config_path.clone())
    }

    /// Load the vault directory and wire the vault over it.
    pub async fn service(&self) -> Result<Service, SetupError> {
        let state = self.load_state()?;
        Ok(Service::from_state(state).await?)
    }
}

/// Product line given on the command line, else the configured default.
pub fn product_line(explicit: Option<ProductLine>, service: &Service) -> ProductLine {
    explicit.unwrap_or_else(|| service.product_line())
}

/// Vault failure as shown to the operator. Internal detail only goes to the
/// log.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct Failure {
    message: String,
}

impl From<VaultError> for Failure {
    fn from(err: VaultError) -> Self {
        let message = err.public_message();
        if err.kind() == common::prelude::ErrorKind::Internal {
            tracing::error!(error = %err, "operation failed");
        }
        Self {
            message: format!("{}: {}", err.kind(), message),
        }
    }
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $type:ty)),* $(,)?) => {
        #[derive(Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($type),)*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$type as $crate::cli::op::Op>::Output),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$type as $crate::cli::op::Op>::Error),
            )*
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Output = OpOutput;
            type Error = OpError;

            async fn execute(&self, ctx: &$crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => {
                            op.execute(ctx).await
                                .map(OpOutput::$variant)
                                .map_err(OpError::$variant)
                        },
                    )*
                }
            }
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        OpOutput::$variant(output) => write!(f, "{}", output),
                    )*
                }
            }
        }
    };
}
