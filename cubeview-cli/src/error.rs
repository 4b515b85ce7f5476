//! CLI error handling with user-facing messages and exit codes.

use std::fmt;
use std::process;

use cubeview::config::ConfigFileError;
use cubeview::executor::ExecutorError;
use cubeview::loader::LoaderError;
use cubeview::server::ServerError;

#[derive(Debug)]
pub enum CliError {
    LoggingInit(String),
    Config(String),
    /// A `--image` or `--synthetic` argument could not be used
    Image { spec: String, reason: String },
    Loader(LoaderError),
    Workers(ExecutorError),
    Runtime(std::io::Error),
    Serve(ServerError),
}

impl CliError {
    /// Print the error (with hints where useful) and exit with status 1.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Image { .. } => {
                eprintln!();
                eprintln!("Expected NAME=PATH@WxHxDxS for --image (little-endian f32 file)");
                eprintln!("or NAME@WxHxDxS for --synthetic, e.g. m51@1024x1024x20x1");
            }
            CliError::Serve(ServerError::Bind { .. }) => {
                eprintln!();
                eprintln!("Another process may be using the port. Try --port <PORT>.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Image { spec, reason } => write!(f, "Invalid image '{}': {}", spec, reason),
            CliError::Loader(e) => write!(f, "Failed to open image: {}", e),
            CliError::Workers(e) => write!(f, "Failed to start workers: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::Serve(e) => write!(f, "Server error: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Loader(e) => Some(e),
            CliError::Workers(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            CliError::Serve(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<LoaderError> for CliError {
    fn from(e: LoaderError) -> Self {
        CliError::Loader(e)
    }
}

impl From<ServerError> for CliError {
    fn from(e: ServerError) -> Self {
        CliError::Serve(e)
    }
}
