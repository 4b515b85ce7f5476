//! `cubeview serve`: register images and run the tile server.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::Args;
use cubeview::executor::{TaskQueue, WorkerPool};
use cubeview::loader::{ImageRegistry, ImageShape, MemoryCube, RawCubeFile};
use cubeview::server::Server;
use cubeview::session::SessionManager;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CliError;
use crate::runner::CliRunner;

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Config file to use instead of ~/.cubeview/config.ini
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Interface to listen on (overrides [server] host)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides [server] port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Worker threads (overrides [server] worker_threads)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Raw little-endian f32 cube: NAME=PATH@WxHxDxS (repeatable)
    #[arg(long = "image", value_name = "NAME=PATH@WxHxDxS")]
    pub images: Vec<ImageArg>,

    /// Generated test cube: NAME@WxHxDxS (repeatable)
    #[arg(long = "synthetic", value_name = "NAME@WxHxDxS")]
    pub synthetic: Vec<SyntheticArg>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

/// A raw cube file to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArg {
    pub name: String,
    pub path: PathBuf,
    pub shape: ImageShape,
}

/// A generated cube to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticArg {
    pub name: String,
    pub shape: ImageShape,
}

impl FromStr for ImageArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, rest) = s
            .split_once('=')
            .ok_or_else(|| "expected NAME=PATH@WxHxDxS".to_string())?;
        let (path, shape) = rest
            .rsplit_once('@')
            .ok_or_else(|| "missing @WxHxDxS".to_string())?;
        if name.is_empty() || path.is_empty() {
            return Err("name and path must not be empty".to_string());
        }
        Ok(Self {
            name: name.to_string(),
            path: PathBuf::from(path),
            shape: parse_shape(shape)?,
        })
    }
}

impl FromStr for SyntheticArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, shape) = s
            .split_once('@')
            .ok_or_else(|| "expected NAME@WxHxDxS".to_string())?;
        if name.is_empty() {
            return Err("name must not be empty".to_string());
        }
        Ok(Self {
            name: name.to_string(),
            shape: parse_shape(shape)?,
        })
    }
}

/// Parse `WxHxDxS`; all four dimensions must be positive.
fn parse_shape(s: &str) -> Result<ImageShape, String> {
    let dims: Vec<usize> = s
        .split('x')
        .map(|part| part.trim().parse::<usize>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("'{}' is not WxHxDxS", s))?;

    match dims.as_slice() {
        [w, h, d, st] if dims.iter().all(|v| *v > 0) => Ok(ImageShape::new(*w, *h, *d, *st)),
        [_, _, _, _] => Err(format!("'{}' has a zero dimension", s)),
        _ => Err(format!("'{}' is not WxHxDxS", s)),
    }
}

/// Smooth pattern that differs per channel and polarization.
fn synthetic_cube(shape: ImageShape) -> MemoryCube {
    let cx = shape.width as f32 / 2.0;
    let cy = shape.height as f32 / 2.0;
    let sigma = (shape.width.min(shape.height) as f32 / 4.0).max(1.0);
    MemoryCube::from_fn(shape, |x, y, z, s| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let peak = 1.0 + z as f32 * 0.1 + s as f32;
        peak * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
    })
}

pub fn run(args: ServeArgs) -> Result<(), CliError> {
    let mut runner = CliRunner::new(args.config.as_deref(), args.debug)?;
    runner.log_startup("serve");

    let config = runner.config_mut();
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(workers) = args.workers {
        config.server.worker_threads = workers.max(1);
    }
    let config = runner.config().clone();

    let registry = Arc::new(ImageRegistry::new());
    for image in &args.images {
        let cube = RawCubeFile::open(&image.path, image.shape)?;
        registry.register(image.name.clone(), Arc::new(cube));
        info!(name = %image.name, path = %image.path.display(), shape = %image.shape, "Registered image");
    }
    for synthetic in &args.synthetic {
        registry.register(synthetic.name.clone(), Arc::new(synthetic_cube(synthetic.shape)));
        info!(name = %synthetic.name, shape = %synthetic.shape, "Registered synthetic image");
    }
    if registry.is_empty() {
        warn!("No images registered; clients will not be able to open files");
        println!("Warning: no images registered (use --image or --synthetic)");
    }

    let queue = TaskQueue::new();
    let mut workers =
        WorkerPool::start(queue.clone(), config.server.worker_threads).map_err(CliError::Workers)?;
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&registry),
        config.session_settings(),
        queue,
    ));

    let runtime = tokio::runtime::Runtime::new().map_err(CliError::Runtime)?;
    let address = config.server.address();
    let result = runtime.block_on(async move {
        let server = Server::bind(&address, sessions).await?;
        println!("cubeview listening on {}", address);
        println!("Images: {}", registry.names().join(", "));
        println!("Press Ctrl+C to stop");

        let shutdown = CancellationToken::new();
        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received");
                signal_token.cancel();
            }
        });

        server.run(shutdown).await
    });

    workers.shutdown();
    info!("cubeview stopped");
    result.map_err(CliError::from)
}
