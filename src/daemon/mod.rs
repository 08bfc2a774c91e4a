//! Service lifecycle: clone, serve, refresh, shut down.

mod scheduler;
mod server;
mod shutdown;

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

use crate::address::{self, Transport};
use crate::config::{Config, ConfigError};
use crate::credentials::{self, AuthError, AuthHandle, SshKeyLoader, TerminalPrompt};
use crate::mirror::{ConnectionParameters, GitRemote, MirrorError, MirrorLayout, MirrorStore};

pub use scheduler::{Scheduler, SchedulerHandle, SchedulerState};
pub use server::{router, serve};
pub use shutdown::Shutdown;

/// Errors that stop the service.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to load credentials: {0}")]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error("failed to create storage directory: {0}")]
    Storage(#[source] io::Error),

    #[error("failed to listen on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("failed to start scheduler thread: {0}")]
    Scheduler(#[source] io::Error),

    #[error("HTTP server failed: {0}")]
    Server(#[source] io::Error),
}

/// Where the mirror lives on disk.
enum Storage {
    /// Removed when dropped.
    Temporary(TempDir),
    Pinned(PathBuf),
}

impl Storage {
    fn prepare(cache_dir: Option<&Path>) -> io::Result<Self> {
        match cache_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Ok(Self::Pinned(dir.to_path_buf()))
            }
            None => Ok(Self::Temporary(
                tempfile::Builder::new().prefix("gitserve-").tempdir()?,
            )),
        }
    }

    fn path(&self) -> &Path {
        match self {
            Self::Temporary(dir) => dir.path(),
            Self::Pinned(dir) => dir,
        }
    }
}

/// Credentials for `url`. Only SSH transports use a key.
fn resolve_auth(config: &Config, url: &str) -> Result<AuthHandle, AuthError> {
    match address::transport(url) {
        Transport::Ssh => credentials::resolve(
            &config.key_path,
            config.passphrase.as_deref(),
            &SshKeyLoader,
            &TerminalPrompt,
        ),
        Transport::Other => {
            log::debug!("{} does not use ssh; not loading a key", url);
            Ok(AuthHandle::anonymous())
        }
    }
}

/// A mirrored, bound, not yet serving instance.
pub struct Service {
    config: Config,
    // Field order is drop order: the store's lock and generations go before
    // the temporary directory holding them.
    store: Arc<MirrorStore>,
    storage: Storage,
    runtime: Runtime,
    listener: TcpListener,
}

impl Service {
    /// Everything up to the first request: credentials, the initial clone
    /// and the listening socket.
    pub fn start(config: Config) -> Result<Self, ServiceError> {
        let url = address::normalize(&config.remote);
        log::info!("Starting gitserve for {}", url);

        let auth = resolve_auth(&config, &url)?;
        let params = ConnectionParameters::new(url, auth);

        let storage =
            Storage::prepare(config.cache_dir.as_deref()).map_err(ServiceError::Storage)?;
        let layout = MirrorLayout::new(storage.path());
        let remote = GitRemote::new(layout.mirror_dir(), config.shallow);
        let store = Arc::new(MirrorStore::initialize(layout, Box::new(remote), params)?);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("gitserve-http")
            .build()
            .map_err(ServiceError::Runtime)?;
        let listener = runtime
            .block_on(TcpListener::bind(config.address))
            .map_err(|source| ServiceError::Bind {
                addr: config.address,
                source,
            })?;

        Ok(Self {
            config,
            store,
            storage,
            runtime,
            listener,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[cfg(test)]
    fn store(&self) -> &Arc<MirrorStore> {
        &self.store
    }

    /// Serve and refresh until `shutdown` fires, then stop both and remove
    /// temporary storage.
    pub fn serve(self, shutdown: Shutdown) -> Result<(), ServiceError> {
        let Self {
            config,
            store,
            storage,
            runtime,
            listener,
        } = self;

        let mut scheduler =
            SchedulerHandle::spawn(Arc::clone(&store), config.interval, shutdown.clone())
                .map_err(ServiceError::Scheduler)?;

        let served = runtime.block_on(serve(listener, Arc::clone(&store), shutdown.clone()));

        log::info!("Shutting down");
        shutdown.trigger();
        scheduler.shutdown();
        log_last_sync(&store);
        drop(runtime);
        drop(store);
        if let Storage::Temporary(dir) = storage {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => log::debug!("Removed {}", path.display()),
                Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }

        served.map_err(ServiceError::Server)
    }
}

fn log_last_sync(store: &MirrorStore) {
    let status = store.status();
    let at = humantime::format_rfc3339_seconds(status.at);
    if status.is_healthy() {
        log::info!("Last sync at {} succeeded ({})", at, store.current_revision());
    } else {
        log::warn!(
            "Last sync at {} failed; stopped serving {}",
            at,
            store.current_revision()
        );
    }
}

/// Run until interrupted. A second interrupt exits without waiting for
/// in-flight work.
pub fn run(config: Config) -> Result<(), ServiceError> {
    let service = Service::start(config)?;

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            if shutdown.is_triggered() {
                log::warn!("Second interrupt received; exiting immediately");
                std::process::exit(130);
            }
            log::info!("Interrupt received");
            shutdown.trigger();
        })?;
    }

    service.serve(shutdown)
}
