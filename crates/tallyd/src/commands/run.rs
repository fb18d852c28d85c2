//! The daemon: bring the appliance up and serve until told to stop.
//!
//! A save from the settings page restarts the loop in-process with the
//! freshly written file.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use tally_core::{Appliance, MdnsDiscovery, Platform};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::platform::{HostDriver, LogIndicator};
use crate::{dns, http};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Shutdown,
    Restart,
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let path = global.config_path();
    loop {
        match run_once(&path).await? {
            Exit::Shutdown => return Ok(()),
            Exit::Restart => info!(path = %path.display(), "restarting with saved settings"),
        }
    }
}

async fn run_once(path: &Path) -> Result<Exit, CliError> {
    let settings = tally_config::load_from(path).map_err(|e| CliError::config(e, path))?;
    let config = settings
        .to_appliance_config()
        .map_err(|e| CliError::config(e, path))?;

    let (driver, link_events) = HostDriver::new(settings.network.interface.clone());
    let mdns = MdnsDiscovery::new()?;
    let indicator = Arc::new(LogIndicator::default());
    let platform = Platform {
        indicator: Arc::<LogIndicator>::clone(&indicator),
        network: Arc::new(driver),
        link_events,
        discovery: Arc::new(mdns.clone()),
        mdns: Some(mdns.daemon().clone()),
    };
    let appliance = Appliance::new(config, platform)?;

    if let Err(e) = appliance.start().await {
        appliance.shutdown().await;
        mdns.shutdown();
        return Err(e.into());
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.http.port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(source) => {
            appliance.shutdown().await;
            mdns.shutdown();
            return Err(CliError::Bind {
                addr: addr.to_string(),
                source,
            });
        }
    };

    let cancel = CancellationToken::new();
    let restart = Arc::new(Notify::new());
    let dns_task = settings.dns.enabled.then(|| {
        tokio::spawn(dns::run(
            appliance.clone(),
            settings.dns.port,
            cancel.child_token(),
        ))
    });
    let state = http::AppState::new(
        appliance.clone(),
        settings,
        path.to_path_buf(),
        Arc::clone(&restart),
    );
    let stop = cancel.clone();
    let mut server = tokio::spawn(http::serve(listener, state, async move {
        stop.cancelled().await;
    }));

    let (exit, finished) = tokio::select! {
        () = shutdown_signal() => (Exit::Shutdown, None),
        () = restart.notified() => (Exit::Restart, None),
        served = &mut server => {
            warn!("control surface stopped unexpectedly");
            (Exit::Shutdown, Some(served))
        }
    };

    cancel.cancel();
    let served = match finished {
        Some(served) => served,
        None => server.await,
    };
    if let Some(task) = dns_task {
        let _ = task.await;
    }
    appliance.shutdown().await;
    mdns.shutdown();
    debug!(frame = ?indicator.current(), "indicator at exit");

    match served {
        Ok(Ok(())) => Ok(exit),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(CliError::Internal(format!("control surface task failed: {e}"))),
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("interrupted"),
        () = terminate => info!("terminated"),
    }
}
