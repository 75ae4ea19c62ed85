// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info};
use tokio::select;

use crate::audio_server::AudioServer;
use crate::cli::Cli;
use crate::config::BridgeConfig;
use crate::device_bus::DeviceBus;
use crate::errors::BridgeError;
use crate::logger::init_logger;
use crate::service::StopHandle;
use crate::session_manager::SessionManager;

/// How the bridge ended.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeExit {
    /// Stopped on request after every route drained.
    Clean,
    Fatal(BridgeError),
}

impl BridgeExit {
    pub fn code(&self) -> u8 {
        match self {
            BridgeExit::Clean => 0,
            BridgeExit::Fatal(_) => 1,
        }
    }
}

impl From<BridgeExit> for ExitCode {
    fn from(exit: BridgeExit) -> Self {
        ExitCode::from(exit.code())
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut interrupt), Ok(mut terminate)) => {
                select! {
                    _ = interrupt.recv() => info!("Received SIGINT"),
                    _ = terminate.recv() => info!("Received SIGTERM"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => error!("Failed to install signal handlers: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Run the bridge until `shutdown` resolves or a fatal condition occurs.
///
/// A requested shutdown still waits for every route to finish its teardown, bounded by
/// `config.drain_timeout`.
pub async fn run_bridge<S, B, F>(config: BridgeConfig, server: Arc<S>, bus: Arc<B>, shutdown: F) -> BridgeExit
where
    S: AudioServer + 'static,
    B: DeviceBus + 'static,
    F: Future<Output = ()>,
{
    let (stop_tx, stop_handle) = StopHandle::pair();
    let run = SessionManager::new(config, server, bus).run(stop_handle);
    tokio::pin!(run);

    select! {
        exit = &mut run => return exit,
        _ = shutdown => info!("Exiting..."),
    }

    let _ = stop_tx.send(());
    run.await
}

/// Entry point for a binary wiring concrete backends: set up logging from the command line
/// and run until SIGINT or SIGTERM.
pub async fn run_service<S, B>(cli: &Cli, server: Arc<S>, bus: Arc<B>) -> anyhow::Result<BridgeExit>
where
    S: AudioServer + 'static,
    B: DeviceBus + 'static,
{
    init_logger(cli.log_level, cli.log_file.clone())?;
    Ok(run_bridge(cli.to_config(), server, bus, shutdown_signal()).await)
}
