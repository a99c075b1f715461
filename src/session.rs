//! One cloud shell session: authenticate, provision, then relay the terminal.
//!
//! All state for a run lives in [`CloudShellSession`]; nothing is process-wide.

use std::future::Future;

use crate::cancel::CancellationSignal;
use crate::config::CloudShellConfig;
use crate::errors::{CloudShellError, Result};
use crate::http::HttpInvoker;
use crate::oauth::{AuthenticationManager, DeviceCodeChallenge};
use crate::provision::{CloudShellProvisioner, ShellKind, TerminalDescriptor, TerminalSize};
use crate::terminal::{Console, SessionReport, TerminalSession};

/// Per-run inputs
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Tenant to use; the first listed tenant when absent
    pub tenant_id: Option<String>,
    /// Delete the existing cloud shell before provisioning a new one
    pub reset: bool,
    pub shell: ShellKind,
    pub size: TerminalSize,
}

#[derive(Debug)]
pub struct CloudShellSession {
    config: CloudShellConfig,
    http: HttpInvoker,
    cancel: CancellationSignal,
}

impl CloudShellSession {
    pub fn new(config: CloudShellConfig, http: HttpInvoker) -> Self {
        Self::with_cancellation(config, http, CancellationSignal::new())
    }

    pub fn with_cancellation(
        config: CloudShellConfig,
        http: HttpInvoker,
        cancel: CancellationSignal,
    ) -> Self {
        Self {
            config,
            http,
            cancel,
        }
    }

    /// Handle that stops the session from anywhere, e.g. an interrupt handler
    pub fn cancellation(&self) -> CancellationSignal {
        self.cancel.clone()
    }

    /// Authenticate and provision a terminal
    pub async fn provision<F>(
        &self,
        options: &SessionOptions,
        on_challenge: F,
    ) -> Result<TerminalDescriptor>
    where
        F: FnOnce(&DeviceCodeChallenge),
    {
        let mut auth = AuthenticationManager::new(self.config.clone(), self.http.clone());
        let tokens = auth
            .acquire_via_device_code(&self.cancel, on_challenge)
            .await?
            .clone();

        let provisioner = CloudShellProvisioner::new(self.config.clone(), self.http.clone());
        let tenant_id = self
            .until_cancelled(provisioner.resolve_tenant(&tokens, options.tenant_id.as_deref()))
            .await?;

        let tokens = self.until_cancelled(auth.refresh(&tenant_id)).await?.clone();

        if options.reset {
            self.until_cancelled(provisioner.reset_cloud_shell(&tokens))
                .await?;
        }

        let endpoint = self
            .until_cancelled(provisioner.request_cloud_shell(&tokens))
            .await?;

        self.until_cancelled(provisioner.request_terminal(
            &tokens,
            &endpoint,
            options.shell,
            options.size,
        ))
        .await
    }

    /// Relay `console` to an already provisioned terminal
    pub async fn attach(&self, socket_uri: &str, console: Console) -> Result<SessionReport> {
        TerminalSession::new(self.config.clone(), self.cancel.clone())
            .run(socket_uri, console)
            .await
    }

    /// Provision a terminal and relay `console` to it until the session ends
    pub async fn run<F>(
        &self,
        options: &SessionOptions,
        console: Console,
        on_challenge: F,
    ) -> Result<SessionReport>
    where
        F: FnOnce(&DeviceCodeChallenge),
    {
        let terminal = self.provision(options, on_challenge).await?;
        self.attach(&terminal.socket_uri, console).await
    }

    async fn until_cancelled<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CloudShellError::OperationCancelled),
            result = operation => result,
        }
    }
}
