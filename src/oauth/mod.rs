//! Device code authentication against the Microsoft identity platform.
//!
//! The manager requests a device code, hands the challenge to the caller so
//! the user can redeem it in a browser, then polls the token endpoint until
//! the user finishes, the challenge expires, or the session is cancelled.

mod credentials;
mod flow;

pub use credentials::{AuthTokenSet, DeviceCodeChallenge, TokenErrorResponse, TokenResponse};

use crate::cancel::CancellationSignal;
use crate::config::CloudShellConfig;
use crate::errors::{CloudShellError, Result};
use crate::http::{HttpInvoker, HttpRequest};
use flow::{DeviceCodeFlow, PollOutcome};

/// Tenant used for the initial device code exchange
const COMMON_TENANT: &str = "common";

/// Owns the token set for one session
#[derive(Debug)]
pub struct AuthenticationManager {
    config: CloudShellConfig,
    http: HttpInvoker,
    tokens: Option<AuthTokenSet>,
}

impl AuthenticationManager {
    pub fn new(config: CloudShellConfig, http: HttpInvoker) -> Self {
        Self {
            config,
            http,
            tokens: None,
        }
    }

    pub fn tokens(&self) -> Option<&AuthTokenSet> {
        self.tokens.as_ref()
    }

    /// Request a new device code challenge
    pub async fn request_device_code(&self) -> Result<DeviceCodeChallenge> {
        let request = HttpRequest::post(self.config.device_code_url()).form(&[
            ("client_id", self.config.client_id.as_str()),
            ("resource", self.config.resource.as_str()),
        ]);

        let body = self.http.send(request).await?;
        let challenge: DeviceCodeChallenge = serde_json::from_str(&body)?;
        log::info!(
            "Device code issued (expires in {}s, poll interval {}s)",
            challenge.expires_in,
            challenge.interval
        );
        Ok(challenge)
    }

    /// Run the whole device code flow.
    ///
    /// `on_challenge` receives the challenge once, before polling starts, so
    /// the caller can show the user where to enter the code.
    pub async fn acquire_via_device_code<F>(
        &mut self,
        cancel: &CancellationSignal,
        on_challenge: F,
    ) -> Result<&AuthTokenSet>
    where
        F: FnOnce(&DeviceCodeChallenge),
    {
        let challenge = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CloudShellError::OperationCancelled),
            challenge = self.request_device_code() => challenge?,
        };
        on_challenge(&challenge);
        self.poll_for_token(&challenge, cancel).await
    }

    /// Poll the token endpoint at the challenge's interval until the user
    /// redeems the code or `floor(expires_in / interval)` attempts are spent.
    pub async fn poll_for_token(
        &mut self,
        challenge: &DeviceCodeChallenge,
        cancel: &CancellationSignal,
    ) -> Result<&AuthTokenSet> {
        let max_attempts = challenge.max_poll_attempts();
        let interval = challenge.poll_interval();
        let token_url = self.config.token_url(COMMON_TENANT);

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(CloudShellError::OperationCancelled);
            }

            let request = HttpRequest::post(&token_url)
                .form(&[
                    ("grant_type", "device_code"),
                    ("resource", self.config.resource.as_str()),
                    ("client_id", self.config.client_id.as_str()),
                    ("code", challenge.device_code.as_str()),
                ]);

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CloudShellError::OperationCancelled),
                response = self.http.exchange(&request) => response?,
            };

            match DeviceCodeFlow::classify_poll_response(&response)? {
                PollOutcome::Authorized(tokens) => {
                    log::info!("Device code redeemed after {} poll(s)", attempt);
                    return Ok(self.tokens.insert(tokens));
                }
                PollOutcome::Pending => {
                    log::debug!("Authorization pending ({}/{})", attempt, max_attempts);
                    if attempt == max_attempts {
                        break;
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(CloudShellError::OperationCancelled),
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
            }
        }

        log::warn!("Device code expired after {} poll(s)", max_attempts);
        Err(CloudShellError::AuthenticationTimedOut)
    }

    /// Exchange the stored refresh token for a token pair scoped to `tenant_id`
    pub async fn refresh(&mut self, tenant_id: &str) -> Result<&AuthTokenSet> {
        let refresh_token = match &self.tokens {
            Some(tokens) if !tokens.refresh_token.is_empty() => tokens.refresh_token.clone(),
            _ => {
                return Err(CloudShellError::RefreshFailed(
                    "no refresh token available".to_string(),
                ))
            }
        };

        // HTTP failures are not raised here; the payload is validated instead.
        let request = HttpRequest::post(self.config.token_url(tenant_id))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("resource", self.config.resource.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .ignore_errors();

        let body = self.http.send(request).await?;
        let tokens = DeviceCodeFlow::parse_refresh_response(&body)?;
        log::info!("Refreshed access token for tenant {}", tenant_id);
        Ok(self.tokens.insert(tokens))
    }
}
