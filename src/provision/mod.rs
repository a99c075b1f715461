//! Cloud shell and terminal provisioning against Azure Resource Manager.

mod types;

pub use types::{CloudShellEndpoint, ShellKind, TenantDescriptor, TerminalDescriptor, TerminalSize};

use crate::config::CloudShellConfig;
use crate::errors::{CloudShellError, Result};
use crate::http::{HttpInvoker, HttpRequest};
use crate::oauth::AuthTokenSet;
use types::{ConsoleRequest, ConsoleResponse, TenantListResponse};

#[derive(Debug, Clone)]
pub struct CloudShellProvisioner {
    config: CloudShellConfig,
    http: HttpInvoker,
}

impl CloudShellProvisioner {
    pub fn new(config: CloudShellConfig, http: HttpInvoker) -> Self {
        Self { config, http }
    }

    /// List the tenants visible to the signed-in account
    pub async fn list_tenants(&self, tokens: &AuthTokenSet) -> Result<Vec<TenantDescriptor>> {
        let request = authorized(HttpRequest::get(self.config.tenants_url()), tokens);
        let body = self.http.send(request).await?;
        let response: TenantListResponse = serde_json::from_str(&body)?;
        Ok(response.value)
    }

    /// Use the supplied tenant verbatim, otherwise pick the first listed tenant
    pub async fn resolve_tenant(
        &self,
        tokens: &AuthTokenSet,
        supplied_tenant_id: Option<&str>,
    ) -> Result<String> {
        if let Some(tenant_id) = supplied_tenant_id {
            log::debug!("Using supplied tenant {}", tenant_id);
            return Ok(tenant_id.to_string());
        }

        let tenant = self
            .list_tenants(tokens)
            .await?
            .into_iter()
            .next()
            .ok_or(CloudShellError::NoTenantsFound)?;

        log::info!(
            "Selected tenant {} ({})",
            tenant.tenant_id,
            tenant.display_name.as_deref().unwrap_or("unnamed")
        );
        Ok(tenant.tenant_id)
    }

    /// Delete the user's console so the next request provisions a fresh one.
    /// Failures are logged and ignored.
    pub async fn reset_cloud_shell(&self, tokens: &AuthTokenSet) -> Result<()> {
        let request =
            authorized(HttpRequest::delete(self.config.console_url()), tokens).ignore_errors();
        self.http.send(request).await?;
        log::info!("Requested cloud shell reset");
        Ok(())
    }

    /// Request (or create) the user's Linux cloud shell instance
    pub async fn request_cloud_shell(&self, tokens: &AuthTokenSet) -> Result<CloudShellEndpoint> {
        let request = authorized(HttpRequest::put(self.config.console_url()), tokens)
            .json(&ConsoleRequest::linux())?;

        let body = self.http.send(request).await?;
        let response: ConsoleResponse = serde_json::from_str(&body)?;

        if let Some(state) = response.provisioning_state() {
            log::debug!("Cloud shell provisioning state: {}", state);
        }

        let uri = response.uri().ok_or_else(|| {
            CloudShellError::ProvisioningFailed("response did not contain a cloud shell uri".to_string())
        })?;

        log::info!("Cloud shell available at {}", uri);
        Ok(CloudShellEndpoint {
            uri: uri.to_string(),
        })
    }

    /// Request a terminal of the given shell kind and geometry
    pub async fn request_terminal(
        &self,
        tokens: &AuthTokenSet,
        endpoint: &CloudShellEndpoint,
        shell: ShellKind,
        size: TerminalSize,
    ) -> Result<TerminalDescriptor> {
        let mut url = url::Url::parse(&format!(
            "{}/terminals",
            endpoint.uri.trim_end_matches('/')
        ))?;
        url.query_pairs_mut()
            .append_pair("cols", &size.cols.to_string())
            .append_pair("rows", &size.rows.to_string())
            .append_pair("version", &self.config.terminal_api_version)
            .append_pair("shell", shell.as_query_value());

        let request = authorized(HttpRequest::post(url.as_str()), tokens)
            .json(&serde_json::json!({}))?;

        let body = self.http.send(request).await?;
        let descriptor: TerminalDescriptor = serde_json::from_str(&body)?;
        log::info!(
            "Terminal {} ready ({} {}x{})",
            descriptor.id,
            shell,
            size.cols,
            size.rows
        );
        Ok(descriptor)
    }
}

/// Attach the access token. It is used as is for the whole session, so an
/// expired token is only reported.
fn authorized(request: HttpRequest, tokens: &AuthTokenSet) -> HttpRequest {
    if tokens.is_expired() {
        log::warn!(
            "Access token expired {}s into its lifetime; {} {} may be rejected",
            tokens.expires_in_seconds,
            request.method,
            request.uri
        );
    }
    request.bearer(&tokens.access_token)
}
