use std::time::Duration;

/// Endpoint and client configuration for Azure Cloud Shell
#[derive(Clone, Debug)]
pub struct CloudShellConfig {
    /// Identity provider base URL (device code and token endpoints live below it)
    pub login_url: String,
    /// Resource manager base URL (tenants and console endpoints live below it)
    pub management_url: String,
    /// OAuth client ID used for the device code flow
    pub client_id: String,
    /// Resource the issued tokens are scoped to
    pub resource: String,
    /// User agent sent with every HTTP request
    pub user_agent: String,
    pub tenant_api_version: String,
    pub console_api_version: String,
    pub terminal_api_version: String,
    /// Sleep between non-blocking console input checks
    pub input_poll_interval: Duration,
    /// How long to wait for the peer to answer our close frame
    pub close_timeout: Duration,
    /// Maximum number of bytes written to the output sink per write call
    pub receive_buffer_size: usize,
}

impl Default for CloudShellConfig {
    fn default() -> Self {
        Self {
            login_url: "https://login.microsoftonline.com".to_string(),
            management_url: "https://management.azure.com".to_string(),
            client_id: "aebc6443-996d-45c2-90f0-388ff96faa56".to_string(),
            resource: "https://management.core.windows.net/".to_string(),
            user_agent: format!("cloudshell-rs/{}", env!("CARGO_PKG_VERSION")),
            tenant_api_version: "2018-01-01".to_string(),
            console_api_version: "2018-10-01".to_string(),
            terminal_api_version: "2019-01-01".to_string(),
            input_poll_interval: Duration::from_millis(5),
            close_timeout: Duration::from_secs(2),
            receive_buffer_size: 4096,
        }
    }
}

impl CloudShellConfig {
    pub(crate) fn device_code_url(&self) -> String {
        format!("{}/common/oauth2/devicecode", self.login_url)
    }

    pub(crate) fn token_url(&self, tenant: &str) -> String {
        format!("{}/{}/oauth2/token", self.login_url, tenant)
    }

    pub(crate) fn tenants_url(&self) -> String {
        format!(
            "{}/tenants?api-version={}",
            self.management_url, self.tenant_api_version
        )
    }

    pub(crate) fn console_url(&self) -> String {
        format!(
            "{}/providers/Microsoft.Portal/consoles/default?api-version={}",
            self.management_url, self.console_api_version
        )
    }
}
