/// Errors that can occur while authenticating, provisioning or driving a cloud shell session
#[derive(Debug, thiserror::Error)]
pub enum CloudShellError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Authentication timed out before the device code was redeemed")]
    AuthenticationTimedOut,
    #[error("Operation cancelled")]
    OperationCancelled,
    #[error("No tenants found for this account")]
    NoTenantsFound,
    #[error("HTTP request failed: {status} - {body}")]
    HttpRequestFailed { status: u16, body: String },
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("Cloud shell provisioning failed: {0}")]
    ProvisioningFailed(String),
    #[error("Terminal transport fault: {0}")]
    TransportFault(String),
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CloudShellError {
    /// True when the error is a graceful abort rather than a fault
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CloudShellError::OperationCancelled)
    }
}

pub type Result<T> = std::result::Result<T, CloudShellError>;
