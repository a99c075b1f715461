use crate::errors::{CloudShellError, Result};
use crate::http::HttpResponse;
use crate::oauth::credentials::{AuthTokenSet, TokenErrorResponse, TokenResponse};

/// What a single token poll told us
#[derive(Debug)]
pub(crate) enum PollOutcome {
    Authorized(AuthTokenSet),
    Pending,
}

/// Token endpoint helper methods
pub(crate) struct DeviceCodeFlow;

impl DeviceCodeFlow {
    /// Classify a token endpoint response.
    ///
    /// Bodies without an `error` field are full token responses. The only
    /// non-fatal error is `authorization_pending`. A body that is neither
    /// fails with the HTTP status when the status was not a success.
    pub fn classify_poll_response(response: &HttpResponse) -> Result<PollOutcome> {
        let unreadable = |e: serde_json::Error| {
            if response.is_success() {
                CloudShellError::from(e)
            } else {
                CloudShellError::HttpRequestFailed {
                    status: response.status,
                    body: response.body.clone(),
                }
            }
        };

        let error_body: TokenErrorResponse =
            serde_json::from_str(&response.body).map_err(unreadable)?;

        match error_body.error.as_deref() {
            None => {
                let tokens: TokenResponse =
                    serde_json::from_str(&response.body).map_err(unreadable)?;
                Ok(PollOutcome::Authorized(tokens.into()))
            }
            Some("authorization_pending") => Ok(PollOutcome::Pending),
            Some(_) => Err(CloudShellError::AuthenticationFailed(error_body.description())),
        }
    }

    /// Validate a refresh response. Failures surface as [`CloudShellError::RefreshFailed`].
    pub fn parse_refresh_response(body: &str) -> Result<AuthTokenSet> {
        let error_body: TokenErrorResponse = serde_json::from_str(body)
            .map_err(|e| CloudShellError::RefreshFailed(format!("malformed response: {}", e)))?;

        if error_body.error.is_some() {
            return Err(CloudShellError::RefreshFailed(error_body.description()));
        }

        let response: TokenResponse = serde_json::from_str(body)
            .map_err(|e| CloudShellError::RefreshFailed(format!("malformed response: {}", e)))?;
        let tokens = AuthTokenSet::from(response);

        if !tokens.has_access_token() {
            return Err(CloudShellError::RefreshFailed(
                "response did not contain an access token".to_string(),
            ));
        }

        Ok(tokens)
    }
}
