pub mod cancel;
pub mod codec;
pub mod config;
pub mod errors;
pub mod http;
pub mod oauth;
pub mod provision;
pub mod session;
pub mod terminal;

pub use cancel::CancellationSignal;
pub use config::CloudShellConfig;
pub use errors::{CloudShellError, Result};
pub use http::{HttpInvoker, HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use oauth::{AuthTokenSet, AuthenticationManager, DeviceCodeChallenge};
pub use provision::{
    CloudShellEndpoint, CloudShellProvisioner, ShellKind, TenantDescriptor, TerminalDescriptor,
    TerminalSize,
};
pub use session::{CloudShellSession, SessionOptions};
pub use terminal::{Console, ConnectionState, SessionReport, TerminalSession};
