use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum TransportError {
    // setup
    Resolve(std::io::Error),

    ConnectFailed(std::io::Error),

    NoUsableAddress,

    DtlsUnsupported,

    // tls
    Tls(native_tls::Error),

    // usage
    NotConnected,

    PayloadTooLarge,

    BufferTooLarge,
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use TransportError::*;
        match self {
            Resolve(e) => write!(f, "Unable to resolve hostname: {}", e),

            ConnectFailed(e) => write!(f, "Unable to connect to host: {}", e),

            NoUsableAddress => write!(f, "Hostname did not resolve to a usable address"),

            DtlsUnsupported => write!(f, "TLS over UDP is not supported"),

            Tls(e) => write!(f, "TLS error: {}", e),

            NotConnected => write!(f, "Not connected"),

            PayloadTooLarge => write!(f, "Payload too large to send in one call"),

            BufferTooLarge => write!(f, "Receive buffer size too large"),
        }
    }
}

impl From<native_tls::Error> for TransportError {
    fn from(e: native_tls::Error) -> Self { TransportError::Tls(e) }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use TransportError::*;
        match self {
            Resolve(e) | ConnectFailed(e) => Some(e),
            Tls(e) => Some(e),
            _ => None,
        }
    }
}
