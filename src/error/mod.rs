#![allow(missing_docs)]
//! Errors

mod http;
mod transport;
mod ws;

pub use http::HttpError;
pub use transport::TransportError;
pub use ws::WsError;

use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum Error {
    Transport(TransportError),

    Http(HttpError),

    Ws(WsError),

    Io(std::io::Error),
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self { Error::Transport(e) }
}

impl From<HttpError> for Error {
    fn from(e: HttpError) -> Self { Error::Http(e) }
}

impl From<WsError> for Error {
    fn from(e: WsError) -> Self { Error::Ws(e) }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error { Error::Io(e) }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use Error::*;
        match self {
            Transport(e) => write!(f, "Transport error: {}", e),
            Http(e) => write!(f, "Http client error: {}", e),
            Ws(e) => write!(f, "Websocket client error: {}", e),
            Io(e) => write!(f, "Io error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use Error::*;

        match self {
            Transport(e) => e.source(),
            Http(e) => e.source(),
            Ws(e) => e.source(),
            Io(e) => e.source(),
        }
    }
}
