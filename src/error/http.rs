use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum HttpError {
    InvalidScheme(String),

    InvalidMethod(String),

    ConnectFailed(String),

    // the response head could not be parsed
    MalformedHead(httparse::Error),

    // the peer closed before a complete head arrived
    UnexpectedEof,
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use HttpError::*;
        match self {
            InvalidScheme(s) => write!(f, "Invalid scheme: {}", s),

            InvalidMethod(s) => write!(f, "Invalid method: {}", s),

            ConnectFailed(authority) => write!(f, "Failed to connect to {}", authority),

            MalformedHead(e) => write!(f, "Malformed response head: {}", e),

            UnexpectedEof => write!(f, "Connection closed before a complete response head"),
        }
    }
}

impl From<httparse::Error> for HttpError {
    fn from(e: httparse::Error) -> Self { HttpError::MalformedHead(e) }
}

impl std::error::Error for HttpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let HttpError::MalformedHead(e) = self {
            Some(e)
        } else {
            None
        }
    }
}
