use std::fmt::{Display, Formatter};

#[derive(Debug, PartialEq, Eq)]
pub enum WsError {
    UrlNotSet,

    InvalidScheme(String),
}

impl Display for WsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use WsError::*;
        match self {
            UrlNotSet => write!(f, "URL not set"),

            InvalidScheme(s) => write!(f, "Invalid scheme: {}", s),
        }
    }
}

// use default impl
impl std::error::Error for WsError {}
