use std::borrow::Cow;

use pushpool_model::CredentialError;

use crate::provider::ProviderError;

/// Call level failure of a connection operation.
///
/// Per recipient delivery problems never show up here; they are part of the
/// [`DispatchResult`](pushpool_model::DispatchResult).
#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: Cow<'static, str>,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            context: context.into(),
        }
    }
    pub const fn contextual<T: Into<ErrorKind>>(
        context: &'static str,
    ) -> impl FnOnce(T) -> Self {
        move |kind| Self::new(kind.into(), context)
    }
    pub fn not_initialized() -> Self {
        Self::new(ErrorKind::NotInitialized, "connection is not initialized")
    }
    pub fn destroyed() -> Self {
        Self::new(ErrorKind::Destroyed, "connection is destroyed")
    }
}

#[derive(Debug)]
pub enum ErrorKind {
    NotInitialized,
    AlreadyInitialized,
    Destroyed,
    EmptyRecipients,
    Provider(ProviderError),
    Credentials(CredentialError),
}

impl From<ProviderError> for ErrorKind {
    fn from(e: ProviderError) -> Self {
        ErrorKind::Provider(e)
    }
}

impl From<CredentialError> for ErrorKind {
    fn from(e: CredentialError) -> Self {
        ErrorKind::Credentials(e)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotInitialized => write!(f, "not initialized"),
            ErrorKind::AlreadyInitialized => write!(f, "already initialized"),
            ErrorKind::Destroyed => write!(f, "destroyed"),
            ErrorKind::EmptyRecipients => write!(f, "no recipients"),
            ErrorKind::Provider(e) => write!(f, "provider error: {}", e),
            ErrorKind::Credentials(e) => write!(f, "credentials error: {}", e),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.context, self.kind)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Provider(e) => Some(e),
            ErrorKind::Credentials(e) => Some(e),
            _ => None,
        }
    }
}
