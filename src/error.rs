use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure type shared by the mounters and the process invokers.
///
/// Everything except [`Error::Resolve`] is safe to hand back to the
/// plugin caller: the messages only carry option names, local paths and
/// output of the mount tooling.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Not allowed options : {}", .0.join(", "))]
    NotAllowedOptions(Vec<String>),

    #[error("Missing mandatory options : {}", .0.join(", "))]
    MissingMandatoryOptions(Vec<String>),

    #[error("required '{0}' option is missing")]
    MissingOption(&'static str),

    #[error("invalid {name} '{value}': expected a numeric id")]
    InvalidId { name: &'static str, value: String },

    #[error("target '{0}' ends with the reserved suffix _mapfs")]
    ReservedName(String),

    #[error("LDAP username is specified but LDAP is not configured")]
    LdapNotConfigured,

    #[error("LDAP username is specified but LDAP password is missing")]
    LdapPasswordMissing,

    #[error("uid {uid} gid {gid} does not have read access to the share mounted at {path}")]
    AccessDenied { uid: u32, gid: u32, path: String },

    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{command} failed ({status}): {output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },

    #[error("{command}: command timed out")]
    TimedOut { command: String },

    #[error("{command}: command exited")]
    Exited { command: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Raised by the identity resolver. The text may echo directory-service
    /// responses, so it is never marked caller-safe.
    #[error(transparent)]
    Resolve(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn io<S: Into<String>>(context: S, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the message may be surfaced to the plugin caller verbatim.
    pub fn is_safe(&self) -> bool {
        !matches!(self, Error::Resolve(_))
    }
}
