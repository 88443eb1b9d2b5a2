use crate::mounter::Env;

/// Error type returned by identity resolvers. Its text is never shown to
/// plugin callers.
pub type ResolveError = Box<dyn std::error::Error + Send + Sync>;

/// Maps directory-service credentials to a numeric identity.
pub trait IdResolver: Send + Sync {
    /// Return the `(uid, gid)` for `username`, authenticating with
    /// `password`.
    fn resolve(
        &self,
        env: &Env,
        username: &str,
        password: &str,
    ) -> std::result::Result<(String, String), ResolveError>;
}
