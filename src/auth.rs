use crate::error::TunnelError;

/// Shared-secret check on the `X-Pass` header, plus the destination policy
/// of the CONNECT front-end.
#[derive(Debug, Clone, Copy)]
pub struct Authorizer<'a> {
    secret: Option<&'a str>,
    default_target: &'a str,
    restrict_destinations: bool,
}

impl<'a> Authorizer<'a> {
    #[must_use]
    pub const fn new(
        secret: Option<&'a str>,
        default_target: &'a str,
        restrict_destinations: bool,
    ) -> Self {
        Self {
            secret,
            default_target,
            restrict_destinations,
        }
    }

    /// Byte-for-byte comparison against the configured secret. Passes
    /// unconditionally when no secret is set.
    pub fn check_password(&self, supplied: Option<&[u8]>) -> Result<(), TunnelError> {
        match self.secret {
            Some(secret) if supplied != Some(secret.as_bytes()) => Err(TunnelError::Unauthorized),
            _ => Ok(()),
        }
    }

    /// Restricted front-ends may only reach loopback names or the default
    /// target, whether or not a secret is configured. The check is a plain
    /// prefix match.
    pub fn check_destination(&self, target: &str) -> Result<(), TunnelError> {
        if !self.restrict_destinations {
            return Ok(());
        }
        if target.starts_with("127.0.0.1")
            || target.starts_with("localhost")
            || target == self.default_target
        {
            Ok(())
        } else {
            Err(TunnelError::Forbidden(target.to_string()))
        }
    }
}
