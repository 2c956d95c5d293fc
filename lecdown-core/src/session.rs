use std::fmt;

use thiserror::Error;

/// Cookie names sent on the wire. The login flow reads the tokens from the
/// browser cookies `Authorization_Api` and `Signature_Api`.
pub const AUTHORIZATION_COOKIE: &str = "Authorization";
pub const SIGNATURE_COOKIE: &str = "Signature";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session token {0} is empty")]
    EmptyToken(&'static str),
    #[error("session token {0} contains characters not allowed in a header")]
    InvalidToken(&'static str),
}

/// Short-lived credential obtained by the login flow. It is shared read-only
/// by every request of a batch.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    authorization: String,
    signature: String,
}

impl SessionCredential {
    pub fn new(
        authorization: impl Into<String>,
        signature: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let authorization = authorization.into().trim().to_string();
        let signature = signature.into().trim().to_string();
        check_token(AUTHORIZATION_COOKIE, &authorization)?;
        check_token(SIGNATURE_COOKIE, &signature)?;
        Ok(Self {
            authorization,
            signature,
        })
    }

    /// Value of the `Cookie` header sent on metadata, manifest and key requests.
    pub fn header_value(&self) -> String {
        format!(
            "{AUTHORIZATION_COOKIE}={}; {SIGNATURE_COOKIE}={}",
            self.authorization, self.signature
        )
    }

    /// Header line in the `Name:value` form the bulk transfer tool expects.
    pub fn transfer_header(&self) -> String {
        format!("Cookie:{}", self.header_value())
    }
}

fn check_token(name: &'static str, value: &str) -> Result<(), SessionError> {
    if value.is_empty() {
        return Err(SessionError::EmptyToken(name));
    }
    if value.chars().any(|c| c.is_control() || c == ';') {
        return Err(SessionError::InvalidToken(name));
    }
    Ok(())
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("authorization", &"<redacted>")
            .field("signature", &"<redacted>")
            .finish()
    }
}
