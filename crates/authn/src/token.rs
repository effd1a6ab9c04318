//! Security tokens presented by API consumers.
//!
//! A [`SecurityToken`] is what the gateway extracted from a request: an API
//! key (plain or MD5-hashed), an OAuth client id, or a client TLS
//! certificate. Token kinds travel over the wire as upper-case names (see
//! [`TokenKind::as_str`]); [`SecurityToken::from_parts`] parses them and keeps
//! anything unrecognised as [`SecurityToken::Unknown`] so that the resolver
//! can answer "no subscription" instead of failing.

use std::fmt;

/// The kind of a [`SecurityToken`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// A plain API key.
    ApiKey,
    /// The hex MD5 digest of an API key.
    Md5ApiKey,
    /// An OAuth client id.
    ClientId,
    /// A PEM-encoded client certificate.
    ClientCertificate,
    /// A kind this gateway does not know how to resolve.
    Unknown,
}

impl TokenKind {
    /// Every kind, in resolution-metrics order.
    pub const ALL: [TokenKind; 5] = [
        TokenKind::ApiKey,
        TokenKind::Md5ApiKey,
        TokenKind::ClientId,
        TokenKind::ClientCertificate,
        TokenKind::Unknown,
    ];

    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::ApiKey => "API_KEY",
            TokenKind::Md5ApiKey => "MD5_API_KEY",
            TokenKind::ClientId => "CLIENT_ID",
            TokenKind::ClientCertificate => "CLIENT_CERTIFICATE",
            TokenKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A credential presented by an API consumer.
///
/// The [`Debug`] implementation never prints the token value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum SecurityToken {
    /// A plain API key.
    ApiKey(String),
    /// The hex MD5 digest of an API key (compared case-insensitively).
    Md5ApiKey(String),
    /// An OAuth client id.
    ClientId(String),
    /// A PEM-encoded client certificate.
    ClientCertificate(String),
    /// A token of a kind this gateway does not resolve.
    Unknown {
        /// The kind as it was received.
        kind: String,
        /// The raw value.
        value: String,
    },
}

impl SecurityToken {
    /// An API key token.
    #[must_use]
    pub fn for_api_key(key: impl Into<String>) -> Self {
        Self::ApiKey(key.into())
    }

    /// An MD5 API key token.
    #[must_use]
    pub fn for_md5_api_key(digest: impl Into<String>) -> Self {
        Self::Md5ApiKey(digest.into())
    }

    /// A client id token.
    #[must_use]
    pub fn for_client_id(client_id: impl Into<String>) -> Self {
        Self::ClientId(client_id.into())
    }

    /// A client certificate token.
    #[must_use]
    pub fn for_client_certificate(certificate: impl Into<String>) -> Self {
        Self::ClientCertificate(certificate.into())
    }

    /// Builds a token from its wire kind and value.
    ///
    /// Kind names are matched case-insensitively; `CERTIFICATE` is accepted
    /// as an alias of `CLIENT_CERTIFICATE`. Any other kind yields
    /// [`SecurityToken::Unknown`].
    ///
    /// ```
    /// use gateway_common_authn::{SecurityToken, TokenKind};
    ///
    /// assert_eq!(SecurityToken::from_parts("API_KEY", "k").kind(), TokenKind::ApiKey);
    /// assert_eq!(SecurityToken::from_parts("jwt", "t").kind(), TokenKind::Unknown);
    /// ```
    #[must_use]
    pub fn from_parts(kind: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        let is = |name: &str| kind.eq_ignore_ascii_case(name);
        if is("API_KEY") {
            Self::ApiKey(value)
        } else if is("MD5_API_KEY") {
            Self::Md5ApiKey(value)
        } else if is("CLIENT_ID") {
            Self::ClientId(value)
        } else if is("CLIENT_CERTIFICATE") || is("CERTIFICATE") {
            Self::ClientCertificate(value)
        } else {
            Self::Unknown { kind: kind.to_owned(), value }
        }
    }

    /// The kind of this token.
    #[must_use]
    pub fn kind(&self) -> TokenKind {
        match self {
            Self::ApiKey(_) => TokenKind::ApiKey,
            Self::Md5ApiKey(_) => TokenKind::Md5ApiKey,
            Self::ClientId(_) => TokenKind::ClientId,
            Self::ClientCertificate(_) => TokenKind::ClientCertificate,
            Self::Unknown { .. } => TokenKind::Unknown,
        }
    }

    /// The raw token value.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::ApiKey(v)
            | Self::Md5ApiKey(v)
            | Self::ClientId(v)
            | Self::ClientCertificate(v)
            | Self::Unknown { value: v, .. } => v,
        }
    }
}

impl fmt::Debug for SecurityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("SecurityToken");
        s.field("kind", &self.kind());
        if let Self::Unknown { kind, .. } = self {
            s.field("received_kind", kind);
        }
        s.field("value", &"<redacted>").finish()
    }
}
