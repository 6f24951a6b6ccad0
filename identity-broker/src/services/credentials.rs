use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::Secret;
use thiserror::Error;

const BASIC_PREFIX: &str = "Basic ";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("Unsupported authorization scheme")]
    UnsupportedScheme,

    #[error("Malformed basic credentials: {0}")]
    MalformedBasic(&'static str),

    #[error("Client credentials or code_verifier required")]
    Missing,
}

/// How the caller of the code exchange authenticated.
#[derive(Debug)]
pub enum CallerAuth {
    Confidential {
        client_id: String,
        secret: Secret<String>,
    },
    /// No secret; possession of the PKCE verifier is the proof.
    Public,
}

/// Credentials presented at the token exchange, parsed before any lookup.
#[derive(Debug)]
pub struct ClientCredentials {
    pub auth: CallerAuth,
    pub verifier: Option<String>,
}

impl ClientCredentials {
    pub fn from_request(
        authorization: Option<&str>,
        verifier: Option<&str>,
    ) -> Result<Self, CredentialsError> {
        let verifier = verifier.filter(|v| !v.is_empty()).map(str::to_string);

        let auth = match authorization {
            Some(header) => parse_basic(header)?,
            None if verifier.is_some() => CallerAuth::Public,
            None => return Err(CredentialsError::Missing),
        };

        Ok(Self { auth, verifier })
    }

    pub fn is_public(&self) -> bool {
        matches!(self.auth, CallerAuth::Public)
    }
}

fn parse_basic(header: &str) -> Result<CallerAuth, CredentialsError> {
    let encoded = header
        .strip_prefix(BASIC_PREFIX)
        .ok_or(CredentialsError::UnsupportedScheme)?;

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| CredentialsError::MalformedBasic("invalid base64"))?;
    let decoded =
        String::from_utf8(decoded).map_err(|_| CredentialsError::MalformedBasic("invalid UTF-8"))?;

    let mut parts = decoded.split(':');
    let (client_id, secret) = match (parts.next(), parts.next(), parts.next()) {
        (Some(id), Some(secret), None) => (id, secret),
        _ => return Err(CredentialsError::MalformedBasic("expected exactly one ':'")),
    };

    if client_id.is_empty() || secret.is_empty() {
        return Err(CredentialsError::MalformedBasic("empty client id or secret"));
    }

    Ok(CallerAuth::Confidential {
        client_id: client_id.to_string(),
        secret: Secret::new(secret.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn basic(raw: &str) -> String {
        format!("Basic {}", STANDARD.encode(raw))
    }

    #[test]
    fn parses_confidential_client() {
        let creds = ClientCredentials::from_request(Some(&basic("c1:s3cret")), None).unwrap();
        match creds.auth {
            CallerAuth::Confidential { client_id, secret } => {
                assert_eq!(client_id, "c1");
                assert_eq!(secret.expose_secret(), "s3cret");
            }
            CallerAuth::Public => panic!("expected confidential"),
        }
        assert!(creds.verifier.is_none());
    }

    #[test]
    fn verifier_alone_is_public_client() {
        let creds = ClientCredentials::from_request(None, Some("verifier")).unwrap();
        assert!(creds.is_public());
        assert_eq!(creds.verifier.as_deref(), Some("verifier"));
    }

    #[test]
    fn confidential_client_may_also_send_verifier() {
        let creds =
            ClientCredentials::from_request(Some(&basic("c1:s")), Some("verifier")).unwrap();
        assert!(!creds.is_public());
        assert_eq!(creds.verifier.as_deref(), Some("verifier"));
    }

    #[test]
    fn rejects_malformed_headers() {
        let bad_utf8 = format!("Basic {}", STANDARD.encode([0xff, 0xfe, b':', b'x']));
        let cases: Vec<(String, CredentialsError)> = vec![
            (basic("no-colon"), CredentialsError::MalformedBasic("expected exactly one ':'")),
            (basic("a:b:c"), CredentialsError::MalformedBasic("expected exactly one ':'")),
            (basic(":secret"), CredentialsError::MalformedBasic("empty client id or secret")),
            (basic("c1:"), CredentialsError::MalformedBasic("empty client id or secret")),
            ("Basic !!!".to_string(), CredentialsError::MalformedBasic("invalid base64")),
            (bad_utf8, CredentialsError::MalformedBasic("invalid UTF-8")),
            ("Bearer abc".to_string(), CredentialsError::UnsupportedScheme),
            ("basic YTpi".to_string(), CredentialsError::UnsupportedScheme),
        ];

        for (header, expected) in cases {
            let err = ClientCredentials::from_request(Some(&header), Some("v")).unwrap_err();
            assert_eq!(err, expected, "header {:?}", header);
        }
    }

    #[test]
    fn nothing_presented_is_rejected() {
        assert_eq!(
            ClientCredentials::from_request(None, None).unwrap_err(),
            CredentialsError::Missing
        );
        assert_eq!(
            ClientCredentials::from_request(None, Some("")).unwrap_err(),
            CredentialsError::Missing
        );
    }
}
