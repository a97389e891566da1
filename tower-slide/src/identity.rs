/// Derives the requester id that a quota is tracked against.
///
/// Returning `None` means the caller cannot be identified; such requests are admitted
/// without being metered.
pub trait Identify<Req>: Send + Sync {
    fn identify(&self, req: &Req) -> Option<String>;
}

impl<Req, F> Identify<Req> for F
where
    F: Fn(&Req) -> Option<String> + Send + Sync,
{
    fn identify(&self, req: &Req) -> Option<String> {
        self(req)
    }
}

/// Identifies `http` requests by the `sub` claim of their bearer JWT.
///
/// The token is only decoded, not verified: it keys the quota, it does not authorise the
/// request. Anything unreadable yields `None`.
#[cfg(feature = "http")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerSubject;

#[cfg(feature = "http")]
impl<B> Identify<http::Request<B>> for BearerSubject {
    fn identify(&self, req: &http::Request<B>) -> Option<String> {
        bearer_subject(req.headers())
    }
}

#[cfg(feature = "http")]
#[derive(serde::Deserialize)]
struct Claims {
    sub: Option<String>,
}

/// Reads `Authorization: Bearer <jwt>` and returns the token's `sub` claim.
#[cfg(feature = "http")]
pub fn bearer_subject(headers: &http::HeaderMap) -> Option<String> {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();

    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    claims.sub.filter(|sub| !sub.is_empty())
}
