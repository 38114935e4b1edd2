//! Caller key derivation and storage namespacing.

use std::net::IpAddr;

/// Prefix applied to every caller key before it reaches the counter
/// store. Keeps gate-owned entries separable from anything else living
/// in a shared store.
pub const STORAGE_PREFIX: &str = "rate:";

/// Bucket used when no caller identity can be derived at all.
const UNKNOWN_KEY: &str = "unknown";

/// Request-scoped facts a key source derives the rate limit key from.
///
/// The mounting service fills in whatever it knows about the caller;
/// every field is optional.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    /// Authenticated caller identifier, when the request carries one.
    pub user_id: Option<String>,
    /// Network origin address of the request.
    pub remote_addr: Option<IpAddr>,
    /// Caller-supplied API key, for deployments that scope limits by key.
    pub api_key: Option<String>,
}

/// Maps request context to the string that scopes the rate limit.
///
/// Implemented for plain closures, so a custom scheme is one line:
///
/// ```
/// use floodgate::{CallerContext, KeySource};
///
/// let by_api_key = |ctx: &CallerContext| {
///     ctx.api_key.clone().unwrap_or_else(|| "anonymous".to_string())
/// };
/// assert_eq!(by_api_key.key(&CallerContext::default()), "anonymous");
/// ```
pub trait KeySource: Send + Sync {
    /// Derive the caller key for this request.
    fn key(&self, ctx: &CallerContext) -> String;
}

impl<F> KeySource for F
where
    F: Fn(&CallerContext) -> String + Send + Sync,
{
    fn key(&self, ctx: &CallerContext) -> String {
        self(ctx)
    }
}

/// Default key derivation: authenticated user id, falling back to the
/// remote address, falling back to a shared "unknown" bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeySource;

impl KeySource for DefaultKeySource {
    fn key(&self, ctx: &CallerContext) -> String {
        if let Some(ref user) = ctx.user_id {
            return format!("user:{}", user);
        }
        if let Some(addr) = ctx.remote_addr {
            return format!("ip:{}", addr);
        }
        UNKNOWN_KEY.to_string()
    }
}

/// Namespace a caller key for the counter store.
pub fn storage_key(key: &str) -> String {
    format!("{}{}", STORAGE_PREFIX, key)
}
