#[derive(thiserror::Error, Debug)]
pub enum VueError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("token cache error: {0}")]
    TokenCache(String),
}

impl VueError {
    /// Authentication problems are never worth retrying.
    pub fn is_auth(&self) -> bool {
        matches!(self, VueError::Auth(_)) || matches!(self, VueError::Api { status: 401 | 403, .. })
    }
}
