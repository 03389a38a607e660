use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to build http client for origin `{origin}`: {source}")]
    Client {
        origin: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("upstream request for origin `{origin}` failed: {source}")]
    Upstream {
        origin: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("origin `{origin}` answered its health probe with status {status}")]
    Unhealthy { origin: String, status: u16 },
}

impl ProxyError {
    pub fn upstream(origin: &str, source: reqwest::Error) -> Self {
        Self::Upstream {
            origin: origin.to_string(),
            source,
        }
    }
}
