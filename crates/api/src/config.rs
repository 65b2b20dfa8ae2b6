//! API configuration

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        }
    }
}
