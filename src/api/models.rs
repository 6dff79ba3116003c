use serde::{Deserialize, Serialize};

/// Connection details of the stream catalog
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub server_url: String,
    pub username: String,
    pub password: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            username: "username".to_string(),
            password: "password".to_string(),
        }
    }
}
