use std::path::PathBuf;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;

/// PEM certificate and key used to terminate TLS in front of the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TlsConfig {
    pub async fn load(&self) -> anyhow::Result<RustlsConfig> {
        RustlsConfig::from_pem_file(&self.cert_path, &self.key_path)
            .await
            .with_context(|| {
                format!(
                    "failed to load TLS certificate {} with key {}",
                    self.cert_path.display(),
                    self.key_path.display()
                )
            })
    }
}
