use anyhow::{Context, Result, anyhow};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, private_key};
use std::{fs::File, io::BufReader, sync::Arc};
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;

/// Builds the acceptor that wraps client connections in TLS.
pub fn build_acceptor(tls_config: &TlsConfig) -> Result<TlsAcceptor> {
    let cert_chain = load_certs(&tls_config.cert_file)?;
    let key = load_private_key(&tls_config.key_file)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .context("Failed to create TLS server config")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open certificate file: {path}"))?;
    let chain = certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificate file: {path}"))?;

    if chain.is_empty() {
        return Err(anyhow!("No certificates found in {path}"));
    }
    Ok(chain)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open private key file: {path}"))?;
    private_key(&mut BufReader::new(file))
        .with_context(|| format!("Failed to parse private key file: {path}"))?
        .ok_or_else(|| anyhow!("No private key found in {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs, path::PathBuf};

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("tunnel-relay-{}-{name}", std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_certificate_file_is_reported() {
        let config = TlsConfig {
            cert_file: "/nonexistent/server.crt".to_string(),
            key_file: "/nonexistent/server.key".to_string(),
        };
        let err = build_acceptor(&config).err().unwrap();
        assert!(err.to_string().contains("certificate file"));
    }

    #[test]
    fn file_without_certificates_is_rejected() {
        let cert = scratch_file("empty.crt", "not a pem file\n");
        let err = load_certs(cert.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("No certificates"));
        fs::remove_file(cert).ok();
    }

    #[test]
    fn file_without_key_is_rejected() {
        let key = scratch_file("empty.key", "");
        let err = load_private_key(key.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("No private key"));
        fs::remove_file(key).ok();
    }
}
