//! TLS material for registry listeners and clients
//!
//! Both sides present a certificate and verify the peer against the same CA
//! bundle. Sessions negotiate HTTP/2 through ALPN.

use anyhow::{anyhow, Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig,
    SignatureScheme,
};
use rustls_pemfile::{certs, read_all, Item};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const ALPN_H2: &[u8] = b"h2";

/// Load certificates from PEM-encoded data
pub fn load_certificates(pem_data: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(pem_data);
    certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("Failed to parse certificates: {}", e))
}

/// Load the first private key found in PEM-encoded data
pub fn load_private_key(pem_data: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(pem_data);
    let items: Vec<_> = read_all(&mut reader)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| anyhow!("Failed to parse private key: {}", e))?;

    items
        .into_iter()
        .find_map(|item| match item {
            Item::Pkcs8Key(k) => Some(PrivateKeyDer::Pkcs8(k)),
            Item::Sec1Key(k) => Some(PrivateKeyDer::Sec1(k)),
            Item::Pkcs1Key(k) => Some(PrivateKeyDer::Pkcs1(k)),
            _ => None,
        })
        .ok_or_else(|| anyhow!("No private key found in PEM data"))
}

/// Certificate, key and CA bundle of this process's identity
#[derive(Clone, Debug, PartialEq)]
pub struct TlsMaterial {
    /// PEM-encoded certificate chain
    pub cert_pem: Vec<u8>,
    /// PEM-encoded private key
    pub key_pem: Vec<u8>,
    /// PEM-encoded CA certificates used to verify peers
    pub ca_pem: Vec<u8>,
}

impl TlsMaterial {
    pub fn new(cert_pem: Vec<u8>, key_pem: Vec<u8>, ca_pem: Vec<u8>) -> Self {
        Self {
            cert_pem,
            key_pem,
            ca_pem,
        }
    }

    /// Read the identity from PEM files
    pub fn from_files(cert: &Path, key: &Path, ca: &Path) -> Result<Self> {
        let read = |path: &Path| {
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
        };
        let material = Self::new(read(cert)?, read(key)?, read(ca)?);
        material.validate()?;
        debug!("Loaded TLS material from {}", cert.display());
        Ok(material)
    }

    /// Check that the PEM data contains a certificate, a key and a CA
    pub fn validate(&self) -> Result<()> {
        if load_certificates(&self.cert_pem)?.is_empty() {
            return Err(anyhow!("No certificates found in PEM data"));
        }
        load_private_key(&self.key_pem)?;
        self.roots()?;
        Ok(())
    }

    fn roots(&self) -> Result<RootCertStore> {
        let ca_certs = load_certificates(&self.ca_pem)?;
        if ca_certs.is_empty() {
            return Err(anyhow!("No CA certificates found in PEM data"));
        }

        let mut roots = RootCertStore::empty();
        for cert in ca_certs {
            roots
                .add(cert)
                .map_err(|e| anyhow!("Failed to add CA certificate to root store: {}", e))?;
        }
        Ok(roots)
    }

    /// Server configuration requiring a client certificate signed by the CA
    pub fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let provider = provider();
        let verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::new(self.roots()?), provider.clone())
                .build()
                .map_err(|e| anyhow!("Failed to create client verifier: {}", e))?;

        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| anyhow!("Failed to select TLS versions: {}", e))?
            .with_client_cert_verifier(verifier)
            .with_single_cert(
                load_certificates(&self.cert_pem)?,
                load_private_key(&self.key_pem)?,
            )
            .map_err(|e| anyhow!("Failed to create mTLS server config: {}", e))?;
        config.alpn_protocols = vec![ALPN_H2.to_vec()];

        info!("mTLS server configuration created");
        Ok(Arc::new(config))
    }

    /// Client configuration presenting this identity and verifying the
    /// server's chain against the CA. Any identity in the server certificate
    /// is accepted.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>> {
        let provider = provider();
        let verifier = ChainOnlyVerifier::new(Arc::new(self.roots()?), provider.clone())?;

        let mut config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| anyhow!("Failed to select TLS versions: {}", e))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_client_auth_cert(
                load_certificates(&self.cert_pem)?,
                load_private_key(&self.key_pem)?,
            )
            .map_err(|e| anyhow!("Failed to create mTLS client config: {}", e))?;
        config.alpn_protocols = vec![ALPN_H2.to_vec()];

        debug!("mTLS client configuration created");
        Ok(Arc::new(config))
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

/// Verifies a server certificate chain against the CA without requiring the
/// dialed host name in the certificate. Workload identities such as SPIFFE
/// IDs are carried as URI SANs and never match `localhost`.
#[derive(Debug)]
pub struct ChainOnlyVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ChainOnlyVerifier {
    pub fn new(roots: Arc<RootCertStore>, provider: Arc<CryptoProvider>) -> Result<Self> {
        let inner = WebPkiServerVerifier::builder_with_provider(roots, provider)
            .build()
            .map_err(|e| anyhow!("Failed to create server verifier: {}", e))?;
        Ok(Self { inner })
    }
}

impl ServerCertVerifier for ChainOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => {
                debug!("Accepting server certificate not issued for {:?}", server_name);
                Ok(ServerCertVerified::assertion())
            }
            result => result,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
