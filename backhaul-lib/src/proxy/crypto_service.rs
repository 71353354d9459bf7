use crate::{error::*, globals::TlsFileConfig, log::*};
use rustls::{
  pki_types::{self, pem::PemObject},
  ServerConfig,
};
use std::{
  fs::File,
  io::{self, BufReader, Cursor, Read},
  path::PathBuf,
  sync::Arc,
};
use tokio_rustls::TlsAcceptor;

/// TLS context of the HTTP/2 front door, constructed once at startup and
/// shared read-only by all sessions. rustls speaks TLS 1.2/1.3 only, and the
/// advertised ALPN list is exactly `h2`.
#[derive(Clone)]
pub struct ServerCrypto {
  inner: Arc<ServerConfig>,
}

impl ServerCrypto {
  pub fn try_new(tls: &TlsFileConfig) -> BackhaulResult<Self> {
    let certs = read_certs(&tls.cert_path)?;
    let key = read_private_key(&tls.key_path)?;

    let mut server_config = ServerConfig::builder()
      .with_no_client_auth()
      .with_single_cert(certs, key)
      .map_err(|e| BackhaulError::FailedToBuildServerCrypto(e.to_string()))?;
    server_config.alpn_protocols = vec![b"h2".to_vec()];

    info!(
      "TLS enabled with certificate {} and key {}",
      tls.cert_path.display(),
      tls.key_path.display()
    );
    Ok(Self {
      inner: Arc::new(server_config),
    })
  }

  pub fn acceptor(&self) -> TlsAcceptor {
    TlsAcceptor::from(self.inner.clone())
  }
}

/// Read the certificate chain from a PEM file
fn read_certs(cert_path: &PathBuf) -> BackhaulResult<Vec<pki_types::CertificateDer<'static>>> {
  let mut reader = BufReader::new(File::open(cert_path).map_err(|e| {
    io::Error::new(
      e.kind(),
      format!("Unable to load the certificates [{}]: {e}", cert_path.display()),
    )
  })?);
  let certs = pki_types::CertificateDer::pem_reader_iter(&mut reader)
    .collect::<Result<Vec<_>, _>>()
    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Unable to parse the certificates"))?;
  if certs.is_empty() {
    return Err(BackhaulError::FailedToBuildServerCrypto(format!(
      "No certificates found in {}",
      cert_path.display()
    )));
  }
  Ok(certs)
}

/// Read the private key from a PEM file, accepting PKCS#8 and RSA (PKCS#1) encodings
fn read_private_key(key_path: &PathBuf) -> BackhaulResult<pki_types::PrivateKeyDer<'static>> {
  let mut encoded_keys = vec![];
  File::open(key_path)
    .map_err(|e| {
      io::Error::new(
        e.kind(),
        format!("Unable to load the certificate key [{}]: {e}", key_path.display()),
      )
    })?
    .read_to_end(&mut encoded_keys)?;

  let mut reader = Cursor::new(&encoded_keys);
  let mut keys = pki_types::PrivatePkcs8KeyDer::pem_reader_iter(&mut reader)
    .map(|v| v.map(pki_types::PrivateKeyDer::Pkcs8))
    .collect::<Result<Vec<_>, _>>()
    .unwrap_or_default();
  if keys.is_empty() {
    let mut reader = Cursor::new(&encoded_keys);
    keys = pki_types::PrivatePkcs1KeyDer::pem_reader_iter(&mut reader)
      .map(|v| v.map(pki_types::PrivateKeyDer::Pkcs1))
      .collect::<Result<Vec<_>, _>>()
      .unwrap_or_default();
  }

  keys.into_iter().next().ok_or_else(|| {
    BackhaulError::FailedToBuildServerCrypto(format!(
      "No private keys found in {} - Make sure they are in PKCS#8 or PKCS#1 PEM format",
      key_path.display()
    ))
  })
}
