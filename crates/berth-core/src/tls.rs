//! Certificate material for TLS endpoints.
//!
//! No cryptography happens here: the bundle carries raw PEM bytes from the
//! filesystem to the I/O driver, which owns the actual handshake.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EndpointError, EndpointResult};

/// Key and certificate material for one TLS endpoint, immutable once
/// built.
///
/// A server bundle carries a key and certificate pair; a client bundle
/// optionally carries an identity pair plus a trust-anchor set loaded from
/// a CA directory. A client bundle with no trust anchors means the driver
/// should not verify the peer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CertificateBundle {
    private_key: Option<Vec<u8>>,
    certificate: Option<Vec<u8>>,
    trust_anchors: Vec<Vec<u8>>,
}

impl CertificateBundle {
    /// Builds a server bundle from a private key file and a certificate
    /// file. When `certificate` is `None` the key file is expected to hold
    /// both.
    pub fn for_server(private_key: &Path, certificate: Option<&Path>) -> EndpointResult<Self> {
        let key = read_pem(private_key)?;
        let cert = match certificate {
            Some(path) => read_pem(path)?,
            None => key.clone(),
        };
        Ok(Self {
            private_key: Some(key),
            certificate: Some(cert),
            trust_anchors: Vec::new(),
        })
    }

    /// Builds a client bundle from an optional identity pair and an
    /// optional CA directory.
    pub fn for_client(
        identity: Option<(&Path, &Path)>,
        ca_directory: Option<&Path>,
    ) -> EndpointResult<Self> {
        let (private_key, certificate) = match identity {
            Some((key, cert)) => (Some(read_pem(key)?), Some(read_pem(cert)?)),
            None => (None, None),
        };
        let trust_anchors = match ca_directory {
            Some(dir) => load_trust_anchors(dir)?,
            None => Vec::new(),
        };
        Ok(Self {
            private_key,
            certificate,
            trust_anchors,
        })
    }

    /// The PEM bytes of the private key, if any.
    pub fn private_key(&self) -> Option<&[u8]> {
        self.private_key.as_deref()
    }

    /// The PEM bytes of the certificate, if any.
    pub fn certificate(&self) -> Option<&[u8]> {
        self.certificate.as_deref()
    }

    /// The PEM bytes of each trust anchor.
    pub fn trust_anchors(&self) -> &[Vec<u8>] {
        &self.trust_anchors
    }

    /// Whether the bundle carries trust anchors for peer verification.
    pub fn verifies_peer(&self) -> bool {
        !self.trust_anchors.is_empty()
    }
}

fn read_pem(path: &Path) -> EndpointResult<Vec<u8>> {
    fs::read(path).map_err(|e| {
        EndpointError::Parse(format!("cannot read certificate file {}: {e}", path.display()))
    })
}

/// Loads every readable `.pem` file in `dir`, in name order. Unreadable
/// entries are skipped rather than failing the whole bundle.
fn load_trust_anchors(dir: &Path) -> EndpointResult<Vec<Vec<u8>>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| {
            EndpointError::Parse(format!(
                "cannot read CA certificate directory {}: {e}",
                dir.display()
            ))
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pem"))
        })
        .collect();
    paths.sort();
    Ok(paths.iter().filter_map(|path| fs::read(path).ok()).collect())
}
