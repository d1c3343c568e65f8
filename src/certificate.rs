//! Server certificate module
//!
//! The stunnel proxy in front of the NETCONF server reads its certificate
//! either from one combined PEM file (`cert = ` only) or from a
//! certificate and a private key (`cert = ` and `key = `). Replacing the
//! certificate installs the new files under canonical names in the
//! certificate directory, points the proxy configuration at them and
//! sends the proxy a reload signal.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ConfiguratorError, Result};
use crate::fsutil;
use crate::locator::{self, ArtifactSet};
use crate::module::{CommitOutcome, ConfigModule};
use crate::proxy_config;
use crate::reload::{self, ReloadStatus};
use crate::settings::Settings;
use crate::x509::{self, CertificateInfo};

/// Installed name of a combined certificate and key
pub const PEM_FILE: &str = "server.pem";
/// Installed name of a separate certificate
pub const CRT_FILE: &str = "server.crt";
/// Installed name of a separate private key
pub const KEY_FILE: &str = "server.key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CertificateKind {
    /// Certificate and key in one PEM file
    PemCombined,
    /// Certificate and key in two files
    CertKeyPair,
}

/// A parsed certificate and where it comes from.
///
/// `CertKeyPair` records always carry a key path that existed when the
/// record was built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateRecord {
    pub kind: CertificateKind,
    pub cert_path: PathBuf,
    pub key_path: Option<PathBuf>,
    pub info: CertificateInfo,
}

impl CertificateRecord {
    /// Parse a combined PEM file
    pub fn pem(path: &Path) -> Result<Self> {
        Ok(Self {
            kind: CertificateKind::PemCombined,
            cert_path: path.to_path_buf(),
            key_path: None,
            info: x509::parse_certificate(path)?,
        })
    }

    /// Parse a certificate and check its key file exists
    pub fn pair(cert: &Path, key: &Path) -> Result<Self> {
        let info = x509::parse_certificate(cert)?;
        if !key.is_file() {
            return Err(ConfiguratorError::NotFound(key.to_path_buf()));
        }
        Ok(Self {
            kind: CertificateKind::CertKeyPair,
            cert_path: cert.to_path_buf(),
            key_path: Some(key.to_path_buf()),
            info,
        })
    }
}

/// What the proxy is currently configured with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum CertificateState {
    /// The proxy configuration could not be read
    Unavailable { reason: String },
    /// Configured, but the certificate or key is inaccessible or corrupted
    Inaccessible {
        cert_path: PathBuf,
        key_path: Option<PathBuf>,
        reason: String,
    },
    Installed(CertificateRecord),
}

/// A pending certificate replacement; exactly one kind at a time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StagedCertificate {
    Pem { path: PathBuf },
    Pair { cert: PathBuf, key: PathBuf },
}

#[derive(Debug, Clone)]
struct Staged {
    change: StagedCertificate,
    record: CertificateRecord,
}

/// Server certificate configuration module
#[derive(Debug)]
pub struct CertificateModule {
    settings: Settings,
    artifacts: Option<ArtifactSet>,
    state: CertificateState,
    staged: Option<Staged>,
}

impl CertificateModule {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            artifacts: None,
            state: CertificateState::Unavailable {
                reason: "not loaded".to_string(),
            },
            staged: None,
        }
    }

    /// Currently configured certificate
    pub fn state(&self) -> &CertificateState {
        &self.state
    }

    /// The pending replacement, if any
    pub fn staged(&self) -> Option<&StagedCertificate> {
        self.staged.as_ref().map(|s| &s.change)
    }

    /// Parsed details of the pending replacement
    pub fn staged_record(&self) -> Option<&CertificateRecord> {
        self.staged.as_ref().map(|s| &s.record)
    }

    /// Stage a combined PEM file, replacing any other staged change.
    ///
    /// The file must hold a parsable certificate.
    pub fn stage_pem(&mut self, path: impl AsRef<Path>) -> Result<&CertificateRecord> {
        let path = path.as_ref();
        let record = CertificateRecord::pem(path).map_err(|e| {
            ConfiguratorError::Rejected(format!(
                "Certificate \"{}\" inaccessible or not valid: {}",
                path.display(),
                e
            ))
        })?;
        let staged = self.staged.insert(Staged {
            change: StagedCertificate::Pem {
                path: path.to_path_buf(),
            },
            record,
        });
        Ok(&staged.record)
    }

    /// Stage a certificate and private key, replacing any other staged
    /// change.
    ///
    /// The certificate must be parsable and the key file must exist.
    pub fn stage_pair(
        &mut self,
        cert: impl AsRef<Path>,
        key: impl AsRef<Path>,
    ) -> Result<&CertificateRecord> {
        let (cert, key) = (cert.as_ref(), key.as_ref());
        let record = CertificateRecord::pair(cert, key).map_err(|e| match e {
            ConfiguratorError::NotFound(ref missing) if missing == key => ConfiguratorError::Rejected(
                format!("Private key \"{}\" inaccessible", key.display()),
            ),
            e => ConfiguratorError::Rejected(format!(
                "Certificate \"{}\" inaccessible or not valid: {}",
                cert.display(),
                e
            )),
        })?;
        let staged = self.staged.insert(Staged {
            change: StagedCertificate::Pair {
                cert: cert.to_path_buf(),
                key: key.to_path_buf(),
            },
            record,
        });
        Ok(&staged.record)
    }

    /// Drop the pending replacement
    pub fn discard_staged(&mut self) {
        self.staged = None;
    }

    fn artifacts(&mut self) -> Result<ArtifactSet> {
        match &self.artifacts {
            Some(artifacts) => Ok(artifacts.clone()),
            None => Ok(self.locate()?.clone()),
        }
    }

    /// Install the staged files, returning the installed cert and key paths
    fn install(&self, change: &StagedCertificate, cert_dir: &Path) -> Result<(PathBuf, Option<PathBuf>)> {
        match change {
            StagedCertificate::Pem { path } => {
                let dest = cert_dir.join(PEM_FILE);
                fsutil::copy_atomic(path, &dest)?;
                info!(from = %path.display(), to = %dest.display(), "installed certificate");
                Ok((dest, None))
            }
            StagedCertificate::Pair { cert, key } => {
                let cert_dest = cert_dir.join(CRT_FILE);
                let key_dest = cert_dir.join(KEY_FILE);
                fsutil::copy_atomic(cert, &cert_dest)?;
                fsutil::copy_atomic(key, &key_dest)?;
                info!(
                    cert = %cert_dest.display(),
                    key = %key_dest.display(),
                    "installed certificate and key"
                );
                Ok((cert_dest, Some(key_dest)))
            }
        }
    }
}

impl ConfigModule for CertificateModule {
    fn name(&self) -> &'static str {
        "Server Certificate"
    }

    fn locate(&mut self) -> Result<&ArtifactSet> {
        let artifacts = locator::locate_certificate(&self.settings)?;
        Ok(self.artifacts.insert(artifacts))
    }

    fn load(&mut self) -> Result<()> {
        let artifacts = self.artifacts()?;
        self.staged = None;

        let Some(config_path) = artifacts.proxy_config_path else {
            self.state = CertificateState::Unavailable {
                reason: format!(
                    "{} not found",
                    self.settings.proxy_config_path().display()
                ),
            };
            return Ok(());
        };

        let fields = match proxy_config::read_fields(&config_path) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(error = %e, "inaccessible or corrupted stunnel config file");
                self.state = CertificateState::Unavailable {
                    reason: e.to_string(),
                };
                return Ok(());
            }
        };

        let cert_path = PathBuf::from(fields.cert_path());
        let key_path = fields.key_path().map(PathBuf::from);
        let record = match &key_path {
            None => CertificateRecord::pem(&cert_path),
            Some(key) => CertificateRecord::pair(&cert_path, key),
        };

        self.state = match record {
            Ok(record) => {
                debug!(cert = %cert_path.display(), "loaded server certificate");
                CertificateState::Installed(record)
            }
            Err(e) => {
                warn!(error = %e, "inaccessible or corrupted server certificate");
                CertificateState::Inaccessible {
                    cert_path,
                    key_path,
                    reason: e.to_string(),
                }
            }
        };
        Ok(())
    }

    fn unsaved_changes(&self) -> bool {
        self.staged.is_some()
    }

    /// Install the staged files and repoint the proxy at them.
    ///
    /// Each file is copied beside its destination and renamed over it, so
    /// a failed copy leaves the previously installed file in place. Steps
    /// already completed are not rolled back when a later one fails; the
    /// staged change is kept for a retry.
    fn commit(&mut self) -> Result<CommitOutcome> {
        let Some(staged) = self.staged.clone() else {
            return Ok(CommitOutcome::Unchanged);
        };

        let artifacts = self.artifacts()?;
        let cert_dir = artifacts
            .cert_dir
            .ok_or_else(|| ConfiguratorError::NotFound(self.settings.cert_dir()))?;
        let config_path = artifacts
            .proxy_config_path
            .ok_or_else(|| ConfiguratorError::NotFound(self.settings.proxy_config_path()))?;

        let (cert, key) = self.install(&staged.change, &cert_dir)?;
        debug!(path = %config_path.display(), "rewriting stunnel config without locking");
        proxy_config::write_fields(
            &config_path,
            &cert.to_string_lossy(),
            key.as_deref().map(|k| k.to_string_lossy()).as_deref(),
        )?;

        let reload = match &artifacts.pid_file {
            Some(pid_file) => reload::notify(pid_file),
            None => ReloadStatus::NotRunning,
        };

        self.staged = None;
        self.load()?;
        Ok(CommitOutcome::Committed { reload })
    }
}
