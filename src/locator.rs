//! Artifact discovery for the configuration modules
//!
//! Locating never modifies existing files. The only side effects are
//! creating a missing subdirectory and seeding a missing or empty
//! access-control datastore with the bare datastores skeleton.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ConfiguratorError, Result};
use crate::settings::Settings;

/// Skeleton written into a missing or empty access-control datastore
pub const EMPTY_DATASTORE: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<datastores xmlns=\"urn:cesnet:tmc:datastores:file\">\n  \
<running lock=\"\"/>\n  \
<startup lock=\"\"/>\n  \
<candidate modified=\"false\" lock=\"\"/>\n\
</datastores>\n";

/// Paths one module depends on, resolved once per activation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    /// Base configuration directory
    pub base_dir: Option<PathBuf>,
    /// Directory holding installed certificate files
    pub cert_dir: Option<PathBuf>,
    /// Line-oriented proxy configuration file
    pub proxy_config_path: Option<PathBuf>,
    /// Persisted tree datastore
    pub datastore_path: Option<PathBuf>,
    /// PID file of the daemon to notify after a commit
    pub pid_file: Option<PathBuf>,
}

/// Locate the artifacts of the certificate module.
///
/// Fails with `NotFound` when the configuration directory is absent. A
/// missing certificate directory is created; a missing proxy config only
/// degrades the module.
pub fn locate_certificate(settings: &Settings) -> Result<ArtifactSet> {
    let base_dir = require_dir(&settings.config_dir)?;

    let cert_dir = settings.cert_dir();
    // Holds the private key
    let cert_dir = ensure_dir(&cert_dir, true).then_some(cert_dir);

    let proxy_config = settings.proxy_config_path();
    let proxy_config_path = if proxy_config.is_file() {
        Some(proxy_config)
    } else {
        warn!(path = %proxy_config.display(), "stunnel config file not found");
        None
    };

    Ok(ArtifactSet {
        base_dir: Some(base_dir),
        cert_dir,
        proxy_config_path,
        datastore_path: None,
        pid_file: Some(settings.proxy_pid_file()),
    })
}

/// Locate the artifacts of the access-control module.
///
/// The working directory is created when missing (failure is `NotFound`,
/// since no datastore can exist without it). The datastore file is seeded
/// only when it does not exist or is empty.
pub fn locate_access_control(settings: &Settings) -> Result<ArtifactSet> {
    let base_dir = settings.working_dir.clone();
    if !ensure_dir(&base_dir, false) {
        return Err(ConfiguratorError::NotFound(base_dir));
    }

    let datastore = settings.datastore_path();
    let datastore_path = match seed_datastore(&datastore) {
        Ok(()) => Some(datastore),
        Err(e) => {
            warn!(path = %datastore.display(), error = %e, "access-control datastore unavailable");
            None
        }
    };

    Ok(ArtifactSet {
        base_dir: Some(base_dir),
        cert_dir: None,
        proxy_config_path: None,
        datastore_path,
        pid_file: settings.server_pid_file.clone(),
    })
}

fn require_dir(path: &Path) -> Result<PathBuf> {
    if path.is_dir() {
        Ok(path.to_path_buf())
    } else {
        Err(ConfiguratorError::NotFound(path.to_path_buf()))
    }
}

/// Returns whether the directory exists afterwards. A `private` directory
/// is created accessible to its owner only.
fn ensure_dir(path: &Path, private: bool) -> bool {
    if path.is_dir() {
        return true;
    }
    warn!(path = %path.display(), "directory does not exist, creating it");
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    if private {
        owner_only(&mut builder);
    }
    match builder.create(path) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "directory could not be created");
            false
        }
    }
}

#[cfg(unix)]
fn owner_only(builder: &mut fs::DirBuilder) {
    use std::os::unix::fs::DirBuilderExt;
    builder.mode(0o700);
}

#[cfg(not(unix))]
fn owner_only(_builder: &mut fs::DirBuilder) {}

fn seed_datastore(path: &Path) -> std::io::Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => return Ok(()),
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    debug!(path = %path.display(), "seeding empty access-control datastore");
    fs::write(path, EMPTY_DATASTORE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn settings_in(root: &Path) -> Settings {
        Settings {
            config_dir: root.join("etc"),
            working_dir: root.join("lib"),
            server_pid_file: None,
        }
    }

    #[test]
    fn test_certificate_missing_base_dir() {
        let dir = tempdir().unwrap();
        let settings = settings_in(dir.path());

        let err = locate_certificate(&settings).unwrap_err();
        assert!(matches!(err, ConfiguratorError::NotFound(_)));
    }

    #[test]
    fn test_certificate_creates_cert_dir() {
        let dir = tempdir().unwrap();
        let settings = settings_in(dir.path());
        fs::create_dir(&settings.config_dir).unwrap();
        fs::write(settings.proxy_config_path(), "\ncert = /x.pem\n").unwrap();

        let artifacts = locate_certificate(&settings).unwrap();

        assert!(settings.cert_dir().is_dir());
        assert_eq!(artifacts.cert_dir, Some(settings.cert_dir()));
        assert_eq!(artifacts.proxy_config_path, Some(settings.proxy_config_path()));
        assert_eq!(locate_certificate(&settings).unwrap(), artifacts);
    }

    #[cfg(unix)]
    #[test]
    fn test_cert_dir_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let settings = settings_in(dir.path());
        fs::create_dir(&settings.config_dir).unwrap();

        locate_certificate(&settings).unwrap();

        let mode = fs::metadata(settings.cert_dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
        assert_eq!(mode & 0o700, 0o700);
    }

    #[test]
    fn test_certificate_missing_proxy_config_degrades() {
        let dir = tempdir().unwrap();
        let settings = settings_in(dir.path());
        fs::create_dir(&settings.config_dir).unwrap();

        let artifacts = locate_certificate(&settings).unwrap();
        assert_eq!(artifacts.proxy_config_path, None);
    }

    #[test]
    fn test_access_control_seeds_empty_datastore() {
        let dir = tempdir().unwrap();
        let settings = settings_in(dir.path());

        let artifacts = locate_access_control(&settings).unwrap();

        let path = artifacts.datastore_path.unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), EMPTY_DATASTORE);
    }

    #[test]
    fn test_access_control_keeps_existing_datastore() {
        let dir = tempdir().unwrap();
        let settings = settings_in(dir.path());
        fs::create_dir(&settings.working_dir).unwrap();
        fs::write(settings.datastore_path(), "<datastores/>").unwrap();

        locate_access_control(&settings).unwrap();

        assert_eq!(
            fs::read_to_string(settings.datastore_path()).unwrap(),
            "<datastores/>"
        );
    }
}
