//! nc-configurator - configuration editor for a NETCONF server installation
//!
//! This library edits two independent pieces of a NETCONF server's
//! configuration: the TLS certificate of the stunnel proxy in front of the
//! server, and the NETCONF access control (NACM) settings stored in the
//! server's startup datastore. Both follow the same lifecycle: locate the
//! files, load them, stage edits in memory, compare with what is on disk,
//! commit and ask the running daemon to reload.
//!
//! # Example
//!
//! ```no_run
//! use nc_configurator::{AccessControlModule, ConfigModule, Settings};
//!
//! let settings = Settings::from_file("/etc/nc-configurator.json").unwrap();
//! let mut nacm = AccessControlModule::new(settings);
//! nacm.activate().unwrap();
//!
//! nacm.add_privileged_member("admin").unwrap();
//! if nacm.unsaved_changes() {
//!     let outcome = nacm.commit().unwrap();
//!     println!("{:?}", outcome);
//! }
//! ```

pub mod access_control;
pub mod certificate;
pub mod document;
mod error;
mod fsutil;
pub mod locator;
mod module;
pub mod proxy_config;
pub mod reload;
mod settings;
pub mod x509;
pub mod xpath;

pub use access_control::{AccessControlModule, Action, ScalarField};
pub use certificate::{CertificateModule, CertificateState, StagedCertificate};
pub use error::{ConfiguratorError, Result};
pub use locator::ArtifactSet;
pub use module::{CommitOutcome, ConfigModule};
pub use reload::ReloadStatus;
pub use settings::Settings;
