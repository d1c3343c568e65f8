//! NETCONF access control module
//!
//! Edits the NACM container of the startup datastore: the global switch,
//! external groups, the three default actions and the members of the
//! privileged `almighty` group. Other groups and the rule lists are loaded
//! for display only.
//!
//! Each scalar field remembers whether it was read from a node
//! ([`Backing::Bound`]) or defaulted because the node is absent
//! ([`Backing::Unbound`]). Bound fields are always written back on commit;
//! unbound ones only once they differ from their default.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::document::{Element, XmlDocument};
use crate::error::{ConfiguratorError, Result};
use crate::locator::{self, ArtifactSet};
use crate::module::{CommitOutcome, ConfigModule};
use crate::reload::{self, ReloadStatus};
use crate::settings::Settings;
use crate::xpath::{Namespaces, NodePath, QualifiedName};

pub const DATASTORES_NS: &str = "urn:cesnet:tmc:datastores:file";
pub const NACM_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-acm";

/// Group and rule-list granting every operation on every module
pub const PRIVILEGED_GROUP: &str = "almighty";

const STARTUP: &str = "/d:datastores/d:startup";
const NACM: &str = "/d:datastores/d:startup/n:nacm";

fn namespaces() -> Namespaces {
    Namespaces::new()
        .with("d", DATASTORES_NS)
        .with("n", NACM_NS)
}

fn nacm_path(suffix: &str) -> Result<NodePath> {
    NodePath::parse(&format!("{}{}", NACM, suffix), &namespaces())
}

fn nacm_name(local: &str) -> QualifiedName {
    QualifiedName {
        namespace: Some(NACM_NS.to_string()),
        local: local.to_string(),
    }
}

fn privileged_group_path() -> Result<NodePath> {
    nacm_path(&format!("/n:groups/n:group[n:name='{}']", PRIVILEGED_GROUP))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Permit,
    Deny,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Permit => "permit",
            Action::Deny => "deny",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ConfiguratorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_text(s)
            .ok_or_else(|| ConfiguratorError::Rejected(format!("'{}' is not permit or deny", s)))
    }
}

/// Value types of the scalar fields and their persisted literals
pub trait FieldValue: Copy + PartialEq + fmt::Debug {
    fn to_text(self) -> &'static str;
    /// `None` for text that is not a recognised literal
    fn from_text(text: &str) -> Option<Self>;
}

impl FieldValue for bool {
    fn to_text(self) -> &'static str {
        if self { "true" } else { "false" }
    }

    fn from_text(text: &str) -> Option<Self> {
        match text {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }
}

impl FieldValue for Action {
    fn to_text(self) -> &'static str {
        self.as_str()
    }

    fn from_text(text: &str) -> Option<Self> {
        match text {
            "permit" => Some(Action::Permit),
            "deny" => Some(Action::Deny),
            _ => None,
        }
    }
}

/// Where a scalar field's value came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "backing", rename_all = "kebab-case")]
pub enum Backing {
    /// Read from an existing node holding `persisted_text`
    Bound { persisted_text: String },
    /// The node is absent; the value started as the default
    Unbound,
}

/// A staged scalar value and its backing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field<T> {
    value: T,
    default: T,
    backing: Backing,
}

impl<T: FieldValue> Field<T> {
    fn unbound(default: T) -> Self {
        Self {
            value: default,
            default,
            backing: Backing::Unbound,
        }
    }

    /// Text that is not a recognised literal reads as the default
    fn bound(persisted_text: String, default: T) -> Self {
        Self {
            value: T::from_text(&persisted_text).unwrap_or(default),
            default,
            backing: Backing::Bound { persisted_text },
        }
    }

    pub fn value(&self) -> T {
        self.value
    }

    pub fn default_value(&self) -> T {
        self.default
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
    }

    pub fn is_dirty(&self) -> bool {
        match &self.backing {
            Backing::Bound { persisted_text } => {
                T::from_text(persisted_text).unwrap_or(self.default) != self.value
            }
            Backing::Unbound => self.value != self.default,
        }
    }

    fn view(&self, field: ScalarField) -> FieldView {
        FieldView {
            field,
            value: self.value.to_text(),
            bound: matches!(self.backing, Backing::Bound { .. }),
            dirty: self.is_dirty(),
        }
    }
}

/// The five scalar fields, named after their elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScalarField {
    #[serde(rename = "enable-nacm")]
    Enabled,
    #[serde(rename = "enable-external-groups")]
    ExternalGroups,
    #[serde(rename = "read-default")]
    ReadDefault,
    #[serde(rename = "write-default")]
    WriteDefault,
    #[serde(rename = "exec-default")]
    ExecDefault,
}

impl ScalarField {
    pub const ALL: [ScalarField; 5] = [
        ScalarField::Enabled,
        ScalarField::ExternalGroups,
        ScalarField::ReadDefault,
        ScalarField::WriteDefault,
        ScalarField::ExecDefault,
    ];

    pub fn element(self) -> &'static str {
        match self {
            ScalarField::Enabled => "enable-nacm",
            ScalarField::ExternalGroups => "enable-external-groups",
            ScalarField::ReadDefault => "read-default",
            ScalarField::WriteDefault => "write-default",
            ScalarField::ExecDefault => "exec-default",
        }
    }

    fn path(self) -> Result<NodePath> {
        nacm_path(&format!("/n:{}", self.element()))
    }
}

impl fmt::Display for ScalarField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element())
    }
}

impl FromStr for ScalarField {
    type Err = ConfiguratorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.element() == s)
            .ok_or_else(|| ConfiguratorError::Rejected(format!("unknown access control field '{}'", s)))
    }
}

/// Untyped snapshot of one scalar field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldView {
    pub field: ScalarField,
    pub value: &'static str,
    pub bound: bool,
    pub dirty: bool,
}

/// Global NACM switches and defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessControlConfig {
    pub enabled: Field<bool>,
    pub external_groups_allowed: Field<bool>,
    pub read_default: Field<Action>,
    pub write_default: Field<Action>,
    pub exec_default: Field<Action>,
}

impl Default for AccessControlConfig {
    fn default() -> Self {
        Self {
            enabled: Field::unbound(true),
            external_groups_allowed: Field::unbound(true),
            read_default: Field::unbound(Action::Permit),
            write_default: Field::unbound(Action::Deny),
            exec_default: Field::unbound(Action::Permit),
        }
    }
}

impl AccessControlConfig {
    fn load(doc: &XmlDocument) -> Result<Self> {
        let mut config = Self::default();
        config.enabled = load_field(doc, ScalarField::Enabled, config.enabled)?;
        config.external_groups_allowed =
            load_field(doc, ScalarField::ExternalGroups, config.external_groups_allowed)?;
        config.read_default = load_field(doc, ScalarField::ReadDefault, config.read_default)?;
        config.write_default = load_field(doc, ScalarField::WriteDefault, config.write_default)?;
        config.exec_default = load_field(doc, ScalarField::ExecDefault, config.exec_default)?;
        Ok(config)
    }

    pub fn view(&self, field: ScalarField) -> FieldView {
        match field {
            ScalarField::Enabled => self.enabled.view(field),
            ScalarField::ExternalGroups => self.external_groups_allowed.view(field),
            ScalarField::ReadDefault => self.read_default.view(field),
            ScalarField::WriteDefault => self.write_default.view(field),
            ScalarField::ExecDefault => self.exec_default.view(field),
        }
    }

    pub fn views(&self) -> Vec<FieldView> {
        ScalarField::ALL.into_iter().map(|f| self.view(f)).collect()
    }

    /// Stage a field from its textual literal
    pub fn stage(&mut self, field: ScalarField, text: &str) -> Result<()> {
        let invalid = || ConfiguratorError::Rejected(format!("invalid value '{}' for {}", text, field));
        match field {
            ScalarField::Enabled => self.enabled.set(bool::from_text(text).ok_or_else(invalid)?),
            ScalarField::ExternalGroups => self
                .external_groups_allowed
                .set(bool::from_text(text).ok_or_else(invalid)?),
            ScalarField::ReadDefault => self.read_default.set(text.parse()?),
            ScalarField::WriteDefault => self.write_default.set(text.parse()?),
            ScalarField::ExecDefault => self.exec_default.set(text.parse()?),
        }
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.views().iter().any(|view| view.dirty)
    }
}

fn load_field<T: FieldValue>(doc: &XmlDocument, field: ScalarField, unbound: Field<T>) -> Result<Field<T>> {
    Ok(match doc.text(&field.path()?) {
        Some(text) => Field::bound(text, unbound.default),
        None => unbound,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub name: String,
    pub members: Vec<String>,
}

/// What a rule applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "name", rename_all = "kebab-case")]
pub enum RuleTarget {
    Any,
    Operation(String),
    Notification(String),
    Data(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub name: String,
    pub target: RuleTarget,
    pub module_name: Option<String>,
    /// Operation names, or `*` for all of them
    pub access_operations: BTreeSet<String>,
    /// `None` when absent or not a recognised literal
    pub action: Option<Action>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleList {
    pub name: String,
    pub groups: Vec<String>,
    pub rules: Vec<Rule>,
}

fn nacm_children<'a>(element: &'a Element, local: &'a str) -> impl Iterator<Item = &'a Element> {
    element
        .child_elements()
        .filter(move |child| child.namespace.as_deref() == Some(NACM_NS) && child.local_name() == local)
}

fn child_text(element: &Element, local: &str) -> Option<String> {
    nacm_children(element, local).next().map(Element::text)
}

fn child_texts(element: &Element, local: &str) -> Vec<String> {
    nacm_children(element, local).map(Element::text).collect()
}

fn load_groups(doc: &XmlDocument) -> Result<Vec<Group>> {
    Ok(doc
        .find_all(&nacm_path("/n:groups/n:group")?)
        .iter()
        .filter_map(|id| doc.get(id))
        .map(|group| Group {
            name: child_text(group, "name").unwrap_or_default(),
            members: child_texts(group, "user-name"),
        })
        .collect())
}

fn load_rule(rule: &Element) -> Rule {
    let nested = |container: &str, leaf: &str| {
        nacm_children(rule, container)
            .next()
            .and_then(|c| child_text(c, leaf))
    };
    let target = if let Some(rpc) = nested("protocol-operation", "rpc-name") {
        RuleTarget::Operation(rpc)
    } else if let Some(notification) = nested("notification", "notification-name") {
        RuleTarget::Notification(notification)
    } else if let Some(path) = nested("data-node", "path") {
        RuleTarget::Data(path)
    } else {
        RuleTarget::Any
    };

    Rule {
        name: child_text(rule, "name").unwrap_or_default(),
        target,
        module_name: child_text(rule, "module-name"),
        access_operations: child_text(rule, "access-operations")
            .map(|ops| ops.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        action: child_text(rule, "action").and_then(|a| Action::from_text(&a)),
        comment: child_text(rule, "comment"),
    }
}

fn load_rule_lists(doc: &XmlDocument) -> Result<Vec<RuleList>> {
    Ok(doc
        .find_all(&nacm_path("/n:rule-list")?)
        .iter()
        .filter_map(|id| doc.get(id))
        .map(|list| RuleList {
            name: child_text(list, "name").unwrap_or_default(),
            groups: child_texts(list, "group"),
            rules: nacm_children(list, "rule").map(load_rule).collect(),
        })
        .collect())
}

/// NETCONF access control configuration module
#[derive(Debug)]
pub struct AccessControlModule {
    settings: Settings,
    artifacts: Option<ArtifactSet>,
    /// `None` when the datastore is missing or could not be parsed
    document: Option<XmlDocument>,
    config: AccessControlConfig,
    groups: Vec<Group>,
    rule_lists: Vec<RuleList>,
    /// Members of the persisted privileged group; `None` when it is absent
    persisted_members: Option<Vec<String>>,
    staged_members: Vec<String>,
}

impl AccessControlModule {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            artifacts: None,
            document: None,
            config: AccessControlConfig::default(),
            groups: Vec::new(),
            rule_lists: Vec::new(),
            persisted_members: None,
            staged_members: Vec::new(),
        }
    }

    pub fn config(&self) -> &AccessControlConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AccessControlConfig {
        &mut self.config
    }

    /// Every group of the datastore as loaded
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn rule_lists(&self) -> &[RuleList] {
        &self.rule_lists
    }

    /// Whether a datastore was loaded and can be committed to
    pub fn is_available(&self) -> bool {
        self.document.is_some()
    }

    /// Staged members of the privileged group, sorted
    pub fn privileged_members(&self) -> &[String] {
        &self.staged_members
    }

    /// Persisted members of the privileged group, `None` when the group
    /// does not exist
    pub fn persisted_privileged_members(&self) -> Option<&[String]> {
        self.persisted_members.as_deref()
    }

    /// Stage a new privileged member
    pub fn add_privileged_member(&mut self, user: &str) -> Result<()> {
        let user = user.trim();
        if user.is_empty() {
            return Err(ConfiguratorError::Rejected("user name must not be empty".to_string()));
        }
        if self.staged_members.iter().any(|m| m == user) {
            return Err(ConfiguratorError::Rejected(format!(
                "user {} already in the group",
                user
            )));
        }
        self.staged_members.push(user.to_string());
        self.staged_members.sort();
        Ok(())
    }

    /// Rename a staged privileged member; an empty new name removes it
    pub fn rename_privileged_member(&mut self, user: &str, new_name: &str) -> Result<()> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return self.remove_privileged_member(user);
        }
        if new_name != user && self.staged_members.iter().any(|m| m == new_name) {
            return Err(ConfiguratorError::Rejected(format!(
                "user {} already in the group",
                new_name
            )));
        }
        let member = self
            .staged_members
            .iter_mut()
            .find(|m| *m == user)
            .ok_or_else(|| not_a_member(user))?;
        *member = new_name.to_string();
        self.staged_members.sort();
        Ok(())
    }

    pub fn remove_privileged_member(&mut self, user: &str) -> Result<()> {
        let index = self
            .staged_members
            .iter()
            .position(|m| m == user)
            .ok_or_else(|| not_a_member(user))?;
        self.staged_members.remove(index);
        Ok(())
    }

    fn members_dirty(&self) -> bool {
        match &self.persisted_members {
            None => !self.staged_members.is_empty(),
            Some(persisted) => {
                let persisted: BTreeSet<&String> = persisted.iter().collect();
                let staged: BTreeSet<&String> = self.staged_members.iter().collect();
                persisted != staged
            }
        }
    }

    fn reset(&mut self) {
        self.document = None;
        self.config = AccessControlConfig::default();
        self.groups.clear();
        self.rule_lists.clear();
        self.persisted_members = None;
        self.staged_members.clear();
    }

    fn artifacts(&mut self) -> Result<ArtifactSet> {
        match &self.artifacts {
            Some(artifacts) => Ok(artifacts.clone()),
            None => Ok(self.locate()?.clone()),
        }
    }

    /// Apply staged state to `doc`
    fn apply(&self, doc: &mut XmlDocument, path: &std::path::Path) -> Result<()> {
        let nacm = match doc.find(&nacm_path("")?) {
            Some(id) => id,
            None => {
                let startup_path = NodePath::parse(STARTUP, &namespaces())?;
                let startup = doc.find(&startup_path).ok_or_else(|| ConfiguratorError::InvalidStructure {
                    path: path.to_path_buf(),
                    reason: "missing startup datastore".to_string(),
                })?;
                doc.append_child(&startup, &nacm_name("nacm"), None)?
            }
        };

        let group_path = privileged_group_path()?;
        match doc.find(&group_path) {
            Some(group) => {
                let users = doc
                    .find_all(&nacm_path(&format!(
                        "/n:groups/n:group[n:name='{}']/n:user-name",
                        PRIVILEGED_GROUP
                    ))?);
                // Later siblings first keeps earlier handles valid
                for id in users.iter().rev() {
                    doc.remove(id);
                }
                for user in &self.staged_members {
                    doc.append_child(&group, &nacm_name("user-name"), Some(user))?;
                }
            }
            None if !self.staged_members.is_empty() => {
                let rule_list_path = nacm_path(&format!("/n:rule-list[n:name='{}']", PRIVILEGED_GROUP))?;
                if doc.find(&rule_list_path).is_none() {
                    let list = doc.insert_child(&nacm, 0, &nacm_name("rule-list"), None)?;
                    doc.append_child(&list, &nacm_name("name"), Some(PRIVILEGED_GROUP))?;
                    doc.append_child(&list, &nacm_name("group"), Some(PRIVILEGED_GROUP))?;
                    let rule = doc.append_child(&list, &nacm_name("rule"), None)?;
                    doc.append_child(&rule, &nacm_name("name"), Some(PRIVILEGED_GROUP))?;
                    doc.append_child(&rule, &nacm_name("module-name"), Some("*"))?;
                    doc.append_child(&rule, &nacm_name("access-operations"), Some("*"))?;
                    doc.append_child(&rule, &nacm_name("action"), Some(Action::Permit.as_str()))?;
                }
                let group = doc.ensure(&group_path)?;
                for user in &self.staged_members {
                    doc.append_child(&group, &nacm_name("user-name"), Some(user))?;
                }
            }
            None => {}
        }

        for view in self.config.views() {
            if view.bound || view.dirty {
                doc.set_field(None, &view.field.path()?, view.value)?;
            }
        }
        Ok(())
    }
}

fn not_a_member(user: &str) -> ConfiguratorError {
    ConfiguratorError::Rejected(format!("user {} is not in the group", user))
}

impl ConfigModule for AccessControlModule {
    fn name(&self) -> &'static str {
        "Access Control"
    }

    fn locate(&mut self) -> Result<&ArtifactSet> {
        let artifacts = locator::locate_access_control(&self.settings)?;
        Ok(self.artifacts.insert(artifacts))
    }

    fn load(&mut self) -> Result<()> {
        let artifacts = self.artifacts()?;
        self.reset();

        let Some(path) = artifacts.datastore_path else {
            return Ok(());
        };
        let doc = match XmlDocument::load(&path) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "access control datastore unavailable, showing defaults");
                return Ok(());
            }
        };

        self.config = AccessControlConfig::load(&doc)?;
        self.groups = load_groups(&doc)?;
        self.rule_lists = load_rule_lists(&doc)?;
        self.persisted_members = doc.find(&privileged_group_path()?).map(|id| {
            doc.get(&id)
                .map(|group| child_texts(group, "user-name"))
                .unwrap_or_default()
        });
        self.staged_members = self.persisted_members.clone().unwrap_or_default();
        self.staged_members.sort();
        self.document = Some(doc);

        debug!(
            path = %path.display(),
            groups = self.groups.len(),
            rule_lists = self.rule_lists.len(),
            "loaded access control datastore"
        );
        Ok(())
    }

    fn unsaved_changes(&self) -> bool {
        self.members_dirty() || self.config.is_dirty()
    }

    /// Write staged state into the datastore.
    ///
    /// Edits are applied to a copy of the loaded document, which replaces
    /// it only once saved, so a failed save leaves both the file and the
    /// staged state untouched.
    fn commit(&mut self) -> Result<CommitOutcome> {
        if !self.unsaved_changes() {
            return Ok(CommitOutcome::Unchanged);
        }

        let artifacts = self.artifacts()?;
        let path = artifacts
            .datastore_path
            .clone()
            .ok_or_else(|| ConfiguratorError::NotFound(self.settings.datastore_path()))?;
        let mut doc = self
            .document
            .clone()
            .ok_or_else(|| ConfiguratorError::corrupt(&path, "datastore was not loaded, refusing to overwrite it"))?;

        self.apply(&mut doc, &path)?;
        debug!(path = %path.display(), "saving datastore without locking");
        doc.save(&path)?;
        info!(path = %path.display(), "access control configuration saved");

        let reload = match &artifacts.pid_file {
            Some(pid_file) => reload::notify(pid_file),
            None => ReloadStatus::NotRunning,
        };

        self.load()?;
        Ok(CommitOutcome::Committed { reload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::{TempDir, tempdir};

    const WITH_NACM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<datastores xmlns="urn:cesnet:tmc:datastores:file">
  <running lock=""/>
  <startup lock="">
    <nacm xmlns="urn:ietf:params:xml:ns:yang:ietf-netconf-acm">
      <read-default>deny</read-default>
      <enable-external-groups>maybe</enable-external-groups>
      <groups>
        <group>
          <name>almighty</name>
          <user-name>root</user-name>
        </group>
        <group>
          <name>guests</name>
        </group>
      </groups>
      <rule-list>
        <name>guests</name>
        <group>guests</group>
        <rule>
          <name>no-kill</name>
          <module-name>ietf-netconf</module-name>
          <protocol-operation>
            <rpc-name>kill-session</rpc-name>
          </protocol-operation>
          <access-operations>exec</access-operations>
          <action>deny</action>
        </rule>
      </rule-list>
    </nacm>
  </startup>
</datastores>
"#;

    fn setup(datastore: Option<&str>) -> (TempDir, Settings) {
        let dir = tempdir().unwrap();
        let settings = Settings {
            config_dir: dir.path().join("netopeer"),
            working_dir: dir.path().join("libnetconf"),
            server_pid_file: None,
        };
        if let Some(content) = datastore {
            fs::create_dir_all(&settings.working_dir).unwrap();
            fs::write(settings.datastore_path(), content).unwrap();
        }
        (dir, settings)
    }

    fn module(settings: &Settings) -> AccessControlModule {
        let mut module = AccessControlModule::new(settings.clone());
        module.activate().unwrap();
        module
    }

    fn reread(path: PathBuf) -> XmlDocument {
        XmlDocument::load(&path).unwrap()
    }

    #[test]
    fn test_defaults_on_seeded_datastore() {
        let (_dir, settings) = setup(None);
        let module = module(&settings);

        let config = module.config();
        assert!(config.enabled.value());
        assert!(config.external_groups_allowed.value());
        assert_eq!(config.read_default.value(), Action::Permit);
        assert_eq!(config.write_default.value(), Action::Deny);
        assert_eq!(config.exec_default.value(), Action::Permit);
        assert_eq!(config.enabled.backing(), &Backing::Unbound);
        assert_eq!(module.persisted_privileged_members(), None);
        assert!(!module.unsaved_changes());
    }

    #[test]
    fn test_load_inventory() {
        let (_dir, settings) = setup(Some(WITH_NACM));
        let module = module(&settings);

        assert_eq!(module.groups().len(), 2);
        assert_eq!(module.groups()[1].name, "guests");
        assert!(module.groups()[1].members.is_empty());

        let list = &module.rule_lists()[0];
        assert_eq!(list.groups, vec!["guests"]);
        assert_eq!(list.rules[0].target, RuleTarget::Operation("kill-session".to_string()));
        assert_eq!(list.rules[0].action, Some(Action::Deny));
        assert!(list.rules[0].access_operations.contains("exec"));
        assert_eq!(module.privileged_members(), ["root"]);
    }

    #[test]
    fn test_unrecognised_text_reads_as_default() {
        let (_dir, settings) = setup(Some(WITH_NACM));
        let mut module = module(&settings);

        let field = &module.config().external_groups_allowed;
        assert!(field.value());
        assert!(!field.is_dirty());
        assert!(!module.unsaved_changes());

        module.config_mut().external_groups_allowed.set(false);
        assert!(module.unsaved_changes());
    }

    #[test]
    fn test_unbound_field_diff() {
        let (_dir, settings) = setup(Some(WITH_NACM));
        let mut module = module(&settings);

        module.config_mut().stage(ScalarField::ExecDefault, "deny").unwrap();
        assert!(module.unsaved_changes());
        assert!(module.unsaved_changes());

        module.config_mut().stage(ScalarField::ExecDefault, "permit").unwrap();
        assert!(!module.unsaved_changes());
    }

    #[test]
    fn test_bound_field_commit() {
        let (_dir, settings) = setup(Some(WITH_NACM));
        let mut module = module(&settings);

        module.config_mut().read_default.set(Action::Permit);
        assert!(module.unsaved_changes());
        module.commit().unwrap();

        let doc = reread(settings.datastore_path());
        let read = ScalarField::ReadDefault.path().unwrap();
        assert_eq!(doc.find_all(&read).len(), 1);
        assert_eq!(doc.text(&read).as_deref(), Some("permit"));
        assert!(!module.unsaved_changes());
    }

    #[test]
    fn test_first_privileged_member_creates_skeleton() {
        let (_dir, settings) = setup(None);
        let mut module = module(&settings);

        module.add_privileged_member("alice").unwrap();
        assert!(module.unsaved_changes());
        let outcome = module.commit().unwrap();

        assert_eq!(
            outcome,
            CommitOutcome::Committed {
                reload: ReloadStatus::NotRunning
            }
        );
        let doc = reread(settings.datastore_path());
        let nacm = doc.get(&doc.find(&nacm_path("").unwrap()).unwrap()).unwrap();
        let first = nacm.child_elements().next().unwrap();
        assert_eq!(first.local_name(), "rule-list");
        assert_eq!(child_text(first, "name").as_deref(), Some(PRIVILEGED_GROUP));
        let rule = nacm_children(first, "rule").next().unwrap();
        assert_eq!(child_text(rule, "module-name").as_deref(), Some("*"));
        assert_eq!(child_text(rule, "access-operations").as_deref(), Some("*"));
        assert_eq!(child_text(rule, "action").as_deref(), Some("permit"));

        assert_eq!(module.persisted_privileged_members(), Some(&["alice".to_string()][..]));
        assert!(!module.unsaved_changes());
    }

    #[test]
    fn test_membership_replaced() {
        let (_dir, settings) = setup(Some(WITH_NACM));
        let mut module = module(&settings);

        module.add_privileged_member("bob").unwrap();
        module.remove_privileged_member("root").unwrap();
        module.add_privileged_member("alice").unwrap();
        assert_eq!(module.privileged_members(), ["alice", "bob"]);
        module.commit().unwrap();

        let doc = reread(settings.datastore_path());
        let users = doc.texts(
            &nacm_path("/n:groups/n:group[n:name='almighty']/n:user-name").unwrap(),
        );
        assert_eq!(users, vec!["alice", "bob"]);
        // The other group is untouched and no second rule list appears
        assert_eq!(doc.find_all(&nacm_path("/n:rule-list").unwrap()).len(), 1);
        assert!(!module.unsaved_changes());
    }

    #[test]
    fn test_membership_order_is_not_a_change() {
        let datastore = WITH_NACM.replace(
            "<user-name>root</user-name>",
            "<user-name>root</user-name><user-name>admin</user-name>",
        );
        let (_dir, settings) = setup(Some(&datastore));
        let module = module(&settings);

        assert_eq!(module.privileged_members(), ["admin", "root"]);
        assert!(!module.unsaved_changes());
    }

    #[test]
    fn test_rejected_member_edits() {
        let (_dir, settings) = setup(Some(WITH_NACM));
        let mut module = module(&settings);

        assert!(module.add_privileged_member("  ").is_err());
        assert!(module.add_privileged_member("root").is_err());
        assert!(module.remove_privileged_member("nobody").is_err());
        module.add_privileged_member("carol").unwrap();
        assert!(module.rename_privileged_member("carol", "root").is_err());

        module.rename_privileged_member("carol", "aaron").unwrap();
        assert_eq!(module.privileged_members(), ["aaron", "root"]);
        module.rename_privileged_member("aaron", "").unwrap();
        assert_eq!(module.privileged_members(), ["root"]);
    }

    #[test]
    fn test_missing_startup_is_invalid_structure() {
        let (_dir, settings) = setup(Some(
            r#"<datastores xmlns="urn:cesnet:tmc:datastores:file"><running/></datastores>"#,
        ));
        let mut module = module(&settings);
        module.config_mut().enabled.set(false);

        let err = module.commit().unwrap_err();

        assert!(matches!(err, ConfiguratorError::InvalidStructure { .. }));
        assert!(module.unsaved_changes());
    }

    #[test]
    fn test_corrupt_datastore_is_not_overwritten() {
        let (_dir, settings) = setup(Some("<datastores><startup>"));
        let mut module = module(&settings);
        assert!(!module.is_available());

        module.config_mut().enabled.set(false);
        assert!(module.commit().is_err());
        assert_eq!(
            fs::read_to_string(settings.datastore_path()).unwrap(),
            "<datastores><startup>"
        );
    }

    #[test]
    fn test_non_utf8_datastore_degrades() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            config_dir: dir.path().join("netopeer"),
            working_dir: dir.path().join("libnetconf"),
            server_pid_file: None,
        };
        fs::create_dir_all(&settings.working_dir).unwrap();
        fs::write(settings.datastore_path(), b"<datastores>\xff\xfe</datastores>").unwrap();

        let mut module = AccessControlModule::new(settings);
        module.activate().unwrap();

        assert!(!module.is_available());
        assert!(module.config().enabled.value());
        module.config_mut().enabled.set(false);
        assert!(matches!(module.commit(), Err(ConfiguratorError::Corrupt { .. })));
    }

    #[test]
    fn test_failed_save_keeps_staged_state() {
        let (_dir, settings) = setup(Some(WITH_NACM));
        let path = settings.datastore_path();
        let mut module = module(&settings);

        // A directory in place of the file makes the final rename fail
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupied"), "x").unwrap();
        module.add_privileged_member("alice").unwrap();
        module.config_mut().write_default.set(Action::Permit);

        let err = module.commit().unwrap_err();

        assert!(matches!(err, ConfiguratorError::WriteError { .. }));
        assert!(module.unsaved_changes());
        assert_eq!(module.privileged_members(), ["alice", "root"]);

        fs::remove_dir_all(&path).unwrap();
        fs::write(&path, WITH_NACM).unwrap();
        assert!(matches!(module.commit().unwrap(), CommitOutcome::Committed { .. }));
        assert!(!module.unsaved_changes());

        let doc = reread(path);
        let users = doc.texts(
            &nacm_path("/n:groups/n:group[n:name='almighty']/n:user-name").unwrap(),
        );
        assert_eq!(users, vec!["alice", "root"]);
        assert_eq!(doc.find_all(&nacm_path("/n:groups/n:group").unwrap()).len(), 2);
    }

    #[test]
    fn test_commit_without_changes_touches_nothing() {
        let (_dir, settings) = setup(Some(WITH_NACM));
        let mut module = module(&settings);

        assert_eq!(module.commit().unwrap(), CommitOutcome::Unchanged);
        assert_eq!(fs::read_to_string(settings.datastore_path()).unwrap(), WITH_NACM);
    }

    #[test]
    fn test_field_names() {
        assert_eq!("exec-default".parse::<ScalarField>().unwrap(), ScalarField::ExecDefault);
        assert!("exec".parse::<ScalarField>().is_err());
        let mut config = AccessControlConfig::default();
        assert!(config.stage(ScalarField::Enabled, "yes").is_err());
        assert!(config.stage(ScalarField::ReadDefault, "allow").is_err());
    }
}
