//! Declarative command trees loaded from YAML.
//!
//! A mapping names commands and settings types registered in a
//! [`CommandCatalog`] and arranges them into a tree:
//!
//! ```yaml
//! name: filesize
//! commands:
//!   - name: scan
//!     command: scan
//!     default: true
//!   - name: report
//!     settings: report
//!     subcommands:
//!       - name: top
//!         command: top
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::configuration::{
    Command, CommandContext, ConfiguredCommand, Configuration, Configurator, ConfiguratorScope, DEFAULT_COMMAND_NAME,
};
use crate::error::{Error, Result};
use crate::settings::{CommandSettings, EmptySettings, SettingsType};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppMapping {
    /// Application name shown in help.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub examples: Vec<Vec<String>>,
    pub commands: Vec<CommandNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    /// Catalog key of the command implementation.
    pub command: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub examples: Vec<Vec<String>>,
    /// Run this command when its parent is invoked without a sub-command.
    #[serde(default)]
    pub default: bool,
    /// Free-form value handed to the command through its context.
    #[serde(default)]
    pub data: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchSpec {
    pub name: String,
    /// Catalog key of the branch settings type; parameterless when absent.
    #[serde(default)]
    pub settings: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub examples: Vec<Vec<String>>,
    #[serde(default)]
    pub data: Option<serde_yaml::Value>,
    pub subcommands: Vec<CommandNode>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CommandNode {
    Command(CommandSpec),
    Branch(BranchSpec),
}

impl<'de> serde::Deserialize<'de> for CommandNode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Inspect the keys before committing to a shape
        let value = serde_yaml::Value::deserialize(deserializer)?;

        let has_subcommands = matches!(&value, serde_yaml::Value::Mapping(map)
            if map.iter().any(|(k, _)| k.as_str() == Some("subcommands")));

        if has_subcommands {
            let branch: BranchSpec = serde_yaml::from_value(value).map_err(serde::de::Error::custom)?;
            return Ok(CommandNode::Branch(branch));
        }

        let command: CommandSpec = serde_yaml::from_value(value).map_err(serde::de::Error::custom)?;
        Ok(CommandNode::Command(command))
    }
}

impl CommandNode {
    pub fn name(&self) -> &str {
        match self {
            CommandNode::Command(c) => &c.name,
            CommandNode::Branch(b) => &b.name,
        }
    }
}

pub fn parse_mapping(yaml: &str) -> anyhow::Result<AppMapping> {
    let mapping: AppMapping = serde_yaml::from_str(yaml).context("Failed to parse command mapping YAML")?;
    Ok(mapping)
}

// =====================
// Catalog
// =====================

/// Commands and settings types a mapping may refer to, by key.
#[derive(Default)]
pub struct CommandCatalog {
    commands: HashMap<String, ConfiguredCommand>,
    settings: HashMap<String, Arc<SettingsType>>,
}

impl CommandCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_command<C: Command>(&mut self, key: &str, command: C) -> &mut Self {
        self.commands
            .insert(key.to_string(), ConfiguredCommand::from_command(key, command, false));
        self
    }

    pub fn register_delegate<S, F>(&mut self, key: &str, func: F) -> &mut Self
    where
        S: CommandSettings,
        F: Fn(&CommandContext, &S) -> anyhow::Result<i32> + Send + Sync + 'static,
    {
        self.commands
            .insert(key.to_string(), ConfiguredCommand::from_delegate(key, func));
        self
    }

    pub fn register_settings<S: CommandSettings>(&mut self, key: &str) -> &mut Self {
        self.settings.insert(key.to_string(), S::describe());
        self
    }

    pub fn has_command(&self, key: &str) -> bool {
        self.commands.contains_key(key)
    }

    pub fn has_settings(&self, key: &str) -> bool {
        self.settings.contains_key(key)
    }
}

// =====================
// Applying a mapping
// =====================

/// Adds the mapped commands to `configurator`.
pub fn apply_mapping(mapping: &AppMapping, catalog: &CommandCatalog, configurator: &mut Configurator) -> anyhow::Result<()> {
    if let Some(name) = &mapping.name {
        configurator.set_application_name(name.clone());
    }
    if let Some(version) = &mapping.version {
        configurator.set_application_version(version.clone());
    }
    for example in &mapping.examples {
        configurator.add_example(example.iter().cloned());
    }

    for node in &mapping.commands {
        let command = configure_node(node, catalog).with_context(|| format!("Invalid command '{}'", node.name()))?;
        if command.is_default_command() {
            configurator.set_default_configured(command);
        } else {
            configurator.add_configured(command);
        }
    }
    Ok(())
}

/// Parses `yaml` and returns the configuration it describes.
pub fn load_mapping(yaml: &str, catalog: &CommandCatalog) -> Result<Configuration> {
    let mapping = parse_mapping(yaml).map_err(Error::Mapping)?;
    let mut configurator = Configurator::new();
    apply_mapping(&mapping, catalog, &mut configurator).map_err(Error::Mapping)?;
    Ok(configurator.into_configuration())
}

fn configure_node(node: &CommandNode, catalog: &CommandCatalog) -> anyhow::Result<ConfiguredCommand> {
    match node {
        CommandNode::Command(spec) => {
            let mut command = catalog
                .commands
                .get(&spec.command)
                .cloned()
                .ok_or_else(|| anyhow!("Command '{}' is not registered", spec.command))?;
            command.name = if spec.default {
                DEFAULT_COMMAND_NAME.to_string()
            } else {
                spec.name.clone()
            };
            command.is_default_command = spec.default;
            command.is_hidden = spec.hidden || spec.default;
            command.description = spec.description.clone();
            command.examples = spec.examples.clone();
            for alias in &spec.aliases {
                command.add_alias(alias.clone());
            }
            if let Some(data) = &spec.data {
                command.data = Some(Arc::new(data.clone()));
            }
            debug!("Mapped command '{}' to '{}'", spec.name, spec.command);
            Ok(command)
        }
        CommandNode::Branch(spec) => {
            let settings = match &spec.settings {
                Some(key) => catalog
                    .settings
                    .get(key)
                    .cloned()
                    .ok_or_else(|| anyhow!("Settings '{}' are not registered", key))?,
                None => EmptySettings::describe(),
            };
            let mut branch = ConfiguredCommand::from_branch(spec.name.clone(), settings);
            branch.description = spec.description.clone();
            branch.is_hidden = spec.hidden;
            branch.examples = spec.examples.clone();
            for alias in &spec.aliases {
                branch.add_alias(alias.clone());
            }
            if let Some(data) = &spec.data {
                branch.data = Some(Arc::new(data.clone()));
            }
            for child in &spec.subcommands {
                let configured = configure_node(child, catalog)
                    .with_context(|| format!("Invalid command '{} {}'", spec.name, child.name()))?;
                branch.children.push(configured);
            }
            Ok(branch)
        }
    }
}

/// Reports every command or settings key the mapping uses that the catalog
/// does not provide.
pub fn validate_handlers(mapping: &AppMapping, catalog: &CommandCatalog) -> anyhow::Result<()> {
    fn walk(nodes: &[CommandNode], catalog: &CommandCatalog, acc: &mut Vec<String>) {
        for node in nodes {
            match node {
                CommandNode::Command(c) => {
                    if !catalog.has_command(&c.command) {
                        acc.push(format!("command '{}'", c.command));
                    }
                }
                CommandNode::Branch(b) => {
                    if let Some(key) = &b.settings {
                        if !catalog.has_settings(key) {
                            acc.push(format!("settings '{}'", key));
                        }
                    }
                    walk(&b.subcommands, catalog, acc);
                }
            }
        }
    }

    let mut missing: Vec<String> = Vec::new();
    walk(&mapping.commands, catalog, &mut missing);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("Missing catalog entries: {}", missing.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model;
    use crate::parameter::{ParameterDecl, ValidationResult};
    use crate::types::ParamType;

    #[derive(Debug, Default)]
    struct ScanSettings;

    impl CommandSettings for ScanSettings {
        fn describe() -> Arc<SettingsType> {
            SettingsType::builder::<ScanSettings>("ScanSettings")
                .parameter(ParameterDecl::argument(0, "[PATH]", "path", ParamType::of::<String>()))
                .default_factory()
                .build()
        }
    }

    struct Scan;

    impl Command for Scan {
        type Settings = ScanSettings;

        fn validate(&self, _context: &CommandContext, _settings: &ScanSettings) -> ValidationResult {
            ValidationResult::success()
        }

        fn execute(&self, _context: &CommandContext, _settings: &ScanSettings) -> anyhow::Result<i32> {
            Ok(0)
        }
    }

    fn catalog() -> CommandCatalog {
        let mut catalog = CommandCatalog::new();
        catalog
            .register_command("scan", Scan)
            .register_delegate::<EmptySettings, _>("version", |_, _| Ok(0))
            .register_settings::<ScanSettings>("scan");
        catalog
    }

    // ==================== parsing ====================

    #[test]
    fn test_parse_mapping_branch_and_command() {
        let yaml = r#"
name: filesize
commands:
  - name: scan
    command: scan
    aliases: [s]
  - name: report
    settings: scan
    subcommands:
      - name: top
        command: scan
"#;
        let mapping = parse_mapping(yaml).unwrap();
        assert_eq!(mapping.name.as_deref(), Some("filesize"));
        assert!(matches!(mapping.commands[0], CommandNode::Command(_)));
        let CommandNode::Branch(report) = &mapping.commands[1] else {
            panic!("Expected branch");
        };
        assert_eq!(report.subcommands.len(), 1);
    }

    #[test]
    fn test_parse_mapping_invalid_yaml() {
        let err = parse_mapping("commands: [").unwrap_err();
        assert!(err.to_string().contains("Failed to parse command mapping YAML"));
    }

    #[test]
    fn test_command_without_command_key_is_error() {
        let yaml = r#"
commands:
  - name: scan
"#;
        assert!(parse_mapping(yaml).is_err());
    }

    // ==================== applying ====================

    #[test]
    fn test_load_mapping_builds_model() {
        let yaml = r#"
name: filesize
version: "1.2.3"
examples:
  - [scan, src]
commands:
  - name: scan
    command: scan
    aliases: [s]
    description: Scan a directory
  - name: report
    settings: scan
    subcommands:
      - name: top
        command: scan
        hidden: true
      - name: summary
        command: scan
        default: true
"#;
        let configuration = load_mapping(yaml, &catalog()).unwrap();
        assert_eq!(configuration.settings().application_version.as_deref(), Some("1.2.3"));
        let model = model::build(&configuration).unwrap();

        let scan = model.find_root("S").unwrap();
        assert_eq!(scan.description(), Some("Scan a directory"));
        let report = model.find_root("report").unwrap();
        assert!(model.find_child(report.id(), "top").unwrap().is_hidden());
        assert!(model.default_child(report.id()).is_some());
        assert_eq!(model.examples().len(), 1);
    }

    #[test]
    fn test_load_mapping_root_default_command() {
        let yaml = r#"
commands:
  - name: scan
    command: scan
    default: true
  - name: version
    command: version
"#;
        let configuration = load_mapping(yaml, &catalog()).unwrap();
        let default = configuration.default_command().unwrap();
        assert_eq!(default.name(), DEFAULT_COMMAND_NAME);
        assert!(default.is_hidden());
        assert_eq!(configuration.commands().len(), 1);
    }

    #[test]
    fn test_load_mapping_passes_data() {
        let yaml = r#"
commands:
  - name: scan
    command: scan
    data:
      unit: KiB
"#;
        let configuration = load_mapping(yaml, &catalog()).unwrap();
        let model = model::build(&configuration).unwrap();
        let scan = model.find_root("scan").unwrap();
        let data = scan.data().unwrap().downcast_ref::<serde_yaml::Value>().unwrap();
        assert_eq!(data.get("unit").and_then(serde_yaml::Value::as_str), Some("KiB"));
    }

    #[test]
    fn test_load_mapping_unknown_command_is_mapping_error() {
        let yaml = r#"
commands:
  - name: purge
    command: purge
"#;
        let err = load_mapping(yaml, &catalog()).unwrap_err();
        assert!(matches!(err, Error::Mapping(_)));
        let msg = format!("{}", err);
        assert!(msg.contains("Invalid command 'purge'"));
        assert!(msg.contains("Command 'purge' is not registered"));
    }

    // ==================== validate_handlers ====================

    #[test]
    fn test_validate_handlers_all_registered() {
        let yaml = r#"
commands:
  - name: report
    settings: scan
    subcommands:
      - name: top
        command: scan
"#;
        let mapping = parse_mapping(yaml).unwrap();
        assert!(validate_handlers(&mapping, &catalog()).is_ok());
    }

    #[test]
    fn test_validate_handlers_missing() {
        let yaml = r#"
commands:
  - name: report
    settings: report
    subcommands:
      - name: top
        command: top
"#;
        let mapping = parse_mapping(yaml).unwrap();
        let err_msg = validate_handlers(&mapping, &catalog()).unwrap_err().to_string();
        assert!(err_msg.contains("settings 'report'"));
        assert!(err_msg.contains("command 'top'"));
    }
}
