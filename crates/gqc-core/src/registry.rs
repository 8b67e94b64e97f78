//! Variable registry: which quantities are monitored and how they relate.
//!
//! The registry is a small explicit DAG. Primary variables are flagged by
//! the test battery directly; derived variables take the worst flag of the
//! primaries they are computed from. Monitoring order is stable: all
//! primaries in registration order, then all derived variables.

use gqc_common::{Error, Result};
use gqc_config::QcConfig;
use serde::Serialize;
use std::fmt;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Directly measured.
    Primary,
    /// Computed from one or more primary variables.
    Derived,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Derived => write!(f, "derived"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableDescriptor {
    pub name: String,
    pub role: Role,
    /// Primary variables this one is computed from. Empty for primaries.
    pub depends_on: Vec<String>,
    /// Key the external battery expects, when it differs from `name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VariableRegistry {
    descriptors: Vec<VariableDescriptor>,
    index: HashMap<String, usize>,
    /// Aliases for auxiliary, non-monitored variables (pressure, depth).
    auxiliary_aliases: BTreeMap<String, String>,
}

impl VariableRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The standard glider registry.
    pub fn glider() -> Self {
        let mut builder = Self::builder();
        builder
            .primary("temperature", Some("TEMP"))
            .primary("salinity", Some("PSAL"))
            .primary("oxygen_concentration", None)
            .primary("chlorophyll", None)
            // Conductivity flags follow the salinity tests.
            .derived("conductivity", &["salinity"])
            .derived("potential_density", &["temperature", "salinity"])
            .derived("density", &["temperature", "salinity"])
            .derived("potential_temperature", &["temperature", "salinity"])
            .auxiliary_alias("pressure", "PRES")
            .auxiliary_alias("depth", "DEPTH");
        builder
            .build()
            .expect("built-in glider registry is acyclic")
    }

    /// Look up a registered variable.
    pub fn describe(&self, name: &str) -> Result<&VariableDescriptor> {
        self.index
            .get(name)
            .map(|i| &self.descriptors[*i])
            .ok_or_else(|| Error::UnknownVariable {
                name: name.to_string(),
            })
    }

    /// Every variable `config` names must be registered, and each test
    /// table must be keyed by the role it applies to.
    pub fn check_config(&self, config: &QcConfig) -> Result<()> {
        let tables = [
            (&config.variable_tests, Role::Primary, "variable_tests"),
            (&config.group_tests, Role::Derived, "group_tests"),
        ];
        for (table, role, label) in tables {
            for (name, group) in table {
                if self.describe(name)?.role != role {
                    return Err(Error::Config(format!(
                        "{label} entry {name} is not a {role} variable"
                    )));
                }
                for member in group.variable_names() {
                    self.describe(member)?;
                }
            }
        }
        for rule in &config.overrides {
            self.describe(&rule.target)?;
        }
        for name in config.masking.thresholds.keys() {
            self.describe(name)?;
        }
        Ok(())
    }

    /// Monitored variable names, primaries before derived.
    pub fn monitored_variables(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.name.as_str())
    }

    pub fn descriptors(&self) -> &[VariableDescriptor] {
        &self.descriptors
    }

    pub fn primaries(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.descriptors.iter().filter(|d| d.role == Role::Primary)
    }

    pub fn derived(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.descriptors.iter().filter(|d| d.role == Role::Derived)
    }

    /// External key for `name`; identity when no alias is configured.
    pub fn resolve_alias<'a>(&'a self, name: &'a str) -> &'a str {
        self.index
            .get(name)
            .and_then(|i| self.descriptors[*i].alias.as_deref())
            .or_else(|| self.auxiliary_aliases.get(name).map(String::as_str))
            .unwrap_or(name)
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: Vec<VariableDescriptor>,
    auxiliary_aliases: BTreeMap<String, String>,
}

impl RegistryBuilder {
    pub fn primary(&mut self, name: &str, alias: Option<&str>) -> &mut Self {
        self.entries.push(VariableDescriptor {
            name: name.to_string(),
            role: Role::Primary,
            depends_on: Vec::new(),
            alias: alias.map(str::to_string),
        });
        self
    }

    pub fn derived(&mut self, name: &str, depends_on: &[&str]) -> &mut Self {
        self.entries.push(VariableDescriptor {
            name: name.to_string(),
            role: Role::Derived,
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            alias: None,
        });
        self
    }

    pub fn auxiliary_alias(&mut self, name: &str, alias: &str) -> &mut Self {
        self.auxiliary_aliases
            .insert(name.to_string(), alias.to_string());
        self
    }

    /// Order and check the graph. Every dependency must be a registered
    /// primary variable, and names must be unique.
    pub fn build(&mut self) -> Result<VariableRegistry> {
        let entries = std::mem::take(&mut self.entries);
        let (primaries, derived): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|d| d.role == Role::Primary);
        let descriptors: Vec<VariableDescriptor> = primaries.into_iter().chain(derived).collect();

        let mut index = HashMap::with_capacity(descriptors.len());
        for (i, d) in descriptors.iter().enumerate() {
            if index.insert(d.name.clone(), i).is_some() {
                return Err(Error::Config(format!("variable {} registered twice", d.name)));
            }
        }

        for d in descriptors.iter().filter(|d| d.role == Role::Derived) {
            if d.depends_on.is_empty() {
                return Err(Error::Config(format!(
                    "derived variable {} has no dependencies",
                    d.name
                )));
            }
            for dep in &d.depends_on {
                match index.get(dep).map(|i| descriptors[*i].role) {
                    Some(Role::Primary) => {}
                    Some(Role::Derived) => {
                        return Err(Error::Config(format!(
                            "{} depends on derived variable {}",
                            d.name, dep
                        )))
                    }
                    None => {
                        return Err(Error::Config(format!(
                            "{} depends on unregistered variable {}",
                            d.name, dep
                        )))
                    }
                }
            }
        }

        Ok(VariableRegistry {
            descriptors,
            index,
            auxiliary_aliases: std::mem::take(&mut self.auxiliary_aliases),
        })
    }
}
