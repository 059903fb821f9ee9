// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::app::errors::AppResult;
use crate::app::ports::ApplicationCatalogPort;
use crate::app::types::{
    ApplicationDescription, ApplicationWithTool, NameAndVersion, ToolDescription,
};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("application {application} references unknown tool {tool}")]
    UnknownTool {
        application: NameAndVersion,
        tool: NameAndVersion,
    },
    #[error("{0} is declared more than once")]
    Duplicate(NameAndVersion),
    #[error("application {application} declares parameter '{parameter}' twice")]
    DuplicateParameter {
        application: NameAndVersion,
        parameter: String,
    },
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    tools: Vec<ToolDescription>,
    #[serde(default)]
    applications: Vec<ApplicationDescription>,
}

/// Read-only application catalog loaded once from a TOML file:
///
/// ```toml
/// [[tools]]
/// name = "figlet"
/// version = "2.2.5"
/// default_number_of_nodes = 1
/// default_tasks_per_node = 1
/// default_max_time = { hours = 0, minutes = 10, seconds = 0 }
///
/// [[applications]]
/// name = "figlet"
/// version = "1.0.0"
/// tool = { name = "figlet", version = "2.2.5" }
/// invocation = ["figlet", "{text}"]
///
/// [[applications.parameters]]
/// name = "text"
/// type = "text"
/// ```
#[derive(Debug, Clone, Default)]
pub struct TomlCatalog {
    applications: BTreeMap<NameAndVersion, ApplicationWithTool>,
}

impl TomlCatalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(contents)?;

        let mut tools = BTreeMap::new();
        for tool in file.tools {
            let key = NameAndVersion::new(tool.name.clone(), tool.version.clone());
            if tools.insert(key.clone(), tool).is_some() {
                return Err(CatalogError::Duplicate(key));
            }
        }

        let mut applications = BTreeMap::new();
        for application in file.applications {
            let key = application.name_and_version();
            let mut seen = HashSet::new();
            if let Some(parameter) = application
                .parameters
                .iter()
                .find(|p| !seen.insert(p.name.as_str()))
            {
                return Err(CatalogError::DuplicateParameter {
                    application: key,
                    parameter: parameter.name.clone(),
                });
            }
            let Some(tool) = tools.get(&application.tool).cloned() else {
                return Err(CatalogError::UnknownTool {
                    tool: application.tool.clone(),
                    application: key,
                });
            };
            let entry = ApplicationWithTool { application, tool };
            if applications.insert(key.clone(), entry).is_some() {
                return Err(CatalogError::Duplicate(key));
            }
        }
        tracing::info!("loaded application catalog applications={}", applications.len());
        Ok(Self { applications })
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }
}

#[async_trait]
impl ApplicationCatalogPort for TomlCatalog {
    async fn find_application(
        &self,
        application: &NameAndVersion,
    ) -> AppResult<Option<ApplicationWithTool>> {
        Ok(self.applications.get(application).cloned())
    }

    async fn list_applications(&self) -> AppResult<Vec<ApplicationDescription>> {
        Ok(self
            .applications
            .values()
            .map(|entry| entry.application.clone())
            .collect())
    }
}
