//! Static catalog of source clients per deployment environment.
//!
//! Loaded once per process and never mutated afterwards.

use core::str::FromStr;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::ClientId;

/// Deployment environment a client belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Qa,
    Prod,
}

impl Environment {
    pub const fn as_str(self) -> &'static str {
        match self {
            Environment::Qa => "qa",
            Environment::Prod => "prod",
        }
    }
}

impl core::fmt::Display for Environment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qa" => Ok(Environment::Qa),
            "prod" => Ok(Environment::Prod),
            other => Err(DomainError::validation(format!(
                "unknown environment '{other}' (expected qa or prod)"
            ))),
        }
    }
}

/// One source client and its capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDescriptor {
    pub id: ClientId,
    pub environment: Environment,
    pub supports_hot_water: bool,
    /// Name of the database holding this client's readings.
    pub database: String,
}

#[derive(Debug, Deserialize)]
struct RegistryEntry {
    id: ClientId,
    supports_hot_water: bool,
    #[serde(default)]
    database: Option<String>,
}

/// Environment-scoped, ordered client catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRegistry {
    clients: Vec<ClientDescriptor>,
}

impl SourceRegistry {
    /// Build a registry, rejecting duplicate ids within one environment.
    pub fn new(clients: Vec<ClientDescriptor>) -> Result<Self, DomainError> {
        let mut seen = HashSet::new();
        for c in &clients {
            if !seen.insert((c.environment, c.id.clone())) {
                return Err(DomainError::conflict(format!(
                    "client '{}' listed twice in environment {}",
                    c.id, c.environment
                )));
            }
        }
        Ok(Self { clients })
    }

    /// The catalog the service ships with.
    pub fn builtin() -> Self {
        const QA: &[(&str, &str)] = &[
            ("Huurkor", "mobixhep_huurkor"),
            ("TopCharge", "mobixhep_topcharge"),
            ("Paxton", "mobixhep_paxton"),
            ("MRC", "mobixhep_mrc"),
        ];
        const PROD: &[(&str, &str)] = &[
            ("Huurkor", "mobixenn_mobiX_c507db"),
            ("TopCharge", "mobixenn_mobiX_c509db"),
            ("Pharoah", "mobixenn_mobiX_c522db"),
            ("Paxton", "mobixenn_mobiX_c502db"),
            ("MRC", "mobixenn_mobiX_c510db"),
            ("solver", "mobixenn_mobiX_c506db"),
        ];

        let mut clients = Vec::with_capacity(QA.len() + PROD.len());
        for (env, list) in [(Environment::Qa, QA), (Environment::Prod, PROD)] {
            for (name, db) in list {
                clients.push(ClientDescriptor {
                    id: ClientId((*name).to_string()),
                    environment: env,
                    supports_hot_water: true,
                    database: (*db).to_string(),
                });
            }
        }
        Self { clients }
    }

    /// Parse `{"qa": [{"id": .., "supports_hot_water": .., "database": ..}], "prod": [..]}`.
    ///
    /// `database` defaults to the client id.
    pub fn from_json(raw: &str) -> Result<Self, DomainError> {
        let parsed: BTreeMap<Environment, Vec<RegistryEntry>> = serde_json::from_str(raw)
            .map_err(|e| DomainError::validation(format!("registry: {e}")))?;

        let mut clients = Vec::new();
        for (environment, entries) in parsed {
            for entry in entries {
                if entry.id.as_str().trim().is_empty() {
                    return Err(DomainError::invalid_id("registry: empty client id"));
                }
                let database = entry.database.unwrap_or_else(|| entry.id.to_string());
                clients.push(ClientDescriptor {
                    id: entry.id,
                    environment,
                    supports_hot_water: entry.supports_hot_water,
                    database,
                });
            }
        }
        Self::new(clients)
    }

    /// Clients of one environment, in catalog order.
    pub fn clients_for(&self, environment: Environment) -> Vec<&ClientDescriptor> {
        self.clients
            .iter()
            .filter(|c| c.environment == environment)
            .collect()
    }

    pub fn get(&self, environment: Environment, id: &ClientId) -> Option<&ClientDescriptor> {
        self.clients
            .iter()
            .find(|c| c.environment == environment && &c.id == id)
    }

    pub fn all(&self) -> &[ClientDescriptor] {
        &self.clients
    }
}
