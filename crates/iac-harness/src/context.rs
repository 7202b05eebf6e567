//! Per-run identity values.
//!
//! Modules under test usually need a unique name prefix plus cloud identity
//! values (project, organization, region, subscription). The harness treats
//! these as opaque strings supplied by the environment and only turns them
//! into variable overrides.

use crate::config::ConfigError;
use crate::run_config::VarValue;
use common::types::RunId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Default name prefix.
pub const DEFAULT_NAME_PREFIX: &str = "iac";

/// Cloud whose identity variables a module expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cloud {
    Gcp,
    Aws,
    Azure,
}

impl Cloud {
    /// (module variable, environment variable) pairs, all required.
    fn identity_vars(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Cloud::Gcp => &[("project", "GOOGLE_PROJECT_ID"), ("org_id", "GOOGLE_ORG_ID")],
            Cloud::Aws => &[("region", "AWS_REGION")],
            Cloud::Azure => &[("subscription_id", "ARM_SUBSCRIPTION_ID")],
        }
    }
}

impl fmt::Display for Cloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cloud::Gcp => f.write_str("gcp"),
            Cloud::Aws => f.write_str("aws"),
            Cloud::Azure => f.write_str("azure"),
        }
    }
}

impl FromStr for Cloud {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gcp" | "google" => Ok(Cloud::Gcp),
            "aws" => Ok(Cloud::Aws),
            "azure" | "azurerm" => Ok(Cloud::Azure),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown cloud '{other}' (expected gcp, aws or azure)"
            ))),
        }
    }
}

/// Identity values for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestContext {
    pub cloud: Cloud,
    /// `<prefix>-<8 hex>`, unique per run.
    pub name_prefix: String,
    /// Module variable name to value.
    pub identity: BTreeMap<String, String>,
}

impl TestContext {
    /// Generate a context for `cloud` from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` for the first required
    /// environment variable that is unset or blank.
    pub fn generate(
        cloud: Cloud,
        prefix: &str,
        env: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut identity = BTreeMap::new();
        for (var, env_var) in cloud.identity_vars() {
            let value = env
                .get(*env_var)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar((*env_var).to_string()))?;
            identity.insert((*var).to_string(), value.to_string());
        }

        Ok(Self {
            cloud,
            name_prefix: format!("{}-{}", prefix.to_ascii_lowercase(), RunId::new().short()),
            identity,
        })
    }

    /// Variable overrides: `name_prefix` plus the identity values.
    pub fn to_vars(&self) -> BTreeMap<String, VarValue> {
        std::iter::once(("name_prefix".to_string(), VarValue::from(self.name_prefix.as_str())))
            .chain(
                self.identity
                    .iter()
                    .map(|(k, v)| (k.clone(), VarValue::from(v.as_str()))),
            )
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn gcp_env() -> HashMap<String, String> {
        HashMap::from([
            ("GOOGLE_PROJECT_ID".to_string(), "proj-x".to_string()),
            ("GOOGLE_ORG_ID".to_string(), "org-1".to_string()),
        ])
    }

    #[test]
    fn test_generate_gcp_context() {
        let context = TestContext::generate(Cloud::Gcp, "t1", &gcp_env()).unwrap();

        assert!(context.name_prefix.starts_with("t1-"));
        assert_eq!(context.name_prefix.len(), "t1-".len() + 8);
        assert_eq!(context.identity.get("project").map(String::as_str), Some("proj-x"));
        assert_eq!(context.identity.get("org_id").map(String::as_str), Some("org-1"));

        let vars = context.to_vars();
        assert_eq!(
            vars.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["name_prefix", "org_id", "project"]
        );
    }

    #[test]
    fn test_name_prefix_is_unique() {
        let a = TestContext::generate(Cloud::Gcp, "t1", &gcp_env()).unwrap();
        let b = TestContext::generate(Cloud::Gcp, "t1", &gcp_env()).unwrap();
        assert_ne!(a.name_prefix, b.name_prefix);
    }

    #[test]
    fn test_missing_identity_env_var() {
        let mut env = gcp_env();
        env.insert("GOOGLE_ORG_ID".to_string(), "  ".to_string());

        let result = TestContext::generate(Cloud::Gcp, "t1", &env);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "GOOGLE_ORG_ID"));
    }

    #[test]
    fn test_other_clouds() {
        let env = HashMap::from([
            ("AWS_REGION".to_string(), "eu-west-1".to_string()),
            ("ARM_SUBSCRIPTION_ID".to_string(), "sub-1".to_string()),
        ]);
        let aws = TestContext::generate(Cloud::Aws, "iac", &env).unwrap();
        assert_eq!(aws.identity.get("region").map(String::as_str), Some("eu-west-1"));

        let azure = TestContext::generate(Cloud::Azure, "iac", &env).unwrap();
        assert_eq!(
            azure.identity.get("subscription_id").map(String::as_str),
            Some("sub-1")
        );
    }

    #[test]
    fn test_cloud_parsing() {
        assert_eq!("GCP".parse::<Cloud>().unwrap(), Cloud::Gcp);
        assert_eq!("azurerm".parse::<Cloud>().unwrap(), Cloud::Azure);
        assert!("oracle".parse::<Cloud>().is_err());
    }
}
