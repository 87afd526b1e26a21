//! YAML fixtures: products, devices and rules
//!
//! ```yaml
//! products:
//!   - id: thermostat
//!     metadata:
//!       properties:
//!         - id: temperature
//!         - id: mode
//! devices:
//!   - id: t-1
//!     product_id: thermostat
//! rules:
//!   - product_id: thermostat
//!     metadata_id: temperature
//!     original_id: temp_f
//!     others:
//!       transformationConfig: { type: math, expression: "(x - 32) * 5/9" }
//! ```

use anyhow::{Context, Result};
use propmap_model::{DeviceInstance, MappingRule, Product};
use propmap_store::InMemoryRegistry;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Fixtures {
    pub products: Vec<Product>,
    pub devices: Vec<DeviceInstance>,
    pub rules: Vec<MappingRule>,
}

impl Fixtures {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixtures {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid fixtures {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn registry(&self) -> InMemoryRegistry {
        let registry = InMemoryRegistry::new();
        for product in &self.products {
            registry.insert_product(product.clone());
        }
        for device in &self.devices {
            registry.insert_device(device.clone());
        }
        registry
    }
}

/// Rules file for the bind commands, YAML or JSON list
pub fn load_rules(path: &Path) -> Result<Vec<MappingRule>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rules {}", path.display()))?;
    let rules = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content)?,
        _ => serde_yaml::from_str(&content)?,
    };
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use propmap_store::DeviceRegistry;
    use std::io::Write;

    const SAMPLE: &str = r#"
products:
  - id: thermostat
    metadata:
      properties:
        - id: temperature
        - id: mode
          name: Mode
devices:
  - id: t-1
    product_id: thermostat
rules:
  - product_id: thermostat
    metadata_id: temperature
    original_id: temp_f
    others:
      transformationConfig:
        type: math
        expression: "(x - 32) * 5/9"
"#;

    #[tokio::test]
    async fn test_parse_sample() {
        let fixtures = Fixtures::parse(SAMPLE).unwrap();
        assert_eq!(fixtures.rules.len(), 1);
        assert!(fixtures.rules[0].transformation().unwrap().is_some());

        let registry = fixtures.registry();
        let schema = registry.product_schema("thermostat").await.unwrap();
        assert_eq!(schema.properties.len(), 2);
        assert!(registry.find_device("t-1").await.unwrap().is_some());
    }

    #[test]
    fn test_load_rules_json_and_yaml() {
        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(json, r#"[{{"metadata_id": "mode", "original_id": "m"}}]"#).unwrap();
        let rules = load_rules(json.path()).unwrap();
        assert_eq!(rules[0].original_id.as_deref(), Some("m"));

        let mut yaml = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(yaml, "- metadata_id: mode\n").unwrap();
        let rules = load_rules(yaml.path()).unwrap();
        assert!(!rules[0].has_original_id());
    }
}
