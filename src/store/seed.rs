//! TOML seed file for the in-memory directory
//!
//! ```toml
//! customers = ["cust_1"]
//!
//! [[services]]
//! id = "svc_plumbing"
//! name = "Pipe repair"
//! category = "plumbing"
//! base_price = 500.0
//!
//! [[professionals]]
//! id = "pro_1"
//! category = "plumbing"
//! postal_code = "560001"
//! is_approved = true
//!
//! [[addresses]]
//! id = "addr_1"
//! postal_code = "560001"
//! ```

use crate::store::directory::InMemoryDirectory;
use crate::types::{Address, CustomerId, Professional, Service};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySeed {
    pub customers: Vec<CustomerId>,
    pub services: Vec<Service>,
    pub professionals: Vec<Professional>,
    pub addresses: Vec<Address>,
}

impl DirectorySeed {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read directory seed {}", path.display()))?;
        Self::parse(&raw)
            .with_context(|| format!("Failed to parse directory seed {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load every record into `directory`, replacing entries with the same id
    pub fn apply(self, directory: &InMemoryDirectory) -> Result<()> {
        for customer in self.customers {
            directory.add_customer(customer)?;
        }
        for service in self.services {
            directory.add_service(service)?;
        }
        for professional in self.professionals {
            directory.upsert_professional(professional)?;
        }
        for address in self.addresses {
            directory.add_address(address)?;
        }
        Ok(())
    }

    pub fn into_directory(self) -> Result<InMemoryDirectory> {
        let directory = InMemoryDirectory::new();
        self.apply(&directory)?;
        Ok(directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::directory::Directory;
    use std::io::Write;

    const SEED: &str = r#"
customers = ["cust_1", "cust_2"]

[[services]]
id = "svc_plumbing"
name = "Pipe repair"
category = "plumbing"
base_price = 500.0

[[professionals]]
id = "pro_1"
category = "plumbing"
postal_code = "560001"
is_approved = true

[[professionals]]
id = "pro_2"
category = "plumbing"
postal_code = "560001"
is_approved = false

[[addresses]]
id = "addr_1"
postal_code = "560001"
"#;

    #[tokio::test]
    async fn test_seed_populates_directory() {
        let directory = DirectorySeed::parse(SEED).unwrap().into_directory().unwrap();

        let service = directory.service("svc_plumbing").await.unwrap().unwrap();
        assert_eq!(service.base_price, 500.0);
        assert_eq!(service.rating.completed, 0);
        assert_eq!(
            directory.count_eligible("plumbing", "560001").await.unwrap(),
            1
        );
        assert_eq!(directory.population().await.unwrap().customers, 2);
    }

    #[test]
    fn test_seed_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", SEED).unwrap();

        let seed = DirectorySeed::from_file(file.path()).unwrap();
        assert_eq!(seed.professionals.len(), 2);
        assert_eq!(seed.addresses[0].postal_code, "560001");
    }

    #[test]
    fn test_seed_rejects_malformed_records() {
        let raw = "[[services]]\nid = \"svc\"\n";
        assert!(DirectorySeed::parse(raw).is_err());
    }
}
