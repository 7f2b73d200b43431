//! Service catalog and customer directory.
//!
//! The engine only ever sees these through the [`ServiceCatalog`] and
//! [`CustomerDirectory`] traits. [`Directory`] is the bundled implementation:
//! in memory, persisted as a JSON snapshot next to the tenant's WAL.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::*;
use crate::model::Minutes;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogService {
    pub id: Ulid,
    pub name: String,
    pub price: u64,
    pub duration: Minutes,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub id: Ulid,
    pub name: String,
    pub phone: Option<String>,
    pub email: String,
}

#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn get_service(&self, id: Ulid) -> Option<CatalogService>;
}

#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn get_customer(&self, id: Ulid) -> Option<CustomerProfile>;
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog I/O: {0}")]
    Io(#[from] io::Error),
    #[error("catalog snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid catalog entry: {0}")]
    Invalid(&'static str),
}

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    services: Vec<CatalogService>,
    customers: Vec<CustomerProfile>,
}

pub struct Directory {
    services: DashMap<Ulid, CatalogService>,
    customers: DashMap<Ulid, CustomerProfile>,
    path: Option<PathBuf>,
    /// Serializes snapshot rewrites.
    save_lock: Mutex<()>,
}

impl Directory {
    pub fn in_memory() -> Self {
        Self {
            services: DashMap::new(),
            customers: DashMap::new(),
            path: None,
            save_lock: Mutex::new(()),
        }
    }

    /// Load the snapshot at `path` (missing file = empty directory).
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        let mut dir = Self::in_memory();
        dir.path = Some(path.to_path_buf());
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(dir),
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        for s in snapshot.services {
            dir.services.insert(s.id, s);
        }
        for c in snapshot.customers {
            dir.customers.insert(c.id, c);
        }
        tracing::debug!(
            services = dir.services.len(),
            customers = dir.customers.len(),
            "loaded catalog snapshot {}",
            path.display()
        );
        Ok(dir)
    }

    pub fn upsert_service(&self, service: CatalogService) -> Result<(), CatalogError> {
        if service.name.is_empty() || service.name.len() > MAX_NAME_LEN {
            return Err(CatalogError::Invalid("service name must be 1..=256 bytes"));
        }
        if service.duration == 0 || service.duration > MAX_SERVICE_DURATION {
            return Err(CatalogError::Invalid("service duration must be 1..=1440 minutes"));
        }
        let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut snapshot = self.snapshot();
        match snapshot.services.binary_search_by_key(&service.id, |s| s.id) {
            Ok(i) => snapshot.services[i] = service.clone(),
            Err(i) => snapshot.services.insert(i, service.clone()),
        }
        self.persist(&snapshot)?;
        self.services.insert(service.id, service);
        Ok(())
    }

    pub fn upsert_customer(&self, customer: CustomerProfile) -> Result<(), CatalogError> {
        if customer.name.is_empty() || customer.name.len() > MAX_CONTACT_LEN {
            return Err(CatalogError::Invalid("customer name must be 1..=256 bytes"));
        }
        if customer.email.len() > MAX_CONTACT_LEN
            || customer.phone.as_ref().is_some_and(|p| p.len() > MAX_CONTACT_LEN)
        {
            return Err(CatalogError::Invalid("contact field too long"));
        }
        let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut snapshot = self.snapshot();
        match snapshot.customers.binary_search_by_key(&customer.id, |c| c.id) {
            Ok(i) => snapshot.customers[i] = customer.clone(),
            Err(i) => snapshot.customers.insert(i, customer.clone()),
        }
        self.persist(&snapshot)?;
        self.customers.insert(customer.id, customer);
        Ok(())
    }

    pub fn services(&self) -> Vec<CatalogService> {
        let mut out: Vec<_> = self.services.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|s| s.id);
        out
    }

    fn snapshot(&self) -> Snapshot {
        let mut customers: Vec<_> = self.customers.iter().map(|e| e.value().clone()).collect();
        customers.sort_by_key(|c| c.id);
        Snapshot {
            services: self.services(),
            customers,
        }
    }

    /// Rewrite the snapshot: temp file, fsync, rename. Callers hold
    /// `save_lock` and only touch the maps once this returns `Ok`.
    fn persist(&self, snapshot: &Snapshot) -> Result<(), CatalogError> {
        let Some(path) = &self.path else { return Ok(()) };
        let tmp_path = path.with_extension("json.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        serde_json::to_writer_pretty(&mut writer, snapshot)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[async_trait]
impl ServiceCatalog for Directory {
    async fn get_service(&self, id: Ulid) -> Option<CatalogService> {
        self.services.get(&id).map(|e| e.value().clone())
    }
}

#[async_trait]
impl CustomerDirectory for Directory {
    async fn get_customer(&self, id: Ulid) -> Option<CustomerProfile> {
        self.customers.get(&id).map(|e| e.value().clone())
    }
}
