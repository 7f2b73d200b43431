use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::catalog::Directory;
use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::model::Minutes;

/// One salon: its scheduling engine plus the catalog/customer directory the
/// engine reads from.
pub struct Tenant {
    pub engine: Arc<Engine>,
    pub directory: Arc<Directory>,
}

/// Manages per-tenant state. Each tenant gets its own Engine + WAL +
/// catalog snapshot + compactor. Tenant = database name from the pgwire
/// connection.
pub struct TenantManager {
    tenants: DashMap<String, Arc<Tenant>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    granularity: Minutes,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, granularity: Minutes) -> Self {
        Self {
            tenants: DashMap::new(),
            data_dir,
            compact_threshold,
            granularity,
        }
    }

    /// Get or lazily create the tenant with the given name.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Tenant>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
        }
        // Keyed by the file name: names that sanitize alike share one WAL.
        if let Some(existing) = self.tenants.get(&safe_name) {
            return Ok(existing.value().clone());
        }
        if self.tenants.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        let created = match self.tenants.entry(safe_name) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let loaded = Arc::new(self.load(e.key())?);
                e.insert(loaded.clone());
                loaded
            }
        };

        let compactor_engine = created.engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.tenants.len() as f64);
        tracing::info!(tenant, "tenant loaded");
        Ok(created)
    }

    fn load(&self, safe_name: &str) -> io::Result<Tenant> {
        let catalog_path = self.data_dir.join(format!("{safe_name}.catalog.json"));
        let directory = Arc::new(Directory::open(&catalog_path).map_err(io::Error::other)?);
        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(
            wal_path,
            directory.clone(),
            directory.clone(),
            self.granularity,
        )?);
        Ok(Tenant { engine, directory })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogService, CustomerProfile};
    use crate::model::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("chairtime_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn monday() -> chrono::NaiveDate {
        parse_date("2025-06-02").unwrap()
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = TenantManager::new(dir, 1000, 30);

        let salon_a = tm.get_or_create("salon_a").unwrap();
        let salon_b = tm.get_or_create("salon_b").unwrap();

        let stylist = Ulid::new();

        // Same stylist id in both tenants
        salon_a.engine.create_stylist(stylist, None).await.unwrap();
        salon_b.engine.create_stylist(stylist, None).await.unwrap();

        // Window only in tenant A
        let window = WeeklyWindow {
            id: Ulid::new(),
            stylist_id: stylist,
            day: DayOfWeek::of(monday()),
            span: Span::new(9 * 60, 12 * 60),
            active: true,
        };
        salon_a.engine.add_window(window).await.unwrap();

        let slots_b: Vec<_> = salon_b.engine.compute_slots(stylist, monday(), 60, None).await.unwrap().collect();
        assert!(slots_b.is_empty());

        let slots_a: Vec<_> = salon_a.engine.compute_slots(stylist, monday(), 60, None).await.unwrap().collect();
        assert_eq!(slots_a.len(), 5);
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), 1000, 30);

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _tenant = tm.get_or_create("my_salon").unwrap();

        assert!(dir.join("my_salon.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = TenantManager::new(dir, 1000, 30);

        let t1 = tm.get_or_create("foo").unwrap();
        let t2 = tm.get_or_create("foo").unwrap();

        assert!(Arc::ptr_eq(&t1, &t2));
        assert!(Arc::ptr_eq(&t1.engine, &t2.engine));
    }

    #[tokio::test]
    async fn names_sharing_files_share_a_tenant() {
        let dir = test_data_dir("shared_files");
        let tm = TenantManager::new(dir.clone(), 1000, 30);

        let dotted = tm.get_or_create("salon.a").unwrap();
        let plain = tm.get_or_create("salona").unwrap();
        let slashed = tm.get_or_create("salon/a").unwrap();

        assert!(Arc::ptr_eq(&dotted, &plain));
        assert!(Arc::ptr_eq(&plain.engine, &slashed.engine));
        assert!(dir.join("salona.wal").exists());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn catalog_survives_reload() {
        let dir = test_data_dir("catalog_reload");
        let service = CatalogService {
            id: Ulid::new(),
            name: "Cut".into(),
            price: 800,
            duration: 30,
            active: true,
        };
        let customer = CustomerProfile {
            id: Ulid::new(),
            name: "Mei".into(),
            phone: None,
            email: "mei@example.com".into(),
        };
        {
            let tm = TenantManager::new(dir.clone(), 1000, 30);
            let tenant = tm.get_or_create("salon").unwrap();
            tenant.directory.upsert_service(service.clone()).unwrap();
            tenant.directory.upsert_customer(customer).unwrap();
        }

        let tm = TenantManager::new(dir.clone(), 1000, 30);
        let tenant = tm.get_or_create("salon").unwrap();
        assert_eq!(tenant.directory.services(), vec![service]);
        assert!(dir.join("salon.catalog.json").exists());
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = TenantManager::new(dir.clone(), 1000, 30);

        // Path traversal attempt
        let _tenant = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        let result = tm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = TenantManager::new(dir, 1000, 30);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let dir = test_data_dir("count_limit");
        let tm = TenantManager::new(dir, 1000, 30);

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let err = tm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }
}
