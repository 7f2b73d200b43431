use crate::model::Minutes;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_STYLISTS_PER_TENANT: usize = 10_000;
pub const MAX_WINDOWS_PER_STYLIST: usize = 64;
pub const MAX_NAME_LEN: usize = 256;

pub const MAX_SERVICES_PER_BOOKING: usize = 16;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_CONTACT_LEN: usize = 256;

/// A single catalog service can't run longer than a day.
pub const MAX_SERVICE_DURATION: Minutes = 24 * 60;

pub const DEFAULT_SLOT_GRANULARITY: Minutes = 30;

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 500;
