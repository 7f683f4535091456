use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ROLE_ADMIN: &str = "ADMIN";
pub const ROLE_MUTAWWIF: &str = "MUTAWWIF";
pub const ROLE_JAMAAH: &str = "JAMAAH";

/// Display fields the directory hands out for presence enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub id: Uuid,
    pub full_name: String,
    pub role: String,
}
