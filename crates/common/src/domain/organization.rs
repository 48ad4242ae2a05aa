use crate::namespace;

/// Tenant isolation boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub device_id: String,
    pub organization_id: String,
    pub name: String,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A provisioned organization together with the stream bound to its subject prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    pub organization: Organization,
    pub stream_name: String,
    pub subject_filter: String,
}

impl Tenant {
    pub fn for_organization(organization: Organization) -> Self {
        let stream_name = namespace::stream_name(&organization.id);
        let subject_filter = namespace::organization_subject_filter(&organization.id);
        Self {
            organization,
            stream_name,
            subject_filter,
        }
    }

    pub fn organization_id(&self) -> &str {
        &self.organization.id
    }
}
