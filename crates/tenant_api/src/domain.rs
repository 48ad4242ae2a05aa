mod device_service;
mod ingestion_service;
mod organization_service;
mod tenant_provisioner;

pub use device_service::*;
pub use ingestion_service::*;
pub use organization_service::*;
pub use tenant_provisioner::*;
