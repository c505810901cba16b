pub mod registry;
pub mod resolver;

pub use registry::{
    PortalKind, PortalMapping, PortalRegistry, PortalRegistryBuilder, EMAIL_GROUP_ID,
};
pub use resolver::{AliasTable, PortalResolver, Resolution};
