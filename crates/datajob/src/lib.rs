pub mod common;
pub mod server;
pub mod transfer;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::DataJobError;
pub type Result<T> = std::result::Result<T, Error>;

pub type Map<K, V> = hashbrown::HashMap<K, V>;
pub type Set<T> = hashbrown::HashSet<T>;

// ID types
pub use server::identity::JobId;
pub use server::tenant::{TenantContext, TenantName};

pub const DATAJOB_VERSION: &str = {
    match option_env!("DATAJOB_BUILD_VERSION") {
        Some(version) => version,
        None => const_format::concatcp!(env!("CARGO_PKG_VERSION"), "-dev"),
    }
};
