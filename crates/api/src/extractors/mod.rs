//! Request extractors.

pub mod actor;
pub mod request_meta;

pub use actor::Actor;
pub use request_meta::RequestMeta;
