pub mod tenant;

pub use tenant::{Tenant, CLIENT_CODE_HEADER};
