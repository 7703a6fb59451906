pub mod adapter_type;
pub mod expected_status;
pub mod metadata;

pub use adapter_type::*;
pub use expected_status::*;
pub use metadata::*;
