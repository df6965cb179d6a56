pub mod adapter_manager;
pub mod util;
