//! Host implementations of [`NativeAppRpc`](native_app_core::NativeAppRpc).

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "memory")]
pub use memory::MemoryHost;
