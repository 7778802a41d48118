pub mod process;
#[cfg(feature = "runtime")]
pub mod tracing_setup;
