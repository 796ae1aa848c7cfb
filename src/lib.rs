pub mod alert;
pub mod broker;
pub mod client;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod producer;
pub mod registry;
pub mod store;
pub mod util;
// Configure a global allocator optimized for throughput.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;
