// Library exports for hicsr
pub mod checkpoint;
pub mod chunk_params;
pub mod conv_net;
pub mod dataset;
pub mod device;
pub mod format_io;
pub mod loader;
pub mod metrics;
pub mod network;
pub mod optim;
pub mod predict;
pub mod reassemble;
pub mod train;
