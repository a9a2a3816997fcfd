//! Client state kept on disk between runs: the job description and the RSA key

mod key_store;
mod transfer_info;

pub use key_store::load_or_generate_key;
pub use transfer_info::TransferInfo;
