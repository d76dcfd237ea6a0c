pub mod content;

pub use content::{hash_file, hash_reader, Fingerprint, FINGERPRINT_LEN};
