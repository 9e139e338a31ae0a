use sha2::{Digest, Sha256};
use uuid::Uuid;

/// 244 random bits, URL safe.
pub fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Only this digest is stored; the token itself goes to the recipient.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
