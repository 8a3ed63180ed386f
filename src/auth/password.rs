//! Credential hashing (bcrypt), kept off the async workers.

use crate::auth::error::AuthError;
use bcrypt::{hash, verify};

pub async fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash(password, cost))
        .await
        .map_err(|e| AuthError::Internal(format!("hashing task failed: {}", e)))?
        .map_err(|e| AuthError::Internal(format!("failed to hash password: {}", e)))
}

pub async fn verify_password(password: &str, password_hash: &str) -> Result<bool, AuthError> {
    let password = password.to_string();
    let password_hash = password_hash.to_string();
    tokio::task::spawn_blocking(move || verify(password, &password_hash))
        .await
        .map_err(|e| AuthError::Internal(format!("verification task failed: {}", e)))?
        .map_err(|e| AuthError::Internal(format!("failed to verify password: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hashed = hash_password("correct horse", 4).await.unwrap();

        assert!(hashed.starts_with("$2"));
        assert!(verify_password("correct horse", &hashed).await.unwrap());
        assert!(!verify_password("wrong horse", &hashed).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_hash_is_internal() {
        let err = verify_password("pw", "not-a-bcrypt-hash").await.unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
    }
}
