use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Password hashing failed")]
    Hash,
    #[error("Password verification failed")]
    Verify,
}

fn hasher() -> Argon2<'static> {
    // Параметры заметно дороже дефолтных: проверка учётных данных
    // происходит один раз на соединение, не на каждый пакет.
    Argon2::new(
        Algorithm::Argon2id,
        Version::V0x13,
        Params::new(15_000, 2, 1, None).expect("static argon2 params"),
    )
}

/// Хеширует секрет со свежей случайной солью.
pub fn hash_secret(secret: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    hasher()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| PasswordError::Hash)
}

/// Сверяет открытый секрет с сохранённым хешем.
///
/// Некорректный хеш — ошибка, а не просто `false`: это повреждение
/// конфигурации, его нельзя маскировать под неверный пароль.
pub fn verify_secret(
    secret: &str,
    hash: &str,
) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(hash).map_err(|_| PasswordError::Verify)?;
    Ok(hasher()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет удачную проверку корректного секрета.
    #[test]
    fn test_hash_and_verify() {
        let hash = hash_secret("broker-password").unwrap();
        assert!(verify_secret("broker-password", &hash).unwrap());
    }

    /// Тест проверяет отказ для неверного секрета.
    #[test]
    fn test_wrong_secret() {
        let hash = hash_secret("broker-password").unwrap();
        assert!(!verify_secret("other", &hash).unwrap());
    }

    /// Тест проверяет, что битый хеш — это ошибка.
    #[test]
    fn test_invalid_hash() {
        assert!(verify_secret("x", "not-a-phc-hash").is_err());
    }
}
