//! Аутентификация: одна глобальная пара логин/пароль.
//!
//! Брокер хранит только солёные argon2-хеши обеих половин пары.
//! Проверка дорогая, поэтому выполняется на блокирующем пуле и
//! приостанавливает только задачу своего соединения.

pub mod password;

pub use password::{hash_secret, verify_secret, PasswordError};

/// Учётные данные брокера в хешированном виде.
#[derive(Debug, Clone)]
pub struct Credentials {
    username_hash: String,
    password_hash: String,
}

impl Credentials {
    /// Хеширует пару открытых учётных данных.
    pub fn new(
        username: &str,
        password: &str,
    ) -> Result<Self, PasswordError> {
        Ok(Self {
            username_hash: hash_secret(username)?,
            password_hash: hash_secret(password)?,
        })
    }

    /// Сверяет присланную пару с сохранёнными хешами.
    ///
    /// Выполняется на `spawn_blocking`: вызывающая задача
    /// приостанавливается, остальные соединения не блокируются.
    pub async fn verify(
        &self,
        username: String,
        password: String,
    ) -> Result<bool, PasswordError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            Ok(verify_secret(&username, &this.username_hash)?
                && verify_secret(&password, &this.password_hash)?)
        })
        .await
        .map_err(|_| PasswordError::Verify)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что пара принимается целиком, а любая
    /// неверная половина отклоняется.
    #[tokio::test]
    async fn test_credentials_verify() {
        let creds = Credentials::new("user", "pass").unwrap();
        assert!(creds.verify("user".into(), "pass".into()).await.unwrap());
        assert!(!creds.verify("user".into(), "nope".into()).await.unwrap());
        assert!(!creds.verify("nope".into(), "pass".into()).await.unwrap());
    }

    /// Тест проверяет, что в структуре нет открытых секретов.
    #[test]
    fn test_stores_hashes_only() {
        let creds = Credentials::new("user", "pass").unwrap();
        assert!(creds.username_hash.starts_with("$argon2id$"));
        assert!(creds.password_hash.starts_with("$argon2id$"));
        assert_ne!(creds.username_hash, "user");
        assert_ne!(creds.password_hash, "pass");
    }
}
