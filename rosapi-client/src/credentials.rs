//! Login credentials.

use parking_lot::Mutex;
use std::fmt;
use zeroize::Zeroizing;

/// User name and password for one login attempt.
///
/// The password is wiped from memory when the value is dropped.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: Zeroizing<String>,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Supplies credentials when a connection is ready to log in.
///
/// Called synchronously, once per connection, before the first `/login` is
/// sent. Providers should fetch the password when called rather than keep
/// it. Returning `None` aborts the connection.
pub trait CredentialsProvider: Send + Sync {
    fn credentials(&self) -> Option<Credentials>;
}

impl<F> CredentialsProvider for F
where
    F: Fn() -> Option<Credentials> + Send + Sync,
{
    fn credentials(&self) -> Option<Credentials> {
        self()
    }
}

/// Hands out its credentials to the first caller only.
///
/// Suits clients that log in once: after the handshake nothing keeps the
/// password.
pub struct OneShotCredentials {
    slot: Mutex<Option<Credentials>>,
}

impl OneShotCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            slot: Mutex::new(Some(credentials)),
        }
    }

    /// Returns whether the credentials have been handed out.
    pub fn is_spent(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl CredentialsProvider for OneShotCredentials {
    fn credentials(&self) -> Option<Credentials> {
        self.slot.lock().take()
    }
}

impl fmt::Debug for OneShotCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneShotCredentials")
            .field("spent", &self.is_spent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("admin", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_closure_provider() {
        let provider = || Some(Credentials::new("api", "pw"));
        let creds = provider.credentials().unwrap();
        assert_eq!(creds.user, "api");
        assert_eq!(creds.password.as_str(), "pw");
    }

    #[test]
    fn test_one_shot_hands_out_once() {
        let provider = Arc::new(OneShotCredentials::new(Credentials::new("api", "pw")));
        assert!(!provider.is_spent());

        let creds = provider.credentials().unwrap();
        assert_eq!(creds.password.as_str(), "pw");
        assert!(provider.is_spent());
        assert!(provider.credentials().is_none());
        assert!(!format!("{:?}", provider).contains("pw"));
    }
}
