use crate::config::User;

use parking_lot::Mutex;
use service::{AuthResult, Authenticator, Identity};

/// Authenticator over the statically configured account list.
///
/// The session identity lives for the life of this instance; identity
/// backends that persist sessions elsewhere implement
/// [`Authenticator`] themselves.
pub struct StaticAuthenticator {
    users: Vec<User>,
    credentials: Mutex<Option<(String, String)>>,
    identity: Mutex<Option<Identity>>,
}

impl StaticAuthenticator {
    pub fn new(users: Vec<User>) -> Self {
        Self {
            users,
            credentials: Mutex::new(None),
            identity: Mutex::new(None),
        }
    }
}

impl Authenticator for StaticAuthenticator {
    fn set_credentials(&self, userid: &str, password: &str) {
        *self.credentials.lock() = Some((userid.to_string(), password.to_string()));
    }

    fn authenticate(&self) -> AuthResult {
        let credentials = self.credentials.lock();
        let Some((userid, password)) = credentials.as_ref() else {
            return AuthResult {
                valid: false,
                identity: None,
                messages: vec!["No credentials supplied".to_string()],
                code: 401,
            };
        };

        let user = self
            .users
            .iter()
            .find(|it| it.userid == *userid && it.password == *password);

        match user {
            Some(user) => {
                let identity = Identity {
                    id: user.userid.clone(),
                    role: user.role.clone(),
                    token: user.token.clone(),
                };

                *self.identity.lock() = Some(identity.clone());
                AuthResult {
                    valid: true,
                    identity: Some(identity),
                    messages: Vec::new(),
                    code: 0,
                }
            }
            None => AuthResult {
                valid: false,
                identity: None,
                messages: vec!["Wrong userid or password".to_string()],
                code: 401,
            },
        }
    }

    fn has_identity(&self) -> bool {
        self.identity.lock().is_some()
    }

    fn get_identity(&self) -> Option<Identity> {
        self.identity.lock().clone()
    }

    fn clear_identity(&self) {
        *self.identity.lock() = None;
    }
}
