//! Registration, login and logout of stored users.

use std::sync::Arc;

use uuid::Uuid;

use trellis_core::{HasIdentity, OgmError, Result};
use trellis_graph::{GraphStore, GraphTxn};
use trellis_ogm::{Mapper, Repository, Session};

use crate::roles::Role;
use crate::token::TokenStore;
use crate::user::User;

const BAD_CREDENTIALS: &str = "wrong username or password";

pub struct Accounts {
    users: Repository<User>,
    tokens: Arc<dyn TokenStore>,
    cost: u32,
}

impl Accounts {
    pub fn new<S: GraphStore>(mapper: &Mapper<S>, tokens: Arc<dyn TokenStore>) -> Result<Self> {
        Ok(Self {
            users: mapper.repository::<User>()?,
            tokens,
            cost: mapper.config().bcrypt_cost,
        })
    }

    pub fn users(&self) -> &Repository<User> {
        &self.users
    }

    /// Store a new user with role [`Role::User`] and a hashed password.
    pub async fn register<T: GraphTxn>(&self, session: &mut Session<T>, user: &mut User) -> Result<()> {
        user.role = Some(Role::User);
        if !user.is_persisted() {
            let password = user
                .password
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| OgmError::MissingRequiredField {
                    entity: "User".to_string(),
                    field: "password".to_string(),
                })?;
            let hash = bcrypt::hash(password, self.cost)
                .map_err(|e| OgmError::Internal(format!("password hashing failed: {e}")))?;
            user.password = Some(hash);
        }
        self.users.save_one(session, user).await
    }

    /// Verify credentials and hand out the user's access token, issuing one
    /// on first login.
    pub async fn login<T: GraphTxn>(&self, session: &mut Session<T>, login: &str, password: &str) -> Result<User> {
        let found = self.users.search().where_eq("login", login).single(session).await?;
        let Some(mut user) = found else {
            return Err(OgmError::NotAuthorized(BAD_CREDENTIALS.to_string()));
        };
        let verified = user
            .password
            .as_deref()
            .is_some_and(|hash| bcrypt::verify(password, hash).unwrap_or(false));
        if !verified {
            return Err(OgmError::NotAuthorized(BAD_CREDENTIALS.to_string()));
        }

        let token = user
            .access_token
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        self.tokens.issue(&token);
        // The stored hash stays as it is.
        user.password = None;
        self.users.save_one(session, &mut user).await?;
        tracing::info!(user = %user.identity, "Logged in");
        Ok(user)
    }

    pub async fn logout<T: GraphTxn>(&self, session: &mut Session<T>, user: &mut User) -> Result<()> {
        if let Some(token) = user.access_token.take() {
            self.tokens.revoke(&token);
        }
        user.password = None;
        self.users.save_one(session, user).await?;
        tracing::info!(user = %user.identity, "Logged out");
        Ok(())
    }
}
