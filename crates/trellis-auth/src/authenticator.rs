//! Bearer-token authentication and role checks.

use std::sync::Arc;

use uuid::Uuid;

use trellis_core::{OgmError, Result};
use trellis_graph::GraphStore;
use trellis_ogm::{Mapper, Repository};

use crate::roles::Role;
use crate::token::TokenStore;
use crate::user::User;

/// Token accepted without lookup, mapping to an anonymous [`Role::Public`] user.
pub const PUBLIC_TOKEN: &str = "public";

pub struct Authenticator<S: GraphStore> {
    mapper: Mapper<S>,
    users: Repository<User>,
    tokens: Arc<dyn TokenStore>,
}

impl<S: GraphStore> Authenticator<S> {
    pub fn new(mapper: Mapper<S>, tokens: Arc<dyn TokenStore>) -> Result<Self> {
        let users = mapper.repository::<User>()?;
        Ok(Self { mapper, users, tokens })
    }

    /// Resolve a bearer token to its user. `Ok(None)` means unauthenticated.
    pub async fn authenticate(&self, token: &str) -> Result<Option<User>> {
        if token == PUBLIC_TOKEN {
            return Ok(Some(User::public()));
        }
        if Uuid::parse_str(token).is_err() {
            tracing::debug!("Rejected malformed access token");
            return Ok(None);
        }

        let mut session = self.mapper.session().await?;
        let user = self
            .users
            .search()
            .where_eq("access_token", token)
            .single(&mut session)
            .await?;
        session.commit().await?;

        let Some(user) = user else {
            tracing::debug!("No user holds the access token");
            return Ok(None);
        };
        if !self.tokens.touch(token) {
            return Ok(None);
        }
        Ok(Some(user))
    }
}

/// Whether `user` holds `role` or a role that includes it.
pub fn authorize(user: &User, role: Role) -> bool {
    user.role().includes(role)
}

/// Like [`authorize`], as an error for callers that propagate with `?`.
pub fn require(user: Option<&User>, role: Role) -> Result<()> {
    match user {
        None => Err(OgmError::NotAuthorized("authentication required".to_string())),
        Some(user) if authorize(user, role) => Ok(()),
        Some(_) => Err(OgmError::Forbidden {
            required: role.to_string(),
        }),
    }
}
