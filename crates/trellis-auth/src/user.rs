//! The stored account that tokens resolve to.

use serde::Serialize;

use trellis_core::{Entity, EntityMapping, FieldDescriptor, HasIdentity, HasRelationships, Identity, Value};

use crate::roles::Role;

#[derive(Debug, Clone, Default, Serialize)]
pub struct User {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    /// Plain text before registration, the bcrypt hash once stored.
    #[serde(skip)]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl User {
    pub fn new(login: &str, password: &str) -> Self {
        Self {
            login: Some(login.to_string()),
            password: Some(password.to_string()),
            ..Self::default()
        }
    }

    /// Anonymous caller presenting the `public` token.
    pub fn public() -> Self {
        Self {
            role: Some(Role::Public),
            ..Self::default()
        }
    }

    pub fn role(&self) -> Role {
        self.role.unwrap_or_default()
    }
}

impl HasIdentity for User {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut Identity {
        &mut self.identity
    }
}

impl HasRelationships for User {}

impl Entity for User {
    const LABEL: &'static str = "User";

    fn mapping() -> EntityMapping {
        EntityMapping::new()
            .field(FieldDescriptor::scalar("login").unique().required())
            .field(FieldDescriptor::scalar("password"))
            .field(FieldDescriptor::scalar("role"))
            .field(FieldDescriptor::scalar("access_token").indexed().null_remove())
    }

    fn property(&self, field: &str) -> Option<Value> {
        match field {
            "login" => self.login.clone().map(Value::from),
            "password" => self.password.clone().map(Value::from),
            "role" => self.role.map(|r| Value::from(r.as_str())),
            "access_token" => self.access_token.clone().map(Value::from),
            _ => None,
        }
    }

    fn set_property(&mut self, field: &str, value: Option<Value>) {
        match field {
            "login" => self.login = value.and_then(Value::into_string),
            "password" => self.password = value.and_then(Value::into_string),
            "role" => self.role = value.and_then(|v| v.as_str().and_then(|s| s.parse().ok())),
            "access_token" => self.access_token = value.and_then(Value::into_string),
            _ => {}
        }
    }
}
