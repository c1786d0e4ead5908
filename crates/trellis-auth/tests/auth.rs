//! Account lifecycle against the embedded graph.

use std::sync::Arc;

use chrono::{Duration, Utc};

use trellis_auth::{authorize, Accounts, Authenticator, ManualClock, MemoryTokenStore, Role, TokenStore, User};
use trellis_core::config::TrellisConfig;
use trellis_core::{ErrorKind, HasIdentity, Registry};
use trellis_graph::MemoryGraph;
use trellis_ogm::Mapper;

struct Fixture {
    mapper: Mapper<MemoryGraph>,
    clock: Arc<ManualClock>,
    tokens: Arc<MemoryTokenStore>,
    accounts: Accounts,
    auth: Authenticator<MemoryGraph>,
}

fn fixture() -> Fixture {
    let config = TrellisConfig {
        bcrypt_cost: 4,
        ..TrellisConfig::default()
    };
    let mapper = Mapper::with_config(MemoryGraph::new(), config).with_registry(Arc::new(Registry::new()));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let tokens = Arc::new(MemoryTokenStore::new(Duration::minutes(30), clock.clone()));
    let accounts = Accounts::new(&mapper, tokens.clone()).unwrap();
    let auth = Authenticator::new(mapper.clone(), tokens.clone()).unwrap();
    Fixture {
        mapper,
        clock,
        tokens,
        accounts,
        auth,
    }
}

async fn register_and_login(f: &Fixture, login: &str, password: &str) -> User {
    let mut session = f.mapper.session().await.unwrap();
    let mut user = User::new(login, password);
    f.accounts.register(&mut session, &mut user).await.unwrap();
    assert!(user.is_persisted());
    assert_ne!(user.password.as_deref(), Some(password));
    session.commit().await.unwrap();

    let mut session = f.mapper.session().await.unwrap();
    let user = f.accounts.login(&mut session, login, password).await.unwrap();
    session.commit().await.unwrap();
    user
}

#[tokio::test]
async fn token_lives_thirty_minutes_after_last_use() {
    let f = fixture();
    let user = register_and_login(&f, "rick", "wubba-lubba").await;
    let token = user.access_token.clone().unwrap();

    f.clock.advance(Duration::minutes(29));
    let found = f.auth.authenticate(&token).await.unwrap().unwrap();
    assert_eq!(found.login.as_deref(), Some("rick"));
    assert_eq!(found.role(), Role::User);

    f.clock.advance(Duration::minutes(31));
    assert!(f.auth.authenticate(&token).await.unwrap().is_none());
    assert!(f.auth.authenticate(&token).await.unwrap().is_none());
    assert_eq!(f.tokens.len(), 1);
}

#[tokio::test]
async fn second_login_reuses_the_token() {
    let f = fixture();
    let first = register_and_login(&f, "beth", "horse-surgeon").await;

    let mut session = f.mapper.session().await.unwrap();
    let again = f.accounts.login(&mut session, "beth", "horse-surgeon").await.unwrap();
    session.commit().await.unwrap();
    assert_eq!(again.access_token, first.access_token);
}

#[tokio::test]
async fn public_and_malformed_tokens() {
    let f = fixture();
    let public = f.auth.authenticate("public").await.unwrap().unwrap();
    assert_eq!(public.role(), Role::Public);
    assert!(!public.is_persisted());
    assert!(authorize(&public, Role::Public));
    assert!(!authorize(&public, Role::User));

    assert!(f.auth.authenticate("not-a-uuid").await.unwrap().is_none());
    let stranger = uuid::Uuid::new_v4().to_string();
    assert!(f.auth.authenticate(&stranger).await.unwrap().is_none());
}

#[tokio::test]
async fn stored_token_unknown_to_the_token_store_is_rejected() {
    let f = fixture();
    let user = register_and_login(&f, "jerry", "hungry-for-apples").await;
    let token = user.access_token.unwrap();

    assert!(f.tokens.revoke(&token));
    assert!(f.auth.authenticate(&token).await.unwrap().is_none());
}

#[tokio::test]
async fn logout_revokes_and_clears_the_token() {
    let f = fixture();
    let mut user = register_and_login(&f, "summer", "phone-time").await;
    let token = user.access_token.clone().unwrap();

    let mut session = f.mapper.session().await.unwrap();
    f.accounts.logout(&mut session, &mut user).await.unwrap();
    session.commit().await.unwrap();

    assert!(user.access_token.is_none());
    assert!(f.tokens.is_empty());
    assert!(f.auth.authenticate(&token).await.unwrap().is_none());

    let mut session = f.mapper.session().await.unwrap();
    let stored = f
        .accounts
        .users()
        .search()
        .where_eq("login", "summer")
        .single(&mut session)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.access_token.is_none());
    assert!(stored.password.is_some());
}

#[tokio::test]
async fn bad_credentials_and_missing_password() {
    let f = fixture();
    register_and_login(&f, "morty", "aw-geez").await;

    let mut session = f.mapper.session().await.unwrap();
    let err = f.accounts.login(&mut session, "morty", "oh-man").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAuthorized);
    let err = f.accounts.login(&mut session, "squanchy", "aw-geez").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAuthorized);

    let mut nameless = User::new("birdperson", "");
    let err = f.accounts.register(&mut session, &mut nameless).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingRequiredField);
    assert!(!nameless.is_persisted());
}
