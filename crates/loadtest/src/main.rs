use goose::prelude::*;
use std::env;

async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose_metrics = user.get("/healthz").await?;
    Ok(())
}

async fn discovery(user: &mut GooseUser) -> TransactionResult {
    let _goose_metrics = user.get("/.well-known/openid-configuration").await?;
    Ok(())
}

async fn list_downloads(user: &mut GooseUser) -> TransactionResult {
    let _goose_metrics = user.get("/api/downloads").await?;
    Ok(())
}

async fn public_profile(user: &mut GooseUser) -> TransactionResult {
    let username = env::var("PROFILE_USERNAME").unwrap_or_else(|_| "admin".to_string());
    let _goose_metrics = user.get(&format!("/api/users/{username}")).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    if let Ok(username) = env::var("PROFILE_USERNAME") {
        println!("Public profile used for API calls: {username}");
    } else {
        println!("No PROFILE_USERNAME set, requesting the 'admin' profile");
    }

    GooseAttack::initialize()?
        .register_scenario(
            scenario!("HealthCheck").register_transaction(transaction!(health_check)),
        )
        .register_scenario(
            scenario!("PublicPages")
                .register_transaction(transaction!(discovery))
                .register_transaction(transaction!(list_downloads))
                .register_transaction(transaction!(public_profile)),
        )
        .execute()
        .await?;

    Ok(())
}
