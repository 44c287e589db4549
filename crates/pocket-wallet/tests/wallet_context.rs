//! Wallet address detection flowing into tool arguments across a session

use std::sync::Arc;

use pocket_core::registry::ProviderEndpoint;
use pocket_core::testing::{text_turn, tool_turn, ScriptedProvider, StaticConnector, StaticToolProvider};
use pocket_core::{Orchestrator, ProviderRegistry, SessionId, Settings};
use pocket_wallet::{wallet_profile, BASE_PROMPT, WALLET_FACT};
use serde_json::json;

const ADDRESS: &str = "Bo4oqCAaB7SGjrEg8EjFBAWrNmiAuUJ3MFmkcKrC4hSC";

async fn setup(llm: Arc<ScriptedProvider>) -> (Orchestrator, StaticConnector) {
    let connector = StaticConnector::new().with_provider(
        "wallet",
        StaticToolProvider::new("wallet")
            .with_tool("check-balance")
            .with_response("check-balance", "Balance: 2.5 SOL"),
    );
    let mut registry = ProviderRegistry::new();
    registry
        .register(&connector, &ProviderEndpoint::new("wallet", "node", vec!["wallet.js".into()]))
        .await
        .unwrap();

    let orch = Orchestrator::new(
        llm,
        Arc::new(registry),
        Arc::new(wallet_profile().unwrap()),
        &Settings::default(),
        BASE_PROMPT,
    );
    (orch, connector)
}

#[tokio::test]
async fn address_from_query_fills_missing_owner() {
    let llm = Arc::new(
        ScriptedProvider::new()
            .reply(tool_turn(&[("t1", "check-balance", json!({}))]))
            .reply(text_turn("You have 2.5 SOL.")),
    );
    let (orch, connector) = setup(llm.clone()).await;
    let session = SessionId::new();

    let query = format!("my wallet is {}, what's my balance?", ADDRESS);
    let outcome = orch.handle_query(&session, &query, None).await.unwrap();

    assert_eq!(outcome.text, "You have 2.5 SOL.");
    assert_eq!(outcome.tool_trace[0].arguments["owner"], ADDRESS);

    let calls = connector.provider("wallet").unwrap().calls();
    assert_eq!(calls, vec![("check-balance".to_string(), json!({"owner": ADDRESS}))]);

    assert_eq!(orch.fact(&session, WALLET_FACT).as_deref(), Some(ADDRESS));
    assert!(llm.requests()[0].system.contains(ADDRESS));
    assert!(llm.requests()[0].system.starts_with(BASE_PROMPT));
}

#[tokio::test]
async fn address_persists_for_later_queries() {
    let llm = Arc::new(
        ScriptedProvider::new()
            .reply(text_turn("Noted your wallet."))
            .reply(tool_turn(&[("t2", "check-balance", json!({"owner": ""}))]))
            .reply(text_turn("Still 2.5 SOL.")),
    );
    let (orch, connector) = setup(llm).await;
    let session = SessionId::new();

    orch.handle_query(&session, &format!("remember {}", ADDRESS), None).await.unwrap();
    orch.handle_query(&session, "and my balance now?", None).await.unwrap();

    let calls = connector.provider("wallet").unwrap().calls();
    assert_eq!(calls[0].1["owner"], ADDRESS);
}

#[tokio::test]
async fn explicit_owner_is_kept() {
    let llm = Arc::new(
        ScriptedProvider::new()
            .reply(tool_turn(&[("t1", "check-balance", json!({"owner": "SomeoneElse"}))]))
            .reply(text_turn("They have 2.5 SOL.")),
    );
    let (orch, connector) = setup(llm).await;

    let query = format!("I am {} but check SomeoneElse", ADDRESS);
    orch.handle_query(&SessionId::new(), &query, None).await.unwrap();

    let calls = connector.provider("wallet").unwrap().calls();
    assert_eq!(calls[0].1["owner"], "SomeoneElse");
}

#[tokio::test]
async fn cleared_address_is_not_injected() {
    let llm = Arc::new(
        ScriptedProvider::new()
            .reply(text_turn("Noted."))
            .reply(tool_turn(&[("t1", "check-balance", json!({}))]))
            .reply(text_turn("Which wallet?")),
    );
    let (orch, connector) = setup(llm).await;
    let session = SessionId::new();

    orch.handle_query(&session, &format!("wallet {}", ADDRESS), None).await.unwrap();
    assert_eq!(orch.forget_fact(&session, WALLET_FACT).as_deref(), Some(ADDRESS));
    orch.handle_query(&session, "balance?", None).await.unwrap();

    let calls = connector.provider("wallet").unwrap().calls();
    assert_eq!(calls[0].1, json!({}));
}

#[tokio::test]
async fn sessions_do_not_share_addresses() {
    let llm = Arc::new(
        ScriptedProvider::new()
            .reply(text_turn("Noted."))
            .reply(tool_turn(&[("t1", "check-balance", json!({}))]))
            .reply(text_turn("Which wallet?")),
    );
    let (orch, connector) = setup(llm).await;

    orch.handle_query(&SessionId::new(), &format!("wallet {}", ADDRESS), None)
        .await
        .unwrap();
    let other = SessionId::new();
    orch.handle_query(&other, "balance?", None).await.unwrap();

    assert_eq!(orch.fact(&other, WALLET_FACT), None);
    assert_eq!(connector.provider("wallet").unwrap().calls()[0].1, json!({}));
}
