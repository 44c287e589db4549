//! HTTP/WebSocket Handlers

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Json,
};
use futures::{SinkExt, StreamExt};
use pocket_core::{Orchestrator, SessionId, ToolDescriptor};
use pocket_wallet::WALLET_FACT;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::{ClientEvent, ServerEvent};
use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub providers: usize,
    pub tools: usize,
    pub sessions: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let orch = &state.orchestrator;
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        providers: orch.registry().len(),
        tools: orch.tools().len(),
        sessions: orch.sessions().len(),
    })
}

/// Aggregated tool catalog
pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolDescriptor>> {
    Json(state.orchestrator.tools().to_vec())
}

/// One websocket = one session
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let orch = state.orchestrator;
    let session = SessionId::new();
    orch.open_session(&session);
    tracing::info!(session_id = %session, "WebSocket connected");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let writer = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            if sender.send(Message::Text(event.to_json().into())).await.is_err() {
                break;
            }
        }
    });

    let _ = out_tx.send(ServerEvent::Connected {
        session_id: session.to_string(),
        tools: orch.tool_names(),
    });

    let mut queries: Vec<JoinHandle<()>> = Vec::new();
    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!(session_id = %session, error = %e, "WebSocket error");
                break;
            }
            _ => continue,
        };

        let event: ClientEvent = match serde_json::from_str(text.as_str()) {
            Ok(event) => event,
            Err(e) => {
                let _ = out_tx.send(ServerEvent::error(format!("Invalid message: {}", e)));
                continue;
            }
        };

        queries.retain(|task| !task.is_finished());
        if let ClientEvent::Query { text } = event {
            let (orch, session, out_tx) = (Arc::clone(&orch), session.clone(), out_tx.clone());
            queries.push(tokio::spawn(async move {
                run_query(&orch, &session, &text, &out_tx).await;
            }));
        } else {
            dispatch(&orch, &session, event, &out_tx).await;
        }
    }

    for task in queries {
        task.abort();
    }
    orch.close_session(&session);
    drop(out_tx);
    let _ = writer.await;
    tracing::info!(session_id = %session, "WebSocket closed");
}

/// Answer a non-query client event
pub async fn dispatch(orch: &Orchestrator, session: &SessionId, event: ClientEvent, out: &mpsc::UnboundedSender<ServerEvent>) {
    let reply = match event {
        ClientEvent::Query { text } => {
            run_query(orch, session, &text, out).await;
            return;
        }
        ClientEvent::GetHistory => ServerEvent::History {
            exchanges: orch.history(session),
        },
        ClientEvent::ClearHistory => {
            orch.clear_history(session);
            ServerEvent::HistoryCleared
        }
        ClientEvent::GetWallet => ServerEvent::Wallet {
            address: orch.fact(session, WALLET_FACT),
        },
        ClientEvent::ClearWallet => {
            orch.forget_fact(session, WALLET_FACT);
            ServerEvent::Wallet { address: None }
        }
    };
    let _ = out.send(reply);
}

/// Run a query, forwarding loop progress as it happens
pub async fn run_query(orch: &Orchestrator, session: &SessionId, text: &str, out: &mpsc::UnboundedSender<ServerEvent>) {
    let _ = out.send(ServerEvent::Processing);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let forward = async {
        while let Some(event) = rx.recv().await {
            let _ = out.send(ServerEvent::from(event));
        }
    };
    let query = async move {
        let result = orch.handle_query(session, text, Some(&tx)).await;
        drop(tx);
        result
    };

    let ((), result) = tokio::join!(forward, query);
    let reply = match result {
        Ok(outcome) => ServerEvent::from(outcome),
        Err(e) => {
            tracing::warn!(session_id = %session, error = %e, "Query failed");
            ServerEvent::error(e.user_message())
        }
    };
    let _ = out.send(reply);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pocket_core::registry::ProviderEndpoint;
    use pocket_core::testing::{text_turn, tool_turn, ScriptedProvider, StaticConnector, StaticToolProvider};
    use pocket_core::{AgentError, ProviderRegistry, Settings};
    use pocket_wallet::{wallet_profile, BASE_PROMPT};
    use serde_json::json;

    const ADDRESS: &str = "Bo4oqCAaB7SGjrEg8EjFBAWrNmiAuUJ3MFmkcKrC4hSC";

    async fn orchestrator(llm: ScriptedProvider) -> Orchestrator {
        let connector = StaticConnector::new().with_provider(
            "wallet",
            StaticToolProvider::new("wallet")
                .with_tool("check-balance")
                .with_response("check-balance", "Balance: 2.5 SOL"),
        );
        let mut registry = ProviderRegistry::new();
        registry
            .register(&connector, &ProviderEndpoint::new("wallet", "node", vec![]))
            .await
            .unwrap();
        Orchestrator::new(
            Arc::new(llm),
            Arc::new(registry),
            Arc::new(wallet_profile().unwrap()),
            &Settings::default(),
            BASE_PROMPT,
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_query_event_sequence() {
        let orch = orchestrator(
            ScriptedProvider::new()
                .reply(tool_turn(&[("t1", "check-balance", json!({}))]))
                .reply(text_turn("You have 2.5 SOL.")),
        )
        .await;
        let session = SessionId::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let query = format!("wallet {} balance?", ADDRESS);
        run_query(&orch, &session, &query, &tx).await;
        let events = drain(&mut rx);

        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                ServerEvent::Processing => "processing",
                ServerEvent::Thinking { .. } => "thinking",
                ServerEvent::ToolCalled { .. } => "tool_called",
                ServerEvent::ToolResult { .. } => "tool_result",
                ServerEvent::Response { .. } => "response",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["processing", "thinking", "tool_called", "tool_result", "thinking", "response"]
        );

        match &events[2] {
            ServerEvent::ToolCalled { arguments, .. } => assert_eq!(arguments["owner"], ADDRESS),
            other => panic!("unexpected {:?}", other),
        }
        match events.last().unwrap() {
            ServerEvent::Response { text, iterations, .. } => {
                assert_eq!(text, "You have 2.5 SOL.");
                assert_eq!(*iterations, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_query_sends_safe_error() {
        let orch = orchestrator(ScriptedProvider::new().fail(AgentError::Auth("bad key sk-123".into()))).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        run_query(&orch, &SessionId::new(), "hi", &tx).await;
        let events = drain(&mut rx);

        match events.last().unwrap() {
            ServerEvent::Error { message } => {
                assert_eq!(message, "Authentication with the AI service failed.");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_answer_during_query() {
        let orch = Arc::new(
            orchestrator(
                ScriptedProvider::new()
                    .reply(text_turn("You have 2.5 SOL."))
                    .with_delay(std::time::Duration::from_secs(30)),
            )
            .await,
        );
        let session = SessionId::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let running = {
            let (orch, session, tx) = (orch.clone(), session.clone(), tx.clone());
            tokio::spawn(async move {
                run_query(&orch, &session, &format!("balance of {}?", ADDRESS), &tx).await;
            })
        };
        for _ in 0..100 {
            if orch.fact(&session, WALLET_FACT).is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        drain(&mut rx);

        dispatch(&orch, &session, ClientEvent::GetHistory, &tx).await;
        dispatch(&orch, &session, ClientEvent::GetWallet, &tx).await;
        assert_eq!(
            drain(&mut rx),
            vec![
                ServerEvent::History { exchanges: vec![] },
                ServerEvent::Wallet { address: Some(ADDRESS.into()) },
            ]
        );
        assert!(!running.is_finished());

        running.await.unwrap();
        assert_eq!(orch.history(&session).len(), 1);
    }

    #[tokio::test]
    async fn test_history_and_wallet_commands() {
        let orch = orchestrator(ScriptedProvider::new().reply(text_turn("Noted."))).await;
        let session = SessionId::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        dispatch(&orch, &session, ClientEvent::Query { text: format!("I am {}", ADDRESS) }, &tx).await;
        drain(&mut rx);

        dispatch(&orch, &session, ClientEvent::GetWallet, &tx).await;
        assert_eq!(drain(&mut rx), vec![ServerEvent::Wallet { address: Some(ADDRESS.into()) }]);

        dispatch(&orch, &session, ClientEvent::GetHistory, &tx).await;
        match &drain(&mut rx)[0] {
            ServerEvent::History { exchanges } => assert_eq!(exchanges[0].response, "Noted."),
            other => panic!("unexpected {:?}", other),
        }

        dispatch(&orch, &session, ClientEvent::ClearHistory, &tx).await;
        assert_eq!(drain(&mut rx), vec![ServerEvent::HistoryCleared]);
        assert!(orch.history(&session).is_empty());

        dispatch(&orch, &session, ClientEvent::ClearWallet, &tx).await;
        assert_eq!(drain(&mut rx), vec![ServerEvent::Wallet { address: None }]);
        assert_eq!(orch.fact(&session, WALLET_FACT), None);
    }
}
