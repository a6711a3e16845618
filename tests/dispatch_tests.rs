mod common;

use common::{ create_document, text_steps, wait_until, Harness, Step };
use roboki_studio::models::document::{ CanvasTool, DocumentId };
use roboki_studio::models::source::Source;
use roboki_studio::models::websocket::{ ClientMessage, ServerMessage };
use roboki_studio::server::websocket::dispatch;
use tokio::task::JoinSet;

fn errors(events: &[ServerMessage]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerMessage::Error { message } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

async fn send(h: &Harness, tasks: &mut JoinSet<()>, json: &str) {
    let command: ClientMessage = serde_json::from_str(json).unwrap();
    dispatch(&h.workspace, &h.bus, tasks, command).await;
}

#[tokio::test]
async fn invalid_source_payload_reports_an_error() {
    let mut h = Harness::new();
    let mut tasks = JoinSet::new();

    send(&h, &mut tasks, r#"{"type":"add_source","name":"a.pdf","mime_type":"application/pdf","data":"%%%"}"#).await;

    let events = h.drain();
    let errors = errors(&events);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Invalid source data"));
    assert!(h.workspace.conversation().sources().await.is_empty());
}

#[tokio::test]
async fn valid_source_payload_is_attached() {
    let mut h = Harness::new();
    let mut tasks = JoinSet::new();

    send(&h, &mut tasks, r#"{"type":"add_source","name":"a.txt","mime_type":"text/plain","data":"data:text/plain;base64,aGk="}"#).await;

    let sources = h.workspace.conversation().sources().await;
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].data, b"hi");
    assert!(
        h.drain()
            .iter()
            .any(|e| matches!(e, ServerMessage::SourcesChanged { sources } if sources.len() == 1))
    );
}

#[tokio::test]
async fn unknown_document_reports_an_error() {
    let mut h = Harness::new();
    let mut tasks = JoinSet::new();

    send(&h, &mut tasks, r#"{"type":"open_document","document_id":"doc_42"}"#).await;

    let errors = errors(&h.drain());
    assert_eq!(errors, vec!["unknown document 'doc_42'".to_string()]);
    assert!(h.workspace.studio().current_document().await.is_none());
}

#[tokio::test]
async fn edit_without_document_reports_an_error() {
    let mut h = Harness::new();
    let mut tasks = JoinSet::new();

    send(&h, &mut tasks, r#"{"type":"edit_content","content":"x"}"#).await;

    assert_eq!(errors(&h.drain()).len(), 1);
}

#[tokio::test]
async fn commands_are_served_while_a_turn_runs() {
    let mut h = Harness::new();
    let mut tasks = JoinSet::new();
    h.workspace.add_source(Source::new("a.txt", "text/plain", b"a".to_vec())).await;
    h.workspace.add_source(Source::new("b.txt", "text/plain", b"b".to_vec())).await;
    let canvas = h.workspace.new_canvas().await;

    h.client.push_decision(create_document("Long", "long doc", "ok"));
    h.client.push_text(vec![Step::Text("part".into()), Step::Wait]);
    send(&h, &mut tasks, r#"{"type":"send_message","content":"write it"}"#).await;

    let conversation = h.workspace.conversation().clone();
    wait_until(|| {
        let conversation = conversation.clone();
        async move { conversation.is_loading().await }
    }).await;

    // The turn is parked on the stream; the reader keeps going.
    send(&h, &mut tasks, r#"{"type":"remove_source","index":0}"#).await;
    let sources = h.workspace.conversation().sources().await;
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].name, "b.txt");

    let command = ClientMessage::OpenDocument { document_id: canvas.id.clone() };
    dispatch(&h.workspace, &h.bus, &mut tasks, command).await;
    send(&h, &mut tasks, r#"{"type":"edit_content","content":"notes"}"#).await;
    assert_eq!(h.workspace.registry().get(&canvas.id).await.unwrap().content, "notes");

    h.client.release();
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }
    assert!(!h.workspace.conversation().is_loading().await);
    assert_eq!(h.workspace.registry().len().await, 2);
    assert!(errors(&h.drain()).is_empty());
}

#[tokio::test]
async fn visualization_runs_on_the_task_set() {
    let mut h = Harness::new();
    let mut tasks = JoinSet::new();
    let doc = h.workspace.new_canvas().await;
    h.client.push_markup(vec![Step::Text("```html\n<p>".into()), Step::Wait, Step::Text("x</p>\n```".into())]);

    let command = ClientMessage::GenerateVisualization {
        document_id: doc.id.clone(),
        content: "body".into(),
        tool: CanvasTool::Flashcards,
    };
    dispatch(&h.workspace, &h.bus, &mut tasks, command).await;
    assert_eq!(tasks.len(), 1);

    let studio = h.workspace.studio().clone();
    wait_until(|| {
        let studio = studio.clone();
        async move { studio.is_generating().await }
    }).await;

    // A second request while generating is refused through the error channel.
    let again = ClientMessage::GenerateVisualization {
        document_id: doc.id.clone(),
        content: "body".into(),
        tool: CanvasTool::Flashcards,
    };
    dispatch(&h.workspace, &h.bus, &mut tasks, again).await;

    h.client.release();
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    let stored = h.workspace.registry().get(&doc.id).await.unwrap();
    assert_eq!(stored.generated_html, "<p>x</p>");
    let errors = errors(&h.drain());
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("busy"));
}

#[tokio::test]
async fn new_chat_resets_the_session() {
    let mut h = Harness::new();
    let mut tasks = JoinSet::new();
    h.client.push_decision(create_document("Doc", "a doc", "ok"));
    h.client.push_text(text_steps(&["body"]));
    h.workspace.send_message("make a doc").await.unwrap();
    h.drain();

    send(&h, &mut tasks, r#"{"type":"new_chat"}"#).await;

    let events = h.drain();
    assert!(events.contains(&ServerMessage::ChatCleared));
    assert!(events.contains(&ServerMessage::StudioCleared));
    assert!(h.workspace.registry().is_empty().await);
    assert!(h.workspace.open_document(&DocumentId::from("doc_1")).await.is_err());
}
