mod common;

use common::{ create_document, text_steps, wait_until, Call, Harness, Step };
use roboki_studio::models::document::{ CanvasTool, DocumentId };
use roboki_studio::models::source::Source;
use roboki_studio::models::websocket::ServerMessage;
use roboki_studio::studio::{ SessionOutcome, StudioError, StudioPhase, VISUALIZATION_ERROR_MARKUP };
use roboki_studio::workspace::WorkspaceError;

#[tokio::test]
async fn content_accumulates_fragment_by_fragment() {
    let mut h = Harness::new();
    h.client.push_decision(create_document("Doc", "A doc", "ok"));
    h.client.push_text(text_steps(&["a", "b", "c"]));

    h.workspace.send_message("write").await.unwrap();

    let contents: Vec<String> = h
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            ServerMessage::ContentUpdated { content, .. } => Some(content),
            _ => None,
        })
        .collect();
    assert_eq!(contents, vec!["a", "ab", "abc"]);

    let current = h.workspace.studio().current_document().await.unwrap();
    let stored = h.workspace.registry().get(&current.id).await.unwrap();
    assert_eq!(current.content, "abc");
    assert_eq!(stored.content, "abc");
    assert!(!h.workspace.studio().is_streaming().await);
}

#[tokio::test]
async fn infographic_markup_loses_its_fences() {
    let h = Harness::new();
    let doc = h.workspace.new_canvas().await;
    h.client.push_markup(text_steps(&["```html\n<!DOCTYPE", " html><body>X</body></html>\n```"]));

    let outcome = h.workspace
        .generate_visualization(&doc.id, "Some content", CanvasTool::Infographic).await
        .unwrap();

    assert_eq!(outcome, SessionOutcome::Completed);
    let expected = "<!DOCTYPE html><body>X</body></html>";
    let stored = h.workspace.registry().get(&doc.id).await.unwrap();
    assert_eq!(stored.generated_html, expected);
    let current = h.workspace.studio().current_document().await.unwrap();
    assert_eq!(current.generated_html, expected);
    assert!(!h.workspace.studio().is_generating().await);
}

#[tokio::test]
async fn visualization_uses_attached_sources() {
    let h = Harness::new();
    let doc = h.workspace.new_canvas().await;
    h.workspace.add_source(Source::new("img.png", "image/png", vec![0, 1])).await;
    h.client.push_markup(text_steps(&["<p>ok</p>"]));

    h.workspace.generate_visualization(&doc.id, "body", CanvasTool::MindMap).await.unwrap();

    assert_eq!(h.client.calls(), vec![Call::StreamVisualization {
        content: "body".into(),
        tool: CanvasTool::MindMap,
        sources: 1,
    }]);
}

#[tokio::test]
async fn stale_visualization_changes_nothing() {
    let mut h = Harness::new();
    let first = h.workspace.new_canvas().await;
    let second = h.workspace.new_canvas().await;
    h.drain();

    let outcome = h.workspace
        .generate_visualization(&first.id, "text", CanvasTool::Quiz).await
        .unwrap();

    assert_eq!(outcome, SessionOutcome::Stale);
    assert!(!h.workspace.studio().is_generating().await);
    assert!(h.client.calls().is_empty());
    assert!(h.drain().is_empty());
    assert_eq!(h.workspace.studio().current_document().await.unwrap().id, second.id);
    assert!(h.workspace.registry().get(&first.id).await.unwrap().generated_html.is_empty());
}

#[tokio::test]
async fn failed_visualization_stores_error_markup() {
    let h = Harness::new();
    let doc = h.workspace.new_canvas().await;
    h.client.push_markup(vec![Step::Text("<div>".into()), Step::Fail]);

    let outcome = h.workspace
        .generate_visualization(&doc.id, "text", CanvasTool::Flashcards).await
        .unwrap();

    assert_eq!(outcome, SessionOutcome::Failed);
    let stored = h.workspace.registry().get(&doc.id).await.unwrap();
    assert_eq!(stored.generated_html, VISUALIZATION_ERROR_MARKUP);
    assert!(!h.workspace.studio().is_generating().await);
}

#[tokio::test]
async fn studio_rejects_work_while_streaming() {
    let h = Harness::new();
    h.client.push_decision(create_document("Slow", "slow doc", "ok"));
    h.client.push_text(vec![Step::Text("first".into()), Step::Wait, Step::Text(" second".into())]);

    let workspace = h.workspace.clone();
    let turn = tokio::spawn(async move { workspace.send_message("slow please").await });

    let studio = h.workspace.studio().clone();
    wait_until(|| {
        let studio = studio.clone();
        async move { studio.is_streaming().await }
    }).await;

    let doc = h.workspace.studio().current_document().await.unwrap();
    let busy = h.workspace.generate_visualization(&doc.id, "x", CanvasTool::Infographic).await;
    assert!(
        matches!(busy, Err(WorkspaceError::Studio(StudioError::Busy(StudioPhase::Streaming { .. }))))
    );

    let edit = h.workspace.edit_content("mine").await;
    assert!(matches!(edit, Err(WorkspaceError::Studio(StudioError::Busy(_)))));

    h.client.release();
    turn.await.unwrap().unwrap();

    let stored = h.workspace.registry().get(&doc.id).await.unwrap();
    assert_eq!(stored.content, "first second");
    assert!(stored.generated_html.is_empty());
}

#[tokio::test]
async fn edits_reach_the_registry() {
    let h = Harness::new();
    let doc = h.workspace.new_canvas().await;

    let edited = h.workspace.edit_content("hand written").await.unwrap();

    assert_eq!(edited, doc.id);
    assert_eq!(h.workspace.registry().get(&doc.id).await.unwrap().content, "hand written");
}

#[tokio::test]
async fn editing_without_a_document_fails() {
    let h = Harness::new();
    let result = h.workspace.edit_content("orphan").await;
    assert!(matches!(result, Err(WorkspaceError::Studio(StudioError::NoActiveDocument))));
}

#[tokio::test]
async fn opening_documents_by_id() {
    let h = Harness::new();
    let first = h.workspace.new_canvas().await;
    h.workspace.new_canvas().await;

    let opened = h.workspace.open_document(&first.id).await.unwrap();
    assert_eq!(opened.id, first.id);
    assert_eq!(h.workspace.studio().current_document().await.unwrap().id, first.id);

    let missing = h.workspace.open_document(&DocumentId::from("doc_999")).await;
    assert!(matches!(missing, Err(WorkspaceError::UnknownDocument(_))));
}

#[tokio::test]
async fn new_chat_resets_everything_without_reusing_ids() {
    let h = Harness::new();
    let before = h.workspace.new_canvas().await;
    h.workspace.add_source(Source::new("a.txt", "text/plain", b"a".to_vec())).await;

    h.workspace.new_chat().await;

    assert!(h.workspace.registry().is_empty().await);
    assert!(h.workspace.studio().current_document().await.is_none());
    assert!(h.workspace.conversation().sources().await.is_empty());

    let after = h.workspace.new_canvas().await;
    assert_ne!(after.id, before.id);
}

#[tokio::test]
async fn same_fragments_give_same_content() {
    let h = Harness::new();
    for title in ["One", "Two"] {
        h.client.push_decision(create_document(title, "same body", "ok"));
        h.client.push_text(text_steps(&["Hello", ", ", "world"]));
    }

    h.workspace.send_message("first").await.unwrap();
    h.workspace.send_message("second").await.unwrap();

    let docs = h.workspace.registry().list().await;
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].title, "One");
    assert_eq!(docs[0].content, "Hello, world");
    assert_eq!(docs[0].content, docs[1].content);
}

#[tokio::test]
async fn studio_returns_to_idle_when_a_visualization_panics() {
    let mut h = Harness::new();
    let doc = h.workspace.new_canvas().await;
    h.client.panic_on_next_stream();

    let workspace = h.workspace.clone();
    let id = doc.id.clone();
    let result = tokio::spawn(async move {
        workspace.generate_visualization(&id, "text", CanvasTool::Quiz).await
    }).await;
    assert!(result.unwrap_err().is_panic());

    assert_eq!(h.workspace.studio().phase().await, StudioPhase::Idle);
    assert_eq!(h.drain().last(), Some(&ServerMessage::Generating { active: false }));

    h.client.push_markup(text_steps(&["<p>second try</p>"]));
    let outcome = h.workspace
        .generate_visualization(&doc.id, "text", CanvasTool::Quiz).await
        .unwrap();
    assert_eq!(outcome, SessionOutcome::Completed);
}
