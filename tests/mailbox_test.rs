//! Mailbox: inbox cap enforcement, broadcast expansion, and
//! read/ack tracking (spec §4.4, §8 boundary behavior "inbox limit > 5").

use swarmmail::domain::models::{EventType, Importance, NewEvent};
use swarmmail::event_log::EventLog;
use swarmmail::mailbox::{InboxOptions, Mailbox, SendOptions};
use swarmmail::store::Store;

async fn register_agent(store: &Store, project: &str, name: &str) {
    let log = EventLog::new(store);
    log.append(NewEvent::new(project.to_string(), EventType::AgentRegistered, serde_json::json!({ "agent_name": name })))
        .await
        .unwrap();
}

#[tokio::test]
async fn inbox_limit_is_clamped_to_max_even_when_caller_asks_for_more() {
    let store = Store::open_in_memory().await.unwrap();
    register_agent(&store, "proj", "alice").await;
    let summarizer = swarmmail::domain::ports::NullSummarizer;
    let mailbox = Mailbox::new(&store, "proj", 5, &summarizer);

    for i in 0..10 {
        mailbox.send("bob", &["alice".to_string()], &format!("subject {i}"), &format!("body {i}"), SendOptions::default()).await.unwrap();
    }

    let headers = mailbox.inbox("alice", InboxOptions { limit: Some(1000), ..Default::default() }).await.unwrap();
    assert_eq!(headers.len(), 5, "the hard cap of 5 must win even when the caller asks for 1000");
}

#[tokio::test]
async fn broadcast_to_star_reaches_every_registered_agent() {
    let store = Store::open_in_memory().await.unwrap();
    register_agent(&store, "proj", "alice").await;
    register_agent(&store, "proj", "bob").await;
    register_agent(&store, "proj", "carol").await;
    let summarizer = swarmmail::domain::ports::NullSummarizer;
    let mailbox = Mailbox::new(&store, "proj", 5, &summarizer);

    mailbox
        .send("coordinator", &["*".to_string()], "status update", "all hands", SendOptions::default())
        .await
        .unwrap();

    for agent in ["alice", "bob", "carol"] {
        let headers = mailbox.inbox(agent, InboxOptions::default()).await.unwrap();
        assert_eq!(headers.len(), 1, "{agent} should have received the broadcast");
    }
}

#[tokio::test]
async fn read_then_ack_round_trips_the_body_sent() {
    let store = Store::open_in_memory().await.unwrap();
    register_agent(&store, "proj", "alice").await;
    let summarizer = swarmmail::domain::ports::NullSummarizer;
    let mailbox = Mailbox::new(&store, "proj", 5, &summarizer);

    mailbox
        .send("bob", &["alice".to_string()], "important", "the exact body bytes", SendOptions { ack_required: true, importance: Importance::Urgent, ..Default::default() })
        .await
        .unwrap();

    let headers = mailbox.inbox("alice", InboxOptions::default()).await.unwrap();
    assert_eq!(headers.len(), 1);
    assert!(headers[0].read_at.is_none());

    let body = mailbox.read(&headers[0].id, "alice").await.unwrap();
    assert_eq!(body, "the exact body bytes");

    mailbox.ack(&headers[0].id, "alice").await.unwrap();

    let after = mailbox.inbox("alice", InboxOptions::default()).await.unwrap();
    assert!(after[0].read_at.is_some());
    assert!(after[0].acked_at.is_some());
}

#[tokio::test]
async fn unread_only_excludes_already_read_messages() {
    let store = Store::open_in_memory().await.unwrap();
    register_agent(&store, "proj", "alice").await;
    let summarizer = swarmmail::domain::ports::NullSummarizer;
    let mailbox = Mailbox::new(&store, "proj", 5, &summarizer);

    mailbox.send("bob", &["alice".to_string()], "one", "first", SendOptions::default()).await.unwrap();
    mailbox.send("bob", &["alice".to_string()], "two", "second", SendOptions::default()).await.unwrap();

    let all = mailbox.inbox("alice", InboxOptions::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    mailbox.read(&all[0].id, "alice").await.unwrap();

    let unread = mailbox.inbox("alice", InboxOptions { unread_only: true, ..Default::default() }).await.unwrap();
    assert_eq!(unread.len(), 1);
    assert_ne!(unread[0].id, all[0].id);
}

#[tokio::test]
async fn thread_summary_aggregates_participants_and_counts() {
    let store = Store::open_in_memory().await.unwrap();
    register_agent(&store, "proj", "alice").await;
    register_agent(&store, "proj", "bob").await;
    let summarizer = swarmmail::domain::ports::NullSummarizer;
    let mailbox = Mailbox::new(&store, "proj", 5, &summarizer);

    mailbox.send("alice", &["bob".to_string()], "kickoff", "let's start", SendOptions { thread_id: Some("epic-1".into()), ..Default::default() }).await.unwrap();
    mailbox.send("bob", &["alice".to_string()], "re: kickoff", "sounds good", SendOptions { thread_id: Some("epic-1".into()), ..Default::default() }).await.unwrap();

    let summary = mailbox.summarize_thread("epic-1").await.unwrap();
    assert_eq!(summary.message_count, 2);
    assert!(summary.participants.contains(&"alice".to_string()));
    assert!(summary.participants.contains(&"bob".to_string()));
}
