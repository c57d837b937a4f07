use std::sync::Arc;
use std::time::{Duration, Instant};

use chat_relay::agent::{ReplyPhase, SiteResolution, StreamPhase};
use chat_relay::constants::FINISHED_REPLY_RETENTION_MS;
use chat_relay::dom::{DomWrite, InputEvent, MemoryDom, MutationStream, NodeId};
use chat_relay::{
    AgentSettings, BridgeMessage, EventStream, PageAgent, SiteConfig, SiteConfigStore, SubmitMode,
    event_channel, request_channel,
};

const HOST: &str = "chat.example";

fn site() -> SiteConfig {
    SiteConfig {
        input_selector: "textarea#prompt".into(),
        send_button_selector: "button.send".into(),
        response_container_selector: "#stream".into(),
        bot_reply_container_selector: "div.reply".into(),
        bot_message_text_selector: ".text".into(),
        completion_indicator_selector: ".done".into(),
        submit: SubmitMode::Enter,
    }
}

fn settings() -> AgentSettings {
    AgentSettings {
        poll_interval: Duration::from_millis(1),
        max_attempts: 3,
        completion_timeout: Some(Duration::from_secs(120)),
        sweep_interval: Duration::from_millis(10),
    }
}

fn store_with(dir: &tempfile::TempDir, entries: &[(&str, SiteConfig)]) -> SiteConfigStore {
    let mut store = SiteConfigStore::open(dir.path().join("sites.json")).unwrap();
    for (host, config) in entries {
        store.set(host, config.clone()).unwrap();
    }
    store
}

fn drain(events: &mut EventStream) -> Vec<BridgeMessage> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn responses(events: &[BridgeMessage]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            BridgeMessage::ChatbotResponse { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// A page with an input, a send button and an empty reply stream
struct Page {
    dom: Arc<MemoryDom>,
    mutations: MutationStream,
    input: NodeId,
    button: NodeId,
    stream: NodeId,
}

fn chat_page(host: &str) -> Page {
    let (dom, mutations) = MemoryDom::new(host);
    let input = dom.append_new(dom.root(), "textarea#prompt");
    let button = dom.append_new(dom.root(), "button.send");
    let stream = dom.append_new(dom.root(), "div#stream");
    Page {
        dom: Arc::new(dom),
        mutations,
        input,
        button,
        stream,
    }
}

/// Build a detached reply so that only its final insertion is observed
fn reply(dom: &MemoryDom, text: &str, finished: bool) -> NodeId {
    let reply = dom.create("div.reply");
    let body = dom.create("div.text");
    dom.set_text(body, text);
    dom.append(reply, body);
    if finished {
        let marker = dom.create("span.done");
        dom.append(reply, marker);
    }
    reply
}

async fn pump(agent: &mut PageAgent<MemoryDom>, mutations: &mut MutationStream) {
    while let Ok(batch) = mutations.try_recv() {
        agent.handle_mutations(batch).await;
    }
}

async fn watching_agent(page: &Page, events_dir: &tempfile::TempDir) -> (PageAgent<MemoryDom>, EventStream) {
    let store = store_with(events_dir, &[(HOST, site())]);
    let (outbox, events) = event_channel();
    let mut agent = PageAgent::start(page.dom.clone(), &store, outbox, settings())
        .await
        .unwrap();
    assert!(agent.discover().await);
    (agent, events)
}

#[tokio::test]
async fn missing_configuration_is_announced_once_without_touching_the_page() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&dir, &[("other.example", site())]);
    let page = chat_page(HOST);
    let (outbox, mut events) = event_channel();

    let mut agent = PageAgent::start(page.dom.clone(), &store, outbox, settings())
        .await
        .unwrap();
    assert!(!agent.discover().await);

    assert_eq!(
        drain(&mut events),
        vec![BridgeMessage::NoConfigFound { host: HOST.into() }]
    );
    assert!(page.dom.writes().is_empty());
    assert_eq!(page.dom.query_count(), 0);
    assert_eq!(page.dom.active_observers(), 0);
    assert_eq!(agent.stream_phase(), StreamPhase::AwaitingContainer);

    let ack = agent
        .handle_request(&BridgeMessage::SendChatMessage { text: "hello".into() })
        .await;
    assert_eq!(ack.status, "Error: No site configuration loaded.");
    assert_eq!(
        drain(&mut events),
        vec![BridgeMessage::NoConfigFound { host: HOST.into() }]
    );
    assert!(page.dom.writes().is_empty());
}

#[tokio::test]
async fn incomplete_configuration_names_the_blank_field() {
    let dir = tempfile::tempdir().unwrap();
    let mut incomplete = site();
    incomplete.bot_message_text_selector = " ".into();
    let store = store_with(&dir, &[(HOST, incomplete)]);
    let page = chat_page(HOST);
    let (outbox, mut events) = event_channel();

    let agent = PageAgent::start(page.dom.clone(), &store, outbox, settings())
        .await
        .unwrap();
    assert!(agent.context().site().is_none());

    let events = drain(&mut events);
    assert_eq!(events.len(), 1);
    match &events[0] {
        BridgeMessage::ContentScriptError { message } => {
            assert!(message.contains("botMessageTextSelector"), "{message}");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(page.dom.writes().is_empty());
}

#[tokio::test]
async fn sending_with_an_incomplete_configuration_repeats_the_field_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut incomplete = site();
    incomplete.completion_indicator_selector = String::new();
    let store = store_with(&dir, &[(HOST, incomplete)]);
    let page = chat_page(HOST);
    let (outbox, mut events) = event_channel();

    let mut agent = PageAgent::start(page.dom.clone(), &store, outbox, settings())
        .await
        .unwrap();
    assert!(matches!(
        agent.context().resolution(),
        SiteResolution::Incomplete { .. }
    ));
    drain(&mut events);

    let ack = agent
        .handle_request(&BridgeMessage::SendChatMessage { text: "hello".into() })
        .await;
    assert!(ack.is_error());
    assert!(ack.status.contains("completionIndicatorSelector"), "{}", ack.status);

    match drain(&mut events).as_slice() {
        [BridgeMessage::ContentScriptError { message }] => {
            assert!(message.contains("completionIndicatorSelector"), "{message}");
        }
        other => panic!("unexpected events {other:?}"),
    }
    assert!(page.dom.writes().is_empty());
}

#[tokio::test]
async fn parent_domain_configuration_applies_to_subdomains() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&dir, &[(HOST, site())]);
    let page = chat_page("www.chat.example");
    let (outbox, mut events) = event_channel();

    let agent = PageAgent::start(page.dom.clone(), &store, outbox, settings())
        .await
        .unwrap();
    assert!(agent.context().site().is_some());
    assert_eq!(agent.context().host(), "www.chat.example");
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn discovery_gives_up_after_the_attempt_cap() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&dir, &[(HOST, site())]);
    let (dom, _mutations) = MemoryDom::new(HOST);
    let dom = Arc::new(dom);
    let (outbox, mut events) = event_channel();

    let mut agent = PageAgent::start(dom.clone(), &store, outbox, settings())
        .await
        .unwrap();
    assert!(!agent.discover().await);

    assert_eq!(agent.stream_phase(), StreamPhase::Failed);
    assert_eq!(dom.query_count(), 3);
    match drain(&mut events).as_slice() {
        [BridgeMessage::ContentScriptError { message }] => {
            assert!(message.contains("#stream"), "{message}");
            assert!(message.contains("3 attempts"), "{message}");
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test]
async fn finished_reply_is_emitted_immediately_without_an_observer() {
    let dir = tempfile::tempdir().unwrap();
    let mut page = chat_page(HOST);
    let (mut agent, mut events) = watching_agent(&page, &dir).await;
    assert_eq!(page.dom.active_observers(), 1);

    let container = reply(&page.dom, "  All done.  ", true);
    page.dom.append(page.stream, container);
    pump(&mut agent, &mut page.mutations).await;

    assert_eq!(responses(&drain(&mut events)), vec!["All done."]);
    assert_eq!(agent.replies().phase(container), Some(ReplyPhase::Emitted));
    assert_eq!(agent.replies().pending(), 0);
    assert_eq!(page.dom.active_observers(), 1);
}

#[tokio::test]
async fn streaming_reply_is_emitted_once_when_the_marker_arrives() {
    let dir = tempfile::tempdir().unwrap();
    let mut page = chat_page(HOST);
    let (mut agent, mut events) = watching_agent(&page, &dir).await;

    let container = reply(&page.dom, "Partial", false);
    page.dom.append(page.stream, container);
    pump(&mut agent, &mut page.mutations).await;

    assert!(matches!(
        agent.replies().phase(container),
        Some(ReplyPhase::AwaitingCompletion { .. })
    ));
    assert_eq!(page.dom.active_observers(), 2);
    assert!(drain(&mut events).is_empty());

    page.dom.append_new(container, "em");
    pump(&mut agent, &mut page.mutations).await;
    assert!(drain(&mut events).is_empty());

    page.dom.append_new(container, "span.done");
    pump(&mut agent, &mut page.mutations).await;

    assert_eq!(responses(&drain(&mut events)), vec!["Partial"]);
    assert_eq!(agent.replies().phase(container), Some(ReplyPhase::Emitted));
    assert_eq!(page.dom.active_observers(), 1);

    page.dom.append_new(container, "span.done");
    page.dom.add_class(container, "done");
    pump(&mut agent, &mut page.mutations).await;
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn class_change_can_complete_a_reply() {
    let dir = tempfile::tempdir().unwrap();
    let mut page = chat_page(HOST);
    let (mut agent, mut events) = watching_agent(&page, &dir).await;

    let container = reply(&page.dom, "Toolbar reply", false);
    page.dom.append(page.stream, container);
    let toolbar = page.dom.append_new(container, "div.toolbar");
    pump(&mut agent, &mut page.mutations).await;
    assert!(drain(&mut events).is_empty());

    page.dom.add_class(toolbar, "done");
    pump(&mut agent, &mut page.mutations).await;

    assert_eq!(responses(&drain(&mut events)), vec!["Toolbar reply"]);
    assert_eq!(page.dom.active_observers(), 1);
}

#[tokio::test]
async fn replies_nested_in_inserted_wrappers_are_found() {
    let dir = tempfile::tempdir().unwrap();
    let mut page = chat_page(HOST);
    let (mut agent, mut events) = watching_agent(&page, &dir).await;

    let wrapper = page.dom.create("section");
    let first = reply(&page.dom, "first", true);
    let second = reply(&page.dom, "second", true);
    page.dom.append(wrapper, first);
    page.dom.append(wrapper, second);
    page.dom.append(page.stream, wrapper);
    pump(&mut agent, &mut page.mutations).await;

    assert_eq!(responses(&drain(&mut events)), vec!["first", "second"]);
}

#[tokio::test]
async fn reply_without_text_is_dropped_silently() {
    let dir = tempfile::tempdir().unwrap();
    let mut page = chat_page(HOST);
    let (mut agent, mut events) = watching_agent(&page, &dir).await;

    let container = reply(&page.dom, "   ", true);
    page.dom.append(page.stream, container);
    pump(&mut agent, &mut page.mutations).await;

    assert!(drain(&mut events).is_empty());
    assert_eq!(agent.replies().phase(container), Some(ReplyPhase::Emitted));
}

#[tokio::test]
async fn overdue_reply_is_expired_and_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut page = chat_page(HOST);
    let (mut agent, mut events) = watching_agent(&page, &dir).await;

    let container = reply(&page.dom, "never finishes", false);
    page.dom.append(page.stream, container);
    pump(&mut agent, &mut page.mutations).await;

    assert_eq!(agent.sweep(Instant::now()).await, 0);
    assert_eq!(agent.sweep(Instant::now() + Duration::from_secs(121)).await, 1);
    assert_eq!(agent.replies().phase(container), Some(ReplyPhase::Expired));
    assert_eq!(page.dom.active_observers(), 1);
    assert!(matches!(
        drain(&mut events).as_slice(),
        [BridgeMessage::ContentScriptError { .. }]
    ));

    page.dom.append_new(container, "span.done");
    pump(&mut agent, &mut page.mutations).await;
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn combinator_selectors_complete_replies() {
    let dir = tempfile::tempdir().unwrap();
    let mut nested = site();
    nested.bot_reply_container_selector = "#stream > div.reply".into();
    nested.completion_indicator_selector = "div.reply > .done".into();
    let store = store_with(&dir, &[(HOST, nested)]);
    let mut page = chat_page(HOST);
    let (outbox, mut events) = event_channel();

    let mut agent = PageAgent::start(page.dom.clone(), &store, outbox, settings())
        .await
        .unwrap();
    assert!(agent.discover().await);

    let container = reply(&page.dom, "Nested selectors work", true);
    page.dom.append(page.stream, container);
    pump(&mut agent, &mut page.mutations).await;

    assert_eq!(responses(&drain(&mut events)), vec!["Nested selectors work"]);
    assert_eq!(agent.replies().phase(container), Some(ReplyPhase::Emitted));
}

#[tokio::test]
async fn finished_replies_are_forgotten_after_the_retention_period() {
    let dir = tempfile::tempdir().unwrap();
    let mut page = chat_page(HOST);
    let (mut agent, mut events) = watching_agent(&page, &dir).await;

    let finished = reply(&page.dom, "done", true);
    page.dom.append(page.stream, finished);
    let streaming = reply(&page.dom, "still typing", false);
    page.dom.append(page.stream, streaming);
    pump(&mut agent, &mut page.mutations).await;
    drain(&mut events);

    let start = Instant::now();
    let retention = Duration::from_millis(FINISHED_REPLY_RETENTION_MS);
    let expiry = start + Duration::from_secs(130);

    assert_eq!(agent.sweep(start + Duration::from_secs(60)).await, 0);
    assert_eq!(agent.sweep(expiry).await, 1);
    assert_eq!(agent.replies().phase(finished), Some(ReplyPhase::Emitted));
    assert_eq!(agent.replies().phase(streaming), Some(ReplyPhase::Expired));

    assert_eq!(agent.sweep(start + retention + Duration::from_secs(1)).await, 0);
    assert_eq!(agent.replies().phase(finished), None);
    assert_eq!(agent.replies().phase(streaming), Some(ReplyPhase::Expired));

    assert_eq!(agent.sweep(expiry + retention).await, 0);
    assert_eq!(agent.replies().phase(streaming), None);
}

#[tokio::test]
async fn sub_second_timeouts_are_reported_precisely() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&dir, &[(HOST, site())]);
    let mut page = chat_page(HOST);
    let (outbox, mut events) = event_channel();
    let mut settings = settings();
    settings.completion_timeout = Some(Duration::from_millis(250));

    let mut agent = PageAgent::start(page.dom.clone(), &store, outbox, settings)
        .await
        .unwrap();
    assert!(agent.discover().await);
    let container = reply(&page.dom, "slow", false);
    page.dom.append(page.stream, container);
    pump(&mut agent, &mut page.mutations).await;

    assert_eq!(agent.sweep(Instant::now() + Duration::from_secs(1)).await, 1);
    match drain(&mut events).as_slice() {
        [BridgeMessage::ContentScriptError { message }] => {
            assert!(message.contains("250ms"), "{message}");
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test]
async fn requests_are_served_while_the_stream_is_still_missing() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&dir, &[(HOST, site())]);
    let (dom, mutations) = MemoryDom::new(HOST);
    let dom = Arc::new(dom);
    dom.append_new(dom.root(), "textarea#prompt");
    let (outbox, _events) = event_channel();
    let mut settings = settings();
    settings.poll_interval = Duration::from_secs(3600);
    settings.max_attempts = 20;

    let agent = PageAgent::start(dom.clone(), &store, outbox, settings)
        .await
        .unwrap();
    let (handle, requests) = request_channel(4);
    let agent_task = tokio::spawn(agent.run(requests, mutations));

    let ack = tokio::time::timeout(
        Duration::from_secs(5),
        handle.request(BridgeMessage::SendChatMessage { text: "early".into() }),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(ack.status, "Chat message sent");
    assert_eq!(dom.query_count(), 2);

    drop(handle);
    tokio::time::timeout(Duration::from_secs(5), agent_task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn unbounded_completion_never_expires() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&dir, &[(HOST, site())]);
    let mut page = chat_page(HOST);
    let (outbox, mut events) = event_channel();
    let mut settings = settings();
    settings.completion_timeout = None;

    let mut agent = PageAgent::start(page.dom.clone(), &store, outbox, settings)
        .await
        .unwrap();
    agent.discover().await;
    let container = reply(&page.dom, "slow", false);
    page.dom.append(page.stream, container);
    pump(&mut agent, &mut page.mutations).await;

    assert_eq!(agent.sweep(Instant::now() + Duration::from_secs(86_400)).await, 0);
    assert_eq!(agent.replies().pending(), 1);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn submission_sets_value_then_fires_events_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let page = chat_page(HOST);
    let (mut agent, _events) = watching_agent(&page, &dir).await;

    let ack = agent
        .handle_request(&BridgeMessage::SendChatMessage { text: "hello".into() })
        .await;
    assert_eq!(ack.status, "Chat message sent");
    assert_eq!(ack.text.as_deref(), Some("hello"));

    let input = page.input;
    assert_eq!(
        page.dom.writes(),
        vec![
            DomWrite::SetValue(input, "hello".into()),
            DomWrite::Dispatch(input, InputEvent::Input),
            DomWrite::Dispatch(input, InputEvent::Change),
            DomWrite::Dispatch(input, InputEvent::Blur),
            DomWrite::Dispatch(input, InputEvent::Focus),
            DomWrite::Dispatch(input, InputEvent::KeyDown("Enter")),
            DomWrite::Dispatch(input, InputEvent::KeyUp("Enter")),
        ]
    );
    assert_eq!(page.dom.value_of(input).as_deref(), Some("hello"));
}

#[tokio::test]
async fn click_mode_presses_the_send_control() {
    let dir = tempfile::tempdir().unwrap();
    let mut clicking = site();
    clicking.submit = SubmitMode::Click;
    let store = store_with(&dir, &[(HOST, clicking)]);
    let page = chat_page(HOST);
    let (outbox, _events) = event_channel();

    let mut agent = PageAgent::start(page.dom.clone(), &store, outbox, settings())
        .await
        .unwrap();
    let ack = agent
        .handle_request(&BridgeMessage::SendChatMessage { text: "hi".into() })
        .await;
    assert!(!ack.is_error());

    let writes = page.dom.writes();
    assert_eq!(writes.last(), Some(&DomWrite::Click(page.button)));
    assert!(!writes.iter().any(|w| matches!(w, DomWrite::Dispatch(_, InputEvent::KeyDown(_)))));
}

#[tokio::test]
async fn missing_input_and_page_failures_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&dir, &[(HOST, site())]);
    let (dom, _mutations) = MemoryDom::new(HOST);
    let dom = Arc::new(dom);
    let (outbox, mut events) = event_channel();

    let mut agent = PageAgent::start(dom.clone(), &store, outbox, settings())
        .await
        .unwrap();
    let ack = agent
        .handle_request(&BridgeMessage::SendChatMessage { text: "hi".into() })
        .await;
    assert!(ack.is_error());
    match drain(&mut events).as_slice() {
        [BridgeMessage::ContentScriptError { message }] => {
            assert!(message.contains("textarea#prompt"), "{message}");
        }
        other => panic!("unexpected events {other:?}"),
    }

    dom.append_new(dom.root(), "textarea#prompt");
    dom.fail_writes("input is read-only");
    let ack = agent
        .handle_request(&BridgeMessage::SendChatMessage { text: "hi".into() })
        .await;
    assert!(ack.status.contains("input is read-only"), "{}", ack.status);
    assert_eq!(drain(&mut events).len(), 1);
}

#[tokio::test]
async fn blank_requests_and_other_types_are_acknowledged_without_writes() {
    let dir = tempfile::tempdir().unwrap();
    let page = chat_page(HOST);
    let (mut agent, _events) = watching_agent(&page, &dir).await;

    let ack = agent
        .handle_request(&BridgeMessage::SendChatMessage { text: " \n ".into() })
        .await;
    assert!(ack.is_error());

    let ack = agent
        .handle_request(&BridgeMessage::PopupHello { payload: "ping".into() })
        .await;
    assert_eq!(ack.status, "Message received");
    assert_eq!(ack.request_type.as_deref(), Some("POPUP_HELLO"));

    let ack = agent
        .handle_request(&BridgeMessage::ChatbotResponse { text: "?".into() })
        .await;
    assert_eq!(ack.status, "Unknown message type");
    assert_eq!(ack.request_type.as_deref(), Some("CHATBOT_RESPONSE"));

    assert!(page.dom.writes().is_empty());
}
