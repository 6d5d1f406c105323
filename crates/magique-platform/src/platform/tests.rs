use super::*;
use crate::agent::{CONNECT_TO, DISCONNECT_AND_DIE};
use crate::{AgentEvent, BasicAgent, InboundHandler, BASIC_AGENT_CLASS, MANAGEMENT_AGENT_NAME};
use magique_proto::{FrameCodec, WireMessage};
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

fn config() -> PlatformConfig {
    PlatformConfig::default()
        .with_port(0)
        .with_bind_address("127.0.0.1")
        .with_retries(2, Duration::from_millis(10))
        .with_shutdown_grace(Duration::from_millis(300))
}

async fn platform() -> Platform {
    Platform::start(config()).await.unwrap()
}

/// Holds on to its termination acknowledgement forever
struct Stubborn {
    name: String,
    held: Mutex<Option<TerminationAck>>,
}

impl Stubborn {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            held: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Agent for Stubborn {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: AgentName) {
        self.name = name.to_string();
    }

    fn set_platform(&mut self, _platform: PlatformHandle) {}

    fn connect_to(&mut self, _agent: &str) {}

    fn add_message(&self, _content: Bytes) {}

    fn perform(&self, _operation: &str, _args: Vec<Value>) {}

    fn request_termination(&self, ack: TerminationAck) {
        *self.held.lock().unwrap() = Some(ack);
    }
}

#[tokio::test]
async fn test_start_registers_management_agent() {
    let platform = platform().await;

    assert_ne!(platform.port(), 0);
    assert_eq!(platform.name().host(), "127.0.0.1");
    assert_eq!(
        platform.agent_names().await,
        vec![format!("{}@{}", MANAGEMENT_AGENT_NAME, platform.name())]
    );
    assert_eq!(platform.management_agent().name(), format!("PlatformAgent@{}", platform.name()));

    platform.shutdown().await;
}

#[tokio::test]
async fn test_add_agent_qualifies_and_attaches() {
    let platform = platform().await;

    let agent = platform.add_agent(BasicAgent::new("alice")).await.unwrap();

    let expected = format!("alice@{}", platform.name());
    assert_eq!(agent.name(), expected);
    assert_eq!(agent.platform().unwrap().name(), platform.name());
    assert_eq!(agent.acquaintances(), vec![format!("PlatformAgent@{}", platform.name())]);
    assert!(platform.agent("alice").await.is_some());
    assert!(platform.agent(&expected).await.is_some());

    platform.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_agent_is_rejected() {
    let platform = platform().await;
    let first = platform.add_agent(BasicAgent::new("alice")).await.unwrap();

    let result = platform.add_agent(BasicAgent::new("alice@elsewhere:1")).await;

    assert!(matches!(result, Err(PlatformError::DuplicateAgent(_))));
    assert_eq!(platform.agent_count().await, 2);
    let registered = platform.agent("alice").await.unwrap();
    assert!(std::ptr::eq(
        Arc::as_ptr(&registered) as *const u8,
        Arc::as_ptr(&first) as *const u8
    ));

    platform.shutdown().await;
}

#[tokio::test]
async fn test_empty_short_name_is_malformed() {
    let platform = platform().await;

    let result = platform.add_agent(BasicAgent::new("")).await;
    assert!(matches!(result, Err(PlatformError::MalformedName(_))));

    platform.shutdown().await;
}

#[tokio::test]
async fn test_create_agent() {
    let platform = platform().await;

    let agent = platform
        .create_agent(BASIC_AGENT_CLASS, "worker", vec![json!("boss@10.0.0.1:4444")])
        .await
        .unwrap();

    assert_eq!(agent.name(), format!("worker@{}", platform.name()));
    assert_eq!(platform.agent_count().await, 2);

    platform.shutdown().await;
}

#[tokio::test]
async fn test_failed_creation_leaves_no_trace() {
    let platform = platform().await;

    let unknown = platform.create_agent("Nope", "ghost", vec![]).await;
    assert!(matches!(unknown, Err(PlatformError::DynamicInstantiation { .. })));

    let refused = platform.create_agent(BASIC_AGENT_CLASS, "ghost", vec![json!(1)]).await;
    assert!(matches!(refused, Err(PlatformError::DynamicInstantiation { .. })));

    assert!(platform.agent("ghost").await.is_none());
    assert_eq!(platform.agent_count().await, 1);

    platform.shutdown().await;
}

#[tokio::test]
async fn test_register_factory_at_runtime() {
    let platform = platform().await;
    platform
        .register_factory("Echo", |name, _args| Ok(Box::new(BasicAgent::new(name.to_string())) as Box<dyn Agent>))
        .await;

    assert!(platform.create_agent("Echo", "echo", vec![]).await.is_ok());

    platform.shutdown().await;
}

#[tokio::test]
async fn test_remove_agent() {
    let platform = platform().await;
    platform.add_agent(BasicAgent::new("alice")).await.unwrap();

    assert!(platform.remove_agent("alice").await.is_some());
    assert!(platform.remove_agent("alice").await.is_none());
    assert!(platform.agent("alice").await.is_none());

    platform.shutdown().await;
}

#[tokio::test]
async fn test_local_delivery() {
    let platform = platform().await;
    let (agent, mut inbox) = BasicAgent::with_inbox("alice");
    let agent = platform.add_agent(agent).await.unwrap();

    let delivery = platform.send(agent.name(), Bytes::from_static(b"hi")).await.unwrap();

    assert_eq!(delivery, Delivery::Local(agent.name().to_string()));
    assert_eq!(inbox.recv().await, Some(AgentEvent::Message(Bytes::from_static(b"hi"))));

    platform.shutdown().await;
}

#[tokio::test]
async fn test_undeliverable_messages_are_dropped() {
    let platform = platform().await;

    let to_platform = platform.send(&platform.name().to_string(), Bytes::new()).await.unwrap();
    assert_eq!(to_platform, Delivery::Dropped);

    let to_missing = platform
        .send(&format!("ghost@{}", platform.name()), Bytes::new())
        .await
        .unwrap();
    assert_eq!(to_missing, Delivery::Dropped);
    assert!(platform.connected_platforms().await.is_empty());

    platform.shutdown().await;
}

#[tokio::test]
async fn test_other_spellings_of_own_address_are_dropped() {
    let platform = platform().await;
    let port = platform.port();

    for host in ["localhost", "0.0.0.0"] {
        let delivery = platform
            .send(&format!("ghost@{}:{}", host, port), Bytes::new())
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Dropped);
    }

    platform.connect(&format!("localhost:{}", port)).await.unwrap();
    assert!(platform.connected_platforms().await.is_empty());

    platform.shutdown().await;
}

#[tokio::test]
async fn test_inbound_message_for_own_alias_is_not_relayed() {
    let platform = platform().await;
    let recipient = format!("ghost@localhost:{}", platform.port());
    let frame = WireMessage::Routing(RoutingMessage::new(recipient, Bytes::from_static(b"loop?")))
        .to_frame(0)
        .unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", platform.port())).await.unwrap();
    FrameCodec::new().write_frame(&mut stream, &frame).await.unwrap();
    drop(stream);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(platform.connected_platforms().await.is_empty());

    platform.shutdown().await;
}

#[tokio::test]
async fn test_relay_completes_before_next_inbound_message() {
    let platform = platform().await;
    let (agent, mut inbox) = BasicAgent::with_inbox("alice");
    let alice = platform.add_agent(agent).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed = listener.local_addr().unwrap().port();
    drop(listener);

    let server = Arc::clone(&platform.inner.server);
    let started = Instant::now();
    server
        .have_a_message(RoutingMessage::new(format!("ghost@127.0.0.1:{}", closed), Bytes::new()))
        .await;
    assert!(started.elapsed() >= Duration::from_millis(10));

    server
        .have_a_message(RoutingMessage::new(alice.name(), Bytes::from_static(b"after")))
        .await;
    assert_eq!(
        inbox.try_recv().ok(),
        Some(AgentEvent::Message(Bytes::from_static(b"after")))
    );

    platform.shutdown().await;
}

#[tokio::test]
async fn test_malformed_recipient() {
    let platform = platform().await;

    let result = platform.send("no-platform-suffix", Bytes::new()).await;
    assert!(matches!(result, Err(PlatformError::MalformedName(_))));

    let result = platform.connect("not a platform").await;
    assert!(matches!(result, Err(PlatformError::MalformedName(_))));

    platform.shutdown().await;
}

#[tokio::test]
async fn test_connect_to_self_is_a_no_op() {
    let platform = platform().await;

    platform.connect(&platform.name().to_string()).await.unwrap();
    assert!(platform.connected_platforms().await.is_empty());

    platform.shutdown().await;
}

#[tokio::test]
async fn test_ping_self() {
    let platform = platform().await;
    assert!(platform.ping(&platform.name().to_string()).await.unwrap());
    platform.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_from_notifies_agents() {
    let platform = platform().await;
    let (agent, mut inbox) = BasicAgent::with_inbox("alice");
    platform.add_agent(agent).await.unwrap();

    let existed = platform.disconnect_from("127.0.0.1:1").await.unwrap();

    assert!(!existed);
    assert_eq!(
        inbox.recv().await,
        Some(AgentEvent::Perform {
            operation: DISCONNECT_FROM_PLATFORM.to_string(),
            args: vec![json!("127.0.0.1:1")],
        })
    );

    platform.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_collects_acknowledgements() {
    let platform = platform().await;
    let (alice, mut alice_inbox) = BasicAgent::with_inbox("alice");
    let (bob, mut bob_inbox) = BasicAgent::with_inbox("bob");
    let alice = platform.add_agent(alice).await.unwrap();
    let bob = platform.add_agent(bob).await.unwrap();
    let name = platform.name().clone();

    let report = platform.shutdown().await;

    assert_eq!(report.acknowledged, vec![alice.name().to_string(), bob.name().to_string()]);
    assert!(report.unacknowledged.is_empty());

    for inbox in [&mut alice_inbox, &mut bob_inbox] {
        assert_eq!(
            inbox.recv().await,
            Some(AgentEvent::Perform {
                operation: DISCONNECT_AND_DIE.to_string(),
                args: vec![],
            })
        );
    }

    assert_eq!(platform.agent_count().await, 0);
    assert!(platform.is_stopping());
    assert!(!platform.ping(&name.to_string()).await.unwrap());
}

#[tokio::test]
async fn test_shutdown_waits_for_grace_period() {
    let platform = platform().await;
    platform.add_agent(BasicAgent::new("alice")).await.unwrap();
    let stubborn = platform.add_agent(Stubborn::new("stubborn")).await.unwrap();

    let started = Instant::now();
    let report = platform.shutdown().await;

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(report.acknowledged, vec![format!("alice@{}", platform.name())]);
    assert_eq!(report.unacknowledged, vec![stubborn.name().to_string()]);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let platform = platform().await;
    platform.add_agent(BasicAgent::new("alice")).await.unwrap();

    let first = platform.shutdown().await;
    let second = platform.shutdown().await;

    assert_eq!(first.acknowledged.len(), 1);
    assert_eq!(second, ShutdownReport::default());
    assert!(matches!(
        platform.add_agent(BasicAgent::new("late")).await,
        Err(PlatformError::PlatformStopped)
    ));
}

#[tokio::test]
async fn test_agents_added_during_shutdown_are_terminated_or_refused() {
    let platform = platform().await;

    let mut adding = Vec::new();
    for n in 0..32 {
        let platform = platform.clone();
        adding.push(tokio::spawn(async move {
            platform.add_agent(BasicAgent::new(format!("late{}", n))).await
        }));
    }
    let report = platform.shutdown().await;

    for task in adding {
        match task.await.unwrap() {
            Ok(agent) => assert!(
                report.acknowledged.contains(&agent.name().to_string()),
                "{} was registered but never asked to terminate",
                agent.name()
            ),
            Err(e) => assert!(matches!(e, PlatformError::PlatformStopped)),
        }
    }
    assert_eq!(platform.agent_count().await, 0);
}

#[tokio::test]
async fn test_connect_agent_to_local_agent() {
    let platform = platform().await;
    let (agent, mut inbox) = BasicAgent::with_inbox("alice");
    let agent = platform.add_agent(agent).await.unwrap();

    let delivery = platform
        .management_agent()
        .connect_agent_to(agent.name(), "bob@10.0.0.2:4444")
        .await
        .unwrap();
    assert_eq!(delivery, Delivery::Local(format!("PlatformAgent@{}", platform.name())));

    let event = tokio::time::timeout(Duration::from_secs(2), inbox.recv()).await.unwrap();
    assert_eq!(
        event,
        Some(AgentEvent::Perform {
            operation: CONNECT_TO.to_string(),
            args: vec![json!("bob@10.0.0.2:4444")],
        })
    );
    assert!(agent.acquaintances().contains(&"bob@10.0.0.2:4444".to_string()));

    platform.shutdown().await;
}

#[tokio::test]
async fn test_handle_outlives_platform() {
    let platform = platform().await;
    let handle = platform.handle();
    platform.shutdown().await;
    drop(platform);

    assert!(handle.upgrade().is_none());
    let result = handle.send("alice@127.0.0.1:1", Bytes::new()).await;
    assert!(matches!(result, Err(PlatformError::PlatformStopped)));
}
