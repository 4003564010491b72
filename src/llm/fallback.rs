//! Model fallback: one ordered list of backends, swapped lazily on failure.
//!
//! The manager owns a forward-rotating cursor naming the backend new calls
//! start from. A call walks the list once from its starting point (wrapping
//! around), so every backend gets exactly one attempt per call and a call
//! only fails when all of them failed. A backend that answers after others
//! failed becomes the new cursor for later calls. Concurrent calls may race
//! on the cursor; a call that lost the race leaves the winner's choice alone.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::llm::backend::{BackendFactory, BackendSetup, ModelBackend, ModelDescriptor, Reply, Turn};

/// One backend's failure (construction or invocation). Always recovered
/// inside the manager unless it is the last one of a call.
#[derive(Debug, thiserror::Error)]
#[error("model {model} failed: {source}")]
pub struct BackendFailure {
    pub model: String,
    pub source: anyhow::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("no model backends configured")]
    NoBackendsConfigured,

    #[error("no model backend could be constructed ({attempts} tried)")]
    NoBackendAvailable {
        attempts: usize,
        #[source]
        last: BackendFailure,
    },

    #[error("all {attempts} model backends exhausted")]
    AllBackendsExhausted {
        attempts: usize,
        #[source]
        last: BackendFailure,
    },
}

impl ModelError {
    pub fn last_failure(&self) -> Option<&BackendFailure> {
        match self {
            ModelError::NoBackendsConfigured => None,
            ModelError::NoBackendAvailable { last, .. }
            | ModelError::AllBackendsExhausted { last, .. } => Some(last),
        }
    }
}

#[derive(Clone)]
struct ActiveBackend {
    index: usize,
    client: Arc<dyn ModelBackend>,
}

pub struct FallbackManager {
    descriptors: Vec<ModelDescriptor>,
    setup: BackendSetup,
    factory: Arc<dyn BackendFactory>,
    cursor: AtomicUsize,
    /// Cached client for the backend at `cursor`.
    active: RwLock<ActiveBackend>,
}

impl FallbackManager {
    /// Construct the first backend that can be built, in list order. No
    /// network call is made here.
    pub fn new(
        descriptors: Vec<ModelDescriptor>,
        setup: BackendSetup,
        factory: Arc<dyn BackendFactory>,
    ) -> Result<Self, ModelError> {
        let mut last = None;
        let mut ready = None;

        for (index, descriptor) in descriptors.iter().enumerate() {
            info!("Initializing model backend {}", descriptor.id);
            match factory.create(descriptor, &setup) {
                Ok(client) => {
                    info!("Model backend {} ready", descriptor.id);
                    ready = Some(ActiveBackend { index, client });
                    break;
                }
                Err(e) => {
                    warn!("Failed to initialize {}: {}", descriptor.id, brief(&e));
                    last = Some(BackendFailure {
                        model: descriptor.id.clone(),
                        source: e,
                    });
                }
            }
        }

        if let Some(active) = ready {
            return Ok(Self {
                cursor: AtomicUsize::new(active.index),
                active: RwLock::new(active),
                descriptors,
                setup,
                factory,
            });
        }

        match last {
            Some(last) => Err(ModelError::NoBackendAvailable {
                attempts: descriptors.len(),
                last,
            }),
            None => Err(ModelError::NoBackendsConfigured),
        }
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.descriptors
    }

    /// The backend new calls start from.
    pub fn active_model(&self) -> &str {
        &self.descriptors[self.cursor.load(Ordering::Acquire)].id
    }

    /// Single-turn generation returning the reply text.
    pub async fn generate_once(&self, prompt: &str) -> Result<String, ModelError> {
        let reply = self.generate(&[Turn::user(prompt)]).await?;
        Ok(reply.joined_text())
    }

    /// Stateless generation over a full transcript.
    pub async fn generate(&self, contents: &[Turn]) -> Result<Reply, ModelError> {
        let start = self.cursor.load(Ordering::Acquire);
        let (_, reply) = self.invoke_from(start, contents).await?;
        Ok(reply)
    }

    /// Open a multi-turn session on the active backend, seeded with
    /// `prior_turns`.
    pub fn open_conversation(&self, prior_turns: Vec<Turn>) -> Conversation<'_> {
        let backend = self.cursor.load(Ordering::Acquire);
        debug!(
            "Opening conversation on {} with {} seed turns",
            self.descriptors[backend].id,
            prior_turns.len()
        );
        Conversation {
            manager: self,
            backend,
            seed_len: prior_turns.len(),
            transcript: prior_turns,
        }
    }

    /// Try each backend once, starting at `start` and wrapping around.
    async fn invoke_from(
        &self,
        start: usize,
        contents: &[Turn],
    ) -> Result<(usize, Reply), ModelError> {
        let n = self.descriptors.len();
        let mut last = None;

        for offset in 0..n {
            let index = (start + offset) % n;
            let model = &self.descriptors[index].id;

            if offset > 0 {
                info!("Switching to fallback model: {model}");
            }

            let client = match self.client_for(index) {
                Ok(client) => client,
                Err(e) => {
                    warn!("Failed to create client for {model}: {}", brief(&e));
                    last = Some(BackendFailure {
                        model: model.clone(),
                        source: e,
                    });
                    continue;
                }
            };

            match client.generate(contents).await {
                Ok(reply) => {
                    if offset > 0 {
                        self.promote(start, index, client);
                    }
                    return Ok((index, reply));
                }
                Err(e) => {
                    warn!("Model {model} failed: {}", brief(&e));
                    last = Some(BackendFailure {
                        model: model.clone(),
                        source: e,
                    });
                }
            }
        }

        match last {
            Some(last) => Err(ModelError::AllBackendsExhausted { attempts: n, last }),
            None => Err(ModelError::NoBackendsConfigured),
        }
    }

    /// Reuse the cached client when it matches, otherwise build a fresh one
    /// with the shared declarations.
    fn client_for(&self, index: usize) -> anyhow::Result<Arc<dyn ModelBackend>> {
        {
            let active = self.active.read();
            if active.index == index {
                return Ok(active.client.clone());
            }
        }
        self.factory.create(&self.descriptors[index], &self.setup)
    }

    /// Move the cursor from `from` to `to` unless another call already
    /// moved it.
    fn promote(&self, from: usize, to: usize, client: Arc<dyn ModelBackend>) {
        let mut active = self.active.write();
        match self
            .cursor
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                *active = ActiveBackend { index: to, client };
                info!("Successfully switched to model: {}", self.descriptors[to].id);
            }
            Err(current) => {
                debug!(
                    "Cursor already moved to {} by another query",
                    self.descriptors[current].id
                );
            }
        }
    }
}

/// A multi-turn session. The transcript is kept locally and replayed on
/// each send, so moving to another backend keeps every answered exchange
/// as prior context; only the message being sent is (re)submitted.
pub struct Conversation<'a> {
    manager: &'a FallbackManager,
    backend: usize,
    seed_len: usize,
    transcript: Vec<Turn>,
}

impl Conversation<'_> {
    pub fn active_model(&self) -> &str {
        &self.manager.descriptors[self.backend].id
    }

    #[cfg(test)]
    fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    /// Number of turns exchanged after seeding.
    #[cfg(test)]
    fn exchanged(&self) -> usize {
        self.transcript.len() - self.seed_len
    }

    pub async fn send_text(&mut self, text: &str) -> Result<Reply, ModelError> {
        self.send(Turn::user(text)).await
    }

    /// Send one turn. On failure the session is recreated on the next
    /// backend and the same turn is retried there.
    pub async fn send(&mut self, turn: Turn) -> Result<Reply, ModelError> {
        let mut contents = Vec::with_capacity(self.transcript.len() + 1);
        contents.extend(self.transcript.iter().cloned());
        contents.push(turn.clone());

        let (index, reply) = self.manager.invoke_from(self.backend, &contents).await?;

        if index != self.backend {
            info!(
                "Conversation moved from {} to {}, re-seeded with {} prior turns",
                self.manager.descriptors[self.backend].id,
                self.manager.descriptors[index].id,
                self.transcript.len()
            );
            self.backend = index;
        }

        self.transcript.push(turn);
        self.transcript.push(reply.clone().into_turn());
        Ok(reply)
    }
}

/// Shorten an error chain for log lines.
fn brief(e: &anyhow::Error) -> String {
    const MAX: usize = 200;
    let full = format!("{e:#}");
    if full.len() <= MAX {
        return full;
    }
    let mut end = MAX;
    while !full.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &full[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::backend::Part;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// How a scripted model behaves: fail to construct, or fail the first
    /// `fail_calls` invocations.
    #[derive(Default, Clone, Copy)]
    struct Script {
        fail_create: bool,
        fail_calls: usize,
    }

    #[derive(Default)]
    struct Log {
        creates: Vec<String>,
        calls: Vec<(String, Vec<Turn>)>,
    }

    struct ScriptedFactory {
        scripts: HashMap<String, Script>,
        remaining: Arc<Mutex<HashMap<String, usize>>>,
        log: Arc<Mutex<Log>>,
    }

    impl ScriptedFactory {
        fn new(scripts: &[(&str, Script)]) -> Arc<Self> {
            Arc::new(Self {
                scripts: scripts.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                remaining: Arc::new(Mutex::new(
                    scripts
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.fail_calls))
                        .collect(),
                )),
                log: Arc::new(Mutex::new(Log::default())),
            })
        }

        fn calls(&self) -> usize {
            self.log.lock().calls.len()
        }

        fn calls_to(&self, model: &str) -> usize {
            self.log.lock().calls.iter().filter(|(m, _)| m == model).count()
        }
    }

    struct ScriptedBackend {
        model: String,
        remaining: Arc<Mutex<HashMap<String, usize>>>,
        log: Arc<Mutex<Log>>,
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn model_id(&self) -> &str {
            &self.model
        }

        async fn generate(&self, contents: &[Turn]) -> anyhow::Result<Reply> {
            self.log
                .lock()
                .calls
                .push((self.model.clone(), contents.to_vec()));
            let mut remaining = self.remaining.lock();
            let left = remaining.entry(self.model.clone()).or_insert(0);
            if *left > 0 {
                *left -= 1;
                anyhow::bail!("429 quota exceeded for {}", self.model);
            }
            Ok(Reply::text(format!("reply from {}", self.model)))
        }
    }

    impl BackendFactory for ScriptedFactory {
        fn create(
            &self,
            descriptor: &ModelDescriptor,
            _setup: &BackendSetup,
        ) -> anyhow::Result<Arc<dyn ModelBackend>> {
            self.log.lock().creates.push(descriptor.id.clone());
            let script = self.scripts.get(&descriptor.id).copied().unwrap_or_default();
            if script.fail_create {
                anyhow::bail!("cannot construct {}", descriptor.id);
            }
            Ok(Arc::new(ScriptedBackend {
                model: descriptor.id.clone(),
                remaining: self.remaining.clone(),
                log: self.log.clone(),
            }))
        }
    }

    const ALWAYS: usize = usize::MAX;

    fn fails(n: usize) -> Script {
        Script {
            fail_create: false,
            fail_calls: n,
        }
    }

    fn ok() -> Script {
        Script::default()
    }

    fn manager(factory: &Arc<ScriptedFactory>, ids: &[&str]) -> Result<FallbackManager, ModelError> {
        FallbackManager::new(
            ids.iter().map(|id| ModelDescriptor::new(*id)).collect(),
            BackendSetup::default(),
            factory.clone(),
        )
    }

    #[tokio::test]
    async fn test_healthy_first_backend_single_call() {
        let factory = ScriptedFactory::new(&[("a", ok()), ("b", ok())]);
        let m = manager(&factory, &["a", "b"]).unwrap();

        assert_eq!(m.generate_once("hi").await.unwrap(), "reply from a");
        assert_eq!(factory.calls(), 1);
        assert_eq!(factory.log.lock().creates, vec!["a"]);
    }

    #[tokio::test]
    async fn test_k_failures_then_success_makes_k_plus_one_calls() {
        let factory = ScriptedFactory::new(&[
            ("a", fails(ALWAYS)),
            ("b", fails(ALWAYS)),
            ("c", fails(ALWAYS)),
            ("d", ok()),
            ("e", ok()),
        ]);
        let m = manager(&factory, &["a", "b", "c", "d", "e"]).unwrap();

        assert_eq!(m.generate_once("hi").await.unwrap(), "reply from d");
        assert_eq!(factory.calls(), 4);
        assert_eq!(factory.calls_to("e"), 0);
        assert_eq!(m.active_model(), "d");
    }

    #[tokio::test]
    async fn test_all_backends_fail_carries_last_failure() {
        let factory = ScriptedFactory::new(&[
            ("a", fails(ALWAYS)),
            ("b", fails(ALWAYS)),
            ("c", fails(ALWAYS)),
        ]);
        let m = manager(&factory, &["a", "b", "c"]).unwrap();

        let err = m.generate_once("hi").await.unwrap_err();
        match &err {
            ModelError::AllBackendsExhausted { attempts, last } => {
                assert_eq!(*attempts, 3);
                assert_eq!(last.model, "c");
                assert!(last.source.to_string().contains("quota"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.last_failure().unwrap().model, "c");
        // Each backend tried exactly once, never twice in one call.
        assert_eq!(factory.calls(), 3);
    }

    #[tokio::test]
    async fn test_construction_failures_skipped_at_startup() {
        let factory = ScriptedFactory::new(&[
            (
                "a",
                Script {
                    fail_create: true,
                    fail_calls: 0,
                },
            ),
            ("b", ok()),
        ]);
        let m = manager(&factory, &["a", "b"]).unwrap();
        assert_eq!(m.active_model(), "b");
        assert_eq!(m.generate_once("hi").await.unwrap(), "reply from b");
        assert_eq!(factory.calls_to("a"), 0);
    }

    #[test]
    fn test_no_backend_available_when_all_constructions_fail() {
        let broken = Script {
            fail_create: true,
            fail_calls: 0,
        };
        let factory = ScriptedFactory::new(&[("a", broken), ("b", broken)]);
        match manager(&factory, &["a", "b"]) {
            Err(ModelError::NoBackendAvailable { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last.model, "b");
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected construction failure"),
        }
    }

    #[test]
    fn test_empty_model_list_rejected() {
        let factory = ScriptedFactory::new(&[]);
        assert!(matches!(
            manager(&factory, &[]),
            Err(ModelError::NoBackendsConfigured)
        ));
    }

    #[tokio::test]
    async fn test_runtime_construction_failure_advances() {
        let factory = ScriptedFactory::new(&[
            ("a", fails(ALWAYS)),
            (
                "b",
                Script {
                    fail_create: true,
                    fail_calls: 0,
                },
            ),
            ("c", ok()),
        ]);
        let m = manager(&factory, &["a", "b", "c"]).unwrap();
        assert_eq!(m.generate_once("hi").await.unwrap(), "reply from c");
        assert_eq!(factory.calls_to("b"), 0);
    }

    #[tokio::test]
    async fn test_cursor_persists_across_calls() {
        let factory = ScriptedFactory::new(&[("a", fails(ALWAYS)), ("b", ok())]);
        let m = manager(&factory, &["a", "b"]).unwrap();

        m.generate_once("one").await.unwrap();
        m.generate_once("two").await.unwrap();

        // Demoted backend is not retried while the cursor's backend is healthy.
        assert_eq!(factory.calls_to("a"), 1);
        assert_eq!(factory.calls_to("b"), 2);
    }

    #[tokio::test]
    async fn test_cursor_wraps_to_recovered_backend() {
        // a fails once (transient quota), b fails on its second call.
        let factory = ScriptedFactory::new(&[("a", fails(1)), ("b", fails(0))]);
        let m = manager(&factory, &["a", "b"]).unwrap();

        assert_eq!(m.generate_once("one").await.unwrap(), "reply from b");
        *factory.remaining.lock().get_mut("b").unwrap() = 1;

        assert_eq!(m.generate_once("two").await.unwrap(), "reply from a");
        assert_eq!(m.active_model(), "a");
    }

    #[tokio::test]
    async fn test_fallback_recreates_client() {
        let factory = ScriptedFactory::new(&[("a", fails(ALWAYS)), ("b", ok())]);
        let m = manager(&factory, &["a", "b"]).unwrap();
        m.generate_once("one").await.unwrap();
        m.generate_once("two").await.unwrap();
        // a at startup, b once on failover, then cached.
        assert_eq!(factory.log.lock().creates, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_conversation_keeps_transcript() {
        let factory = ScriptedFactory::new(&[("a", ok())]);
        let m = manager(&factory, &["a"]).unwrap();

        let mut convo = m.open_conversation(vec![Turn::user("seed q"), Turn::model("seed a")]);
        convo.send_text("first").await.unwrap();
        convo.send_text("second").await.unwrap();

        assert_eq!(convo.exchanged(), 4);
        let log = factory.log.lock();
        let (_, last_contents) = log.calls.last().unwrap();
        assert_eq!(last_contents.len(), 5);
        assert_eq!(last_contents[0], Turn::user("seed q"));
        assert_eq!(last_contents[4], Turn::user("second"));
    }

    #[tokio::test]
    async fn test_conversation_failover_reseeds_and_retries() {
        // a answers the first send, then fails.
        let factory = ScriptedFactory::new(&[("a", ok()), ("b", ok())]);
        let m = manager(&factory, &["a", "b"]).unwrap();

        let mut convo = m.open_conversation(vec![Turn::user("seed")]);
        convo.send_text("first").await.unwrap();
        *factory.remaining.lock().get_mut("a").unwrap() = ALWAYS;

        let reply = convo.send_text("second").await.unwrap();
        assert_eq!(reply.joined_text(), "reply from b");
        assert_eq!(convo.active_model(), "b");

        let log = factory.log.lock();
        let (model, contents) = log.calls.last().unwrap();
        assert_eq!(model, "b");
        assert_eq!(contents[0], Turn::user("seed"));
        assert_eq!(contents[1], Turn::user("first"));
        assert_eq!(contents[2].parts, vec![Part::Text("reply from a".into())]);
        assert_eq!(contents[3], Turn::user("second"));
    }

    #[tokio::test]
    async fn test_conversation_failure_does_not_record_turn() {
        let factory = ScriptedFactory::new(&[("a", fails(ALWAYS))]);
        let m = manager(&factory, &["a"]).unwrap();
        let mut convo = m.open_conversation(vec![]);
        assert!(convo.send_text("x").await.is_err());
        assert!(convo.transcript().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queries_advance_cursor_forward() {
        let factory = ScriptedFactory::new(&[("a", fails(ALWAYS)), ("b", ok()), ("c", ok())]);
        let m = Arc::new(manager(&factory, &["a", "b", "c"]).unwrap());

        let mut handles = Vec::new();
        for i in 0..16 {
            let m = m.clone();
            handles.push(tokio::spawn(async move {
                m.generate_once(&format!("q{i}")).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "reply from b");
        }
        assert_eq!(m.active_model(), "b");
        assert_eq!(factory.calls_to("c"), 0);
    }

    #[test]
    fn test_brief_truncates_long_errors() {
        let e = anyhow::anyhow!("{}", "x".repeat(500));
        let s = brief(&e);
        assert!(s.len() <= 203);
        assert!(s.ends_with("..."));
    }
}
