#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use teratail::{
    config::{DedupPolicy, MessageStyle},
    errors::{NotifierError, Result},
    models::questions::Question,
    notifier::Notifier,
    poller::{PollSettings, Poller},
    store::{KeyValueStore, MemoryStore, WatermarkStore},
    teratail_api::QuestionSource,
};

pub enum Reply {
    Questions(Vec<Question>),
    NetworkError,
    ParseError,
}

/// Hands out queued replies per tag; an empty queue answers with no questions.
#[derive(Default)]
pub struct ScriptedSource {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    pub calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn push(&self, tag: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(tag.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn push_questions(&self, tag: &str, questions: &[(i64, &str)]) {
        self.push(
            tag,
            Reply::Questions(
                questions
                    .iter()
                    .map(|(id, title)| Question::new(*id, *title))
                    .collect(),
            ),
        );
    }
}

#[async_trait]
impl QuestionSource for ScriptedSource {
    async fn fetch_questions(&self, tag: &str) -> Result<Vec<Question>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(tag)
            .and_then(VecDeque::pop_front);

        match reply {
            Some(Reply::Questions(questions)) => Ok(questions),
            Some(Reply::NetworkError) => Err(NotifierError::Network("connection reset".into())),
            Some(Reply::ParseError) => Err(NotifierError::Parse("missing field `questions`".into())),
            None => Ok(Vec::new()),
        }
    }
}

/// Records every delivered message and refuses those linking to a failing id.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
    failing_ids: Mutex<HashSet<i64>>,
}

impl RecordingNotifier {
    pub fn fail_on(&self, id: i64) {
        self.failing_ids.lock().unwrap().insert(id);
    }

    pub fn recover(&self) {
        self.failing_ids.lock().unwrap().clear();
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, target: &str, text: &str) -> Result<()> {
        let failing = self
            .failing_ids
            .lock()
            .unwrap()
            .iter()
            .any(|id| text.ends_with(&format!("/questions/{id}")));
        if failing {
            return Err(NotifierError::Notify("chat backend unavailable".into()));
        }

        self.sent
            .lock()
            .unwrap()
            .push((target.to_string(), text.to_string()));
        Ok(())
    }
}

/// MemoryStore with switchable read and write failures.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(NotifierError::Persistence("store offline".into()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(NotifierError::Persistence("store offline".into()));
        }
        self.inner.set(key, value).await
    }
}

pub fn settings(tags: &[&str], dedup_policy: DedupPolicy) -> PollSettings {
    PollSettings {
        notify_target: "#general".to_string(),
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        dedup_policy,
        message_style: MessageStyle::Tag,
    }
}

pub struct Harness {
    pub source: Arc<ScriptedSource>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<FlakyStore>,
    pub watermarks: WatermarkStore,
    pub poller: Poller,
}

impl Harness {
    pub fn new(settings: PollSettings) -> Self {
        let source = Arc::new(ScriptedSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let store = Arc::new(FlakyStore::default());
        let watermarks = WatermarkStore::new(store.clone());
        let poller = Poller::new(
            source.clone(),
            notifier.clone(),
            watermarks.clone(),
            settings,
        );

        Self {
            source,
            notifier,
            store,
            watermarks,
            poller,
        }
    }
}
