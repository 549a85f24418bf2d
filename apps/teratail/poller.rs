use crate::{
    config::{DedupPolicy, MessageStyle, NotifierConfig},
    models::questions::Question,
    notifier::Notifier,
    store::{WatermarkStore, Watermarks},
    teratail_api::QuestionSource,
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
    time::Instant,
};
use tracing::{debug, error, info, instrument, warn};

/// Upper bound on remembered across-tags ids; the oldest are forgotten first.
const POSTED_IDS_CAPACITY: usize = 1000;

/// The slice of configuration a poll cycle needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub notify_target: String,
    pub tags: Vec<String>,
    pub dedup_policy: DedupPolicy,
    pub message_style: MessageStyle,
}

impl From<&NotifierConfig> for PollSettings {
    fn from(config: &NotifierConfig) -> Self {
        Self {
            notify_target: config.notify_target.clone(),
            tags: config.tags.clone(),
            dedup_policy: config.dedup_policy,
            message_style: config.message_style,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedQuestion {
    pub tag: String,
    pub id: i64,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub posted: Vec<PostedQuestion>,
    pub skipped_tags: Vec<String>,
    pub failed_sends: usize,
    pub watermarks_saved: bool,
    /// The watermark map could not be loaded, so nothing was fetched or posted.
    pub aborted: bool,
}

pub fn format_message(style: MessageStyle, tag: &str, question: &Question) -> String {
    match style {
        MessageStyle::Tag => format!("【{}】{}\n{}", tag, question.title, question.url()),
        MessageStyle::New => format!("【New!】{}\n{}", question.title, question.url()),
    }
}

struct TagFetch {
    tag: String,
    fetched_ids: Vec<i64>,
    fresh: Vec<Question>,
}

/// A question queued for posting along with every tag it is new for. Under the
/// per-tag policy `tags` always has exactly one entry.
struct Candidate {
    question: Question,
    tags: Vec<String>,
}

pub struct Poller {
    source: Arc<dyn QuestionSource>,
    notifier: Arc<dyn Notifier>,
    watermarks: WatermarkStore,
    settings: PollSettings,
}

impl Poller {
    pub fn new(
        source: Arc<dyn QuestionSource>,
        notifier: Arc<dyn Notifier>,
        watermarks: WatermarkStore,
        settings: PollSettings,
    ) -> Self {
        Self {
            source,
            notifier,
            watermarks,
            settings,
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// One fetch, filter, post, persist pass over every configured tag. Errors are
    /// logged and folded into the report; this never fails.
    #[instrument(name = "poll_cycle", skip_all)]
    pub async fn run_cycle(&self) -> CycleReport {
        let start_time = Instant::now();
        let mut report = CycleReport::default();

        let mut watermarks = match self.watermarks.load().await {
            Ok(watermarks) => watermarks,
            Err(e) => {
                error!(error = %e, "Failed to load watermarks, skipping cycle");
                report.aborted = true;
                return report;
            }
        };
        let before = watermarks.clone();

        // ids announced by earlier cycles, only tracked when posting across tags
        let mut posted_ids = match self.settings.dedup_policy {
            DedupPolicy::PerTag => None,
            DedupPolicy::AcrossTags => match self.watermarks.load_posted().await {
                Ok(posted_ids) => Some(posted_ids),
                Err(e) => {
                    error!(error = %e, "Failed to load posted question ids, skipping cycle");
                    report.aborted = true;
                    return report;
                }
            },
        };

        let fetches = self.fetch_all(&watermarks, &mut report).await;
        let candidates = self.plan(&fetches, posted_ids.as_ref());
        let blocked = self.post_all(candidates, &mut report).await;

        for fetch in &fetches {
            let limit = blocked.get(&fetch.tag).copied();
            let highest = fetch
                .fetched_ids
                .iter()
                .copied()
                .filter(|id| limit.is_none_or(|failed_id| *id < failed_id))
                .max();

            // nothing fetched leaves the tag alone
            if let Some(highest) = highest {
                if watermarks.advance(&fetch.tag, highest) {
                    debug!(tag = %fetch.tag, latest_id = highest, "Watermark advanced");
                }
            }
        }

        if watermarks != before {
            match self.watermarks.save(&watermarks).await {
                Ok(()) => report.watermarks_saved = true,
                Err(e) => error!(error = %e, "Failed to save watermarks"),
            }
        }

        if let Some(posted_ids) = posted_ids.as_mut() {
            let previous = posted_ids.clone();
            posted_ids.extend(report.posted.iter().map(|posted| posted.id));
            self.forget_settled(posted_ids, &watermarks);

            if *posted_ids != previous {
                if let Err(e) = self.watermarks.save_posted(posted_ids).await {
                    error!(error = %e, "Failed to save posted question ids");
                }
            }
        }

        info!(
            posted = report.posted.len(),
            skipped_tags = report.skipped_tags.len(),
            failed_sends = report.failed_sends,
            watermarks = ?watermarks.iter().collect::<Vec<_>>(),
            duration = ?start_time.elapsed(),
            "Poll cycle finished"
        );

        report
    }

    async fn fetch_all(&self, watermarks: &Watermarks, report: &mut CycleReport) -> Vec<TagFetch> {
        let mut fetches = Vec::with_capacity(self.settings.tags.len());

        for tag in &self.settings.tags {
            let last_id = watermarks.get(tag);
            debug!(tag = %tag, last_id, "Start fetch by tag");

            let questions = match self.source.fetch_questions(tag).await {
                Ok(questions) => questions,
                Err(e) => {
                    warn!(tag = %tag, error = %e, "Failed to fetch questions, skipping tag");
                    report.skipped_tags.push(tag.clone());
                    continue;
                }
            };

            let fetched_ids = questions.iter().map(|q| q.id).collect();
            let mut fresh: Vec<Question> = questions.into_iter().filter(|q| q.id > last_id).collect();
            fresh.sort_by_key(|q| q.id);
            fresh.dedup_by_key(|q| q.id);

            debug!(tag = %tag, fresh = fresh.len(), "End fetch by tag");
            fetches.push(TagFetch {
                tag: tag.clone(),
                fetched_ids,
                fresh,
            });
        }

        fetches
    }

    /// Drops ids that no configured tag can offer again, i.e. those at or below
    /// every tag's watermark, then trims the set to its capacity.
    fn forget_settled(&self, posted_ids: &mut BTreeSet<i64>, watermarks: &Watermarks) {
        let floor = self
            .settings
            .tags
            .iter()
            .map(|tag| watermarks.get(tag))
            .min()
            .unwrap_or(0);
        posted_ids.retain(|id| *id > floor);

        while posted_ids.len() > POSTED_IDS_CAPACITY {
            posted_ids.pop_first();
        }
    }

    /// Orders fresh questions for posting. Under the across-tags policy a question
    /// already in `posted_ids` is dropped; it does not block its tags.
    fn plan(&self, fetches: &[TagFetch], posted_ids: Option<&BTreeSet<i64>>) -> Vec<Candidate> {
        match self.settings.dedup_policy {
            DedupPolicy::PerTag => fetches
                .iter()
                .flat_map(|fetch| {
                    fetch.fresh.iter().map(move |question| Candidate {
                        question: question.clone(),
                        tags: vec![fetch.tag.clone()],
                    })
                })
                .collect(),
            DedupPolicy::AcrossTags => {
                let mut merged: BTreeMap<i64, Candidate> = BTreeMap::new();
                for fetch in fetches {
                    for question in &fetch.fresh {
                        if posted_ids.is_some_and(|posted| posted.contains(&question.id)) {
                            debug!(tag = %fetch.tag, question_id = question.id, "Already posted under another tag");
                            continue;
                        }
                        merged
                            .entry(question.id)
                            .or_insert_with(|| Candidate {
                                question: question.clone(),
                                tags: Vec::new(),
                            })
                            .tags
                            .push(fetch.tag.clone());
                    }
                }
                merged.into_values().collect()
            }
        }
    }

    /// Posts candidates in order. Returns, per tag, the lowest question id that was
    /// not delivered; that tag's watermark must stay below it.
    async fn post_all(
        &self,
        candidates: Vec<Candidate>,
        report: &mut CycleReport,
    ) -> HashMap<String, i64> {
        let mut blocked: HashMap<String, i64> = HashMap::new();

        for Candidate { question, tags } in candidates {
            let Some(label) = tags.first() else {
                continue;
            };

            let delivered = if tags.iter().any(|tag| blocked.contains_key(tag)) {
                debug!(question_id = question.id, "Holding back question behind failed delivery");
                false
            } else {
                let text = format_message(self.settings.message_style, label, &question);
                match self.notifier.send(&self.settings.notify_target, &text).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!(
                            question_id = question.id,
                            tag = %label,
                            notifier = self.notifier.name(),
                            error = %e,
                            "Failed to send notification"
                        );
                        report.failed_sends += 1;
                        false
                    }
                }
            };

            if delivered {
                report.posted.push(PostedQuestion {
                    tag: label.clone(),
                    id: question.id,
                });
            } else {
                for tag in tags {
                    blocked.entry(tag).or_insert(question.id);
                }
            }
        }

        blocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_style_message() {
        let question = Question::new(5, "A");
        assert_eq!(
            format_message(MessageStyle::Tag, "Python", &question),
            "【Python】A\nhttps://teratail.com/questions/5"
        );
    }

    #[test]
    fn new_style_message() {
        let question = Question::new(7, "B");
        assert_eq!(
            format_message(MessageStyle::New, "Python", &question),
            "【New!】B\nhttps://teratail.com/questions/7"
        );
    }

    #[test]
    fn settings_come_from_config() {
        let config = NotifierConfig {
            tags: vec!["Rust".to_string(), "Go".to_string()],
            dedup_policy: DedupPolicy::AcrossTags,
            ..NotifierConfig::default()
        };
        let settings = PollSettings::from(&config);
        assert_eq!(settings.notify_target, "#general");
        assert_eq!(settings.tags, config.tags);
        assert_eq!(settings.dedup_policy, DedupPolicy::AcrossTags);
    }
}
