//! Stateful property testing for the record store.
//!
//! Uses proptest-state-machine to run random sequences of upserts against
//! a `RecordStore` and a plain map model. The model tracks:
//!
//! - One row per identifier, whatever the number of writes
//! - Replaceable records keeping their newest version
//! - The store version counting successful writes
//! - A live query over notes converging on the stored rows

use std::collections::BTreeMap;
use std::time::Duration;

use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};
use tokio::runtime::Runtime;

use glean_cache::{Article, LiveQuery, LiveQueryEngine, Note, PutOutcome, RecordStore};
use glean_nostr::Coordinate;

const AUTHOR: &str = "a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1";

/// Operations that can be performed on the store.
#[derive(Debug, Clone)]
pub enum StoreOperation {
    /// Upsert a note. Notes are never replaceable.
    PutNote { id: u8, content: String },
    /// Upsert a version of an article.
    PutArticle {
        slug: u8,
        created_at: i64,
        title: String,
    },
}

/// Reference model of the store contents.
#[derive(Clone, Debug, Default)]
pub struct StoreModel {
    /// Note id -> content.
    pub notes: BTreeMap<String, String>,
    /// Article key -> (created_at, title).
    pub articles: BTreeMap<String, (i64, String)>,
    /// Successful writes so far.
    pub version: u64,
}

fn note_id(id: u8) -> String {
    format!("{id:02x}").repeat(32)
}

fn article_key(slug: u8) -> String {
    Coordinate::new(30023, AUTHOR, format!("post-{slug}")).query_key()
}

impl ReferenceStateMachine for StoreModel {
    type State = Self;
    type Transition = StoreOperation;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::default()).boxed()
    }

    fn transitions(_state: &Self::State) -> BoxedStrategy<Self::Transition> {
        // Small key spaces so overwrites are common
        prop_oneof![
            2 => (0u8..6, "[a-z]{0,8}")
                .prop_map(|(id, content)| StoreOperation::PutNote { id, content }),
            3 => (0u8..3, 0i64..6, "[A-Z][a-z]{0,6}").prop_map(|(slug, created_at, title)| {
                StoreOperation::PutArticle { slug, created_at, title }
            }),
        ]
        .boxed()
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        match transition {
            StoreOperation::PutNote { id, content } => {
                state.notes.insert(note_id(*id), content.clone());
                state.version += 1;
            }
            StoreOperation::PutArticle {
                slug,
                created_at,
                title,
            } => {
                let key = article_key(*slug);
                let stale = state
                    .articles
                    .get(&key)
                    .is_some_and(|(stored, _)| *stored > *created_at);
                if !stale {
                    state.articles.insert(key, (*created_at, title.clone()));
                    state.version += 1;
                }
            }
        }
        state
    }
}

pub struct StoreTestHarness {
    runtime: Runtime,
    store: RecordStore,
    notes: LiveQuery<Vec<Note>>,
}

impl StoreTestHarness {
    fn new() -> Self {
        let runtime = Runtime::new().expect("Failed to create tokio runtime");
        let store = RecordStore::in_memory();
        let engine = LiveQueryEngine::new(store.clone());
        let notes = {
            let _guard = runtime.enter();
            engine.subscribe(|scope| scope.all::<Note>())
        };
        Self {
            runtime,
            store,
            notes,
        }
    }

    fn apply_operation(&self, op: &StoreOperation) -> PutOutcome {
        match op {
            StoreOperation::PutNote { id, content } => self
                .store
                .put(&Note {
                    id: note_id(*id),
                    pubkey: AUTHOR.to_string(),
                    content: content.clone(),
                    reply_to: None,
                    quote_of: None,
                    created_at: 0,
                    event: String::new(),
                    thread: Vec::new(),
                    quotes: Vec::new(),
                })
                .expect("note put failed"),
            StoreOperation::PutArticle {
                slug,
                created_at,
                title,
            } => self
                .store
                .put(&Article {
                    id: article_key(*slug),
                    url: format!("https://example.com/{slug}"),
                    title: title.clone(),
                    pubkey: AUTHOR.to_string(),
                    tags: Vec::new(),
                    content: String::new(),
                    author: None,
                    published_at: None,
                    created_at: *created_at,
                    event: String::new(),
                    event_id: note_id(100 + *slug),
                    urls: Vec::new(),
                })
                .expect("article put failed"),
        }
    }

    fn verify_invariants(&mut self, model: &StoreModel) {
        assert_eq!(self.store.version(), model.version, "version counts writes");

        let notes: BTreeMap<String, String> = self
            .store
            .all::<Note>()
            .expect("note scan failed")
            .into_iter()
            .map(|n| (n.id, n.content))
            .collect();
        assert_eq!(notes, model.notes, "one row per note id");

        let articles: BTreeMap<String, (i64, String)> = self
            .store
            .all::<Article>()
            .expect("article scan failed")
            .into_iter()
            .map(|a| (a.id, (a.created_at, a.title)))
            .collect();
        assert_eq!(articles, model.articles, "newest article version wins");

        // The live query must converge on the stored notes
        let expected: Vec<String> = model.notes.keys().cloned().collect();
        let notes_query = &mut self.notes;
        self.runtime.block_on(async {
            let converge = async {
                loop {
                    let current = notes_query.current();
                    let ids: Vec<String> = current
                        .result
                        .expect("live query failed")
                        .into_iter()
                        .map(|n| n.id)
                        .collect();
                    if ids == expected {
                        return;
                    }
                    notes_query.changed().await.expect("live query closed");
                }
            };
            tokio::time::timeout(Duration::from_secs(5), converge)
                .await
                .expect("live query did not converge");
        });
    }
}

impl StateMachineTest for StoreTestHarness {
    type SystemUnderTest = Self;
    type Reference = StoreModel;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        Self::new()
    }

    fn apply(
        mut state: Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        state.apply_operation(&transition);
        state.verify_invariants(ref_state);
        state
    }

    fn check_invariants(
        _state: &Self::SystemUnderTest,
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        // Checked after every transition in `apply`, which needs `&mut`
    }
}

prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 10000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn store_state_machine_test(sequential 1..40 => StoreTestHarness);
}

#[test]
fn test_equal_timestamps_overwrite() {
    let harness = StoreTestHarness::new();
    let first = StoreOperation::PutArticle {
        slug: 0,
        created_at: 5,
        title: "First".to_string(),
    };
    let second = StoreOperation::PutArticle {
        slug: 0,
        created_at: 5,
        title: "Second".to_string(),
    };
    assert_eq!(harness.apply_operation(&first), PutOutcome::Stored);
    assert_eq!(harness.apply_operation(&second), PutOutcome::Stored);

    let article: Article = harness.store.get(&article_key(0)).unwrap().unwrap();
    assert_eq!(article.title, "Second");
}

#[test]
fn test_older_article_is_stale() {
    let harness = StoreTestHarness::new();
    let newer = StoreOperation::PutArticle {
        slug: 1,
        created_at: 4,
        title: "Newer".to_string(),
    };
    let older = StoreOperation::PutArticle {
        slug: 1,
        created_at: 2,
        title: "Older".to_string(),
    };
    assert_eq!(harness.apply_operation(&newer), PutOutcome::Stored);
    assert_eq!(harness.apply_operation(&older), PutOutcome::Stale);
    assert_eq!(harness.store.version(), 1);
}
